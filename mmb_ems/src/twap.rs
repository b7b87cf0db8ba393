//! TWAP parent-order supervisor, shaped after `mmb_registry`/`mmb_cache`'s
//! single-writer-via-bus style: the supervisor is just another task that
//! drives the EMS's own `submit_order`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mmb_domain::algo_order::{AlgoOrder, AlgoOrderStatus};
use mmb_domain::order::{OrderStatus, OrderSubmit, PrecisionMode, SubmitType};
use mmb_utils::cancellation::CancellationToken2;
use mmb_utils::infrastructure::spawn_future;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::Ems;

/// A failed child doesn't fail the parent unless this many consecutive
/// children fail (default 3 — no venue-specific override exists, so this
/// is a fixed constant rather than configuration).
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

pub fn slice_plan(amount: Decimal, duration_s: u64, wait_s: u64, precision_amount_dp: u32) -> (u64, Decimal) {
    let slice_count = (duration_s / wait_s.max(1)).max(1);
    let raw_slice = amount / Decimal::from(slice_count);
    let slice_amount = raw_slice.round_dp_with_strategy(
        precision_amount_dp,
        rust_decimal::RoundingStrategy::ToNegativeInfinity,
    );
    (slice_count, slice_amount)
}

pub(crate) async fn run(ems: Arc<Ems>, parent_uuid: Uuid, submit: OrderSubmit, cancel: CancellationToken2) {
    let duration_s = submit.duration_s.unwrap_or(0);
    let wait_s = submit.wait_s.unwrap_or(1).max(1);
    let precision = ems.precision_for(&submit.symbol);
    let (slice_count, slice_amount) = slice_plan(submit.amount, duration_s, wait_s, precision.amount);
    let last_slice_amount = submit.amount - slice_amount * Decimal::from(slice_count - 1);

    let canceling = Arc::new(AtomicBool::new(false));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_s);

    for slice_index in 0..slice_count {
        if cancel.is_cancellation_requested() {
            canceling.store(true, Ordering::SeqCst);
            break;
        }
        if canceling.load(Ordering::SeqCst) {
            break;
        }

        let remaining_filled = ems.cache.algo_order(parent_uuid).map(|a| a.filled).unwrap_or(Decimal::ZERO);
        if remaining_filled >= submit.amount {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let this_slice = if slice_index + 1 == slice_count {
            last_slice_amount
        } else {
            slice_amount
        };

        let child_submit = OrderSubmit {
            submit_type: SubmitType::Create,
            symbol: submit.symbol.clone(),
            side: submit.side,
            order_type: mmb_domain::order::OrderType::Market,
            time_in_force: submit.time_in_force,
            amount: this_slice,
            price: None,
            reduce_only: submit.reduce_only,
            position_side: submit.position_side,
            precision_mode: PrecisionMode::Floor,
            target_uuid: None,
            duration_s: None,
            wait_s: None,
        };

        let child_uuid = ems.submit_child(child_submit);
        ems.append_twap_child(parent_uuid, child_uuid);

        cancel.sleep_or_cancelled(Duration::from_secs(wait_s)).await;

        reconcile_children(&ems, parent_uuid, &canceling);
    }

    finish(&ems, parent_uuid, &canceling).await;
}

fn reconcile_children(ems: &Arc<Ems>, parent_uuid: Uuid, canceling: &Arc<AtomicBool>) {
    let Some(mut parent) = ems.cache.algo_order(parent_uuid) else {
        return;
    };

    let mut filled = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    let mut consecutive_failures = 0u32;
    for child_uuid in &parent.children {
        let Some(entry) = ems.cache.order(*child_uuid) else {
            continue;
        };
        entry.order_ref.fn_ref(|order| {
            filled += order.filled;
            cost += order.cum_cost;
            if order.status == OrderStatus::Failed {
                consecutive_failures += 1;
            } else if order.status.is_terminal() {
                consecutive_failures = 0;
            }
        });
    }

    parent.recompute_aggregates(filled, cost);
    parent.consecutive_failures = consecutive_failures;
    if consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
        parent.status = AlgoOrderStatus::Failed;
        canceling.store(true, Ordering::SeqCst);
        log::error!("twap {parent_uuid} failed after {consecutive_failures} consecutive child failures");
    }
    ems.cache.apply_algo_order(parent.clone());
    ems.publish_algo_order(parent);
}

async fn finish(ems: &Arc<Ems>, parent_uuid: Uuid, canceling: &Arc<AtomicBool>) {
    let Some(mut parent) = ems.cache.algo_order(parent_uuid) else {
        return;
    };
    if parent.status == AlgoOrderStatus::Failed {
        ems.publish_algo_order(parent);
        return;
    }

    if canceling.load(Ordering::SeqCst) || parent.status == AlgoOrderStatus::Canceling {
        parent.status = AlgoOrderStatus::Canceling;
        ems.cache.apply_algo_order(parent.clone());
        ems.publish_algo_order(parent.clone());
        for child_uuid in parent.children.clone() {
            if let Some(entry) = ems.cache.order(child_uuid) {
                if entry.order_ref.fn_ref(|o| !o.status.is_terminal()) {
                    ems.submit_cancel(child_uuid);
                }
            }
        }
        wait_for_children_terminal(ems, &parent.children).await;
        parent.status = AlgoOrderStatus::Canceled;
    } else {
        parent.status = AlgoOrderStatus::Finished;
    }
    ems.cache.apply_algo_order(parent.clone());
    ems.publish_algo_order(parent);
}

async fn wait_for_children_terminal(ems: &Arc<Ems>, children: &[Uuid]) {
    for _ in 0..100 {
        let all_terminal = children.iter().all(|uuid| {
            ems.cache
                .order(*uuid)
                .map(|entry| entry.order_ref.fn_ref(|o| o.status.is_terminal()))
                .unwrap_or(true)
        });
        if all_terminal {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub(crate) fn new_algo_order(uuid: Uuid, submit: &OrderSubmit) -> AlgoOrder {
    AlgoOrder {
        uuid,
        symbol: submit.symbol.clone(),
        side: submit.side,
        amount: submit.amount,
        duration_s: submit.duration_s.unwrap_or(0),
        wait_s: submit.wait_s.unwrap_or(1),
        status: AlgoOrderStatus::Running,
        children: Vec::new(),
        filled: Decimal::ZERO,
        cost: Decimal::ZERO,
        average: None,
        consecutive_failures: 0,
        created_at: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
    }
}

pub(crate) fn spawn(ems: Arc<Ems>, parent_uuid: Uuid, submit: OrderSubmit, cancel: CancellationToken2) {
    spawn_future("twap supervisor", async move {
        run(ems, parent_uuid, submit, cancel).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slice_plan_splits_evenly_when_duration_divides_by_wait() {
        // create_twap(sell, amount=0.3, duration=60, wait=3) -> 20 slices of ~0.015 each.
        let (slice_count, slice_amount) = slice_plan(dec!(0.3), 60, 3, 3);
        assert_eq!(slice_count, 20);
        assert_eq!(slice_amount, dec!(0.015));
    }

    #[test]
    fn slice_plan_floors_to_precision_leaving_a_residual_for_the_final_slice() {
        let (slice_count, slice_amount) = slice_plan(dec!(1), 30, 4, 2);
        // 30/4 = 7 slices, 1/7 = 0.142857... floored to 2dp is 0.14, leaving
        // a residual absorbed by the final slice (checked by the caller).
        assert_eq!(slice_count, 7);
        assert_eq!(slice_amount, dec!(0.14));
        let last = dec!(1) - slice_amount * Decimal::from(slice_count - 1);
        assert!(last > slice_amount);
    }

    #[test]
    fn slice_plan_never_produces_zero_slices() {
        let (slice_count, _) = slice_plan(dec!(1), 1, 10, 2);
        assert_eq!(slice_count, 1);
    }
}
