#![deny(
    non_ascii_idents,
    non_shorthand_field_patterns,
    path_statements,
    unused_comparisons,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_must_use
)]

//! In-process pub/sub and endpoint dispatch, built on the same cooperative
//! single-thread dispatch idiom the rest of this workspace uses for its
//! spawned tasks, generalized into an explicit bus object instead of ad
//! hoc channels.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("endpoint '{0}' already has a registered handler")]
    EndpointAlreadyRegistered(String),
}

type AnyMessage = Arc<dyn Any + Send + Sync>;
type Subscriber = Arc<dyn Fn(&AnyMessage) + Send + Sync>;
type EndpointHandler = Arc<dyn Fn(&AnyMessage) + Send + Sync>;

enum Deferred {
    Publish { topic: String, msg: AnyMessage },
    Send { endpoint: String, msg: AnyMessage },
}

/// Topic pub/sub (`publish`/`subscribe`, many subscribers, registration
/// order) plus single-handler endpoint dispatch (`register`/`send`).
/// Re-entrant `publish`/`send` calls made from inside a handler are queued
/// and drained only after the outermost dispatch returns, so a handler can
/// never be re-entered and causal ordering within one top-level event is
/// preserved.
#[derive(Default)]
pub struct MessageBus {
    topics: DashMap<String, Vec<Subscriber>>,
    endpoints: DashMap<String, EndpointHandler>,
    dispatching: AtomicBool,
    deferred: Mutex<VecDeque<Deferred>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`, called in the order subscribers were
    /// added. `T` must match what publishers on this topic actually publish;
    /// a mismatch is a logged no-op at dispatch time rather than a panic, so
    /// one bad subscriber can't take down the bus.
    pub fn subscribe<T, F>(&self, topic: impl Into<String>, handler: F)
    where
        T: 'static + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let wrapped: Subscriber = Arc::new(move |msg: &AnyMessage| match msg.downcast_ref::<T>() {
            Some(typed) => handler(typed),
            None => log::error!("subscriber type mismatch on topic"),
        });
        self.topics.entry(topic.into()).or_default().push(wrapped);
    }

    pub fn publish<T>(&self, topic: impl Into<String>, msg: T)
    where
        T: 'static + Send + Sync,
    {
        let topic = topic.into();
        let msg: AnyMessage = Arc::new(msg);
        if self.dispatching.swap(true, Ordering::AcqRel) {
            self.deferred.lock().push_back(Deferred::Publish { topic, msg });
            return;
        }
        self.dispatch_publish(&topic, &msg);
        self.dispatching.store(false, Ordering::Release);
        self.drain_deferred();
    }

    /// Registers the sole handler for `endpoint`. Returns
    /// [`BusError::EndpointAlreadyRegistered`] on a double-register.
    pub fn register<T, F>(&self, endpoint: impl Into<String>, handler: F) -> Result<(), BusError>
    where
        T: 'static + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let endpoint = endpoint.into();
        let wrapped: EndpointHandler = Arc::new(move |msg: &AnyMessage| match msg.downcast_ref::<T>() {
            Some(typed) => handler(typed),
            None => log::error!("endpoint handler type mismatch"),
        });
        match self.endpoints.entry(endpoint.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BusError::EndpointAlreadyRegistered(endpoint))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(wrapped);
                Ok(())
            }
        }
    }

    pub fn send<T>(&self, endpoint: impl Into<String>, msg: T)
    where
        T: 'static + Send + Sync,
    {
        let endpoint = endpoint.into();
        let msg: AnyMessage = Arc::new(msg);
        if self.dispatching.swap(true, Ordering::AcqRel) {
            self.deferred.lock().push_back(Deferred::Send { endpoint, msg });
            return;
        }
        self.dispatch_send(&endpoint, &msg);
        self.dispatching.store(false, Ordering::Release);
        self.drain_deferred();
    }

    fn dispatch_publish(&self, topic: &str, msg: &AnyMessage) {
        let Some(subscribers) = self.topics.get(topic) else {
            return;
        };
        for subscriber in subscribers.iter() {
            subscriber(msg);
        }
    }

    fn dispatch_send(&self, endpoint: &str, msg: &AnyMessage) {
        match self.endpoints.get(endpoint) {
            Some(handler) => handler(msg),
            None => log::warn!("no handler registered for endpoint '{endpoint}'"),
        }
    }

    fn drain_deferred(&self) {
        loop {
            let next = self.deferred.lock().pop_front();
            let Some(item) = next else { break };
            self.dispatching.store(true, Ordering::Release);
            match item {
                Deferred::Publish { topic, msg } => self.dispatch_publish(&topic, &msg),
                Deferred::Send { endpoint, msg } => self.dispatch_send(&endpoint, &msg),
            }
            self.dispatching.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn subscribers_fire_in_registration_order() {
        let bus = MessageBus::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order1 = order.clone();
        bus.subscribe::<i32, _>("t", move |_| order1.lock().unwrap().push(1));
        let order2 = order.clone();
        bus.subscribe::<i32, _>("t", move |_| order2.lock().unwrap().push(2));

        bus.publish("t", 42);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn double_register_is_rejected() {
        let bus = MessageBus::new();
        bus.register::<i32, _>("pending", |_| {}).unwrap();
        let err = bus.register::<i32, _>("pending", |_| {}).unwrap_err();
        assert!(matches!(err, BusError::EndpointAlreadyRegistered(_)));
    }

    #[test]
    fn reentrant_publish_is_deferred_until_after_current_handler() {
        let bus = Arc::new(MessageBus::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let bus2 = bus.clone();
        let order2 = order.clone();
        bus.subscribe::<i32, _>("outer", move |_| {
            order2.lock().unwrap().push("outer-start");
            bus2.publish("inner", 1);
            order2.lock().unwrap().push("outer-end");
        });
        let order3 = order.clone();
        bus.subscribe::<i32, _>("inner", move |_| {
            order3.lock().unwrap().push("inner");
        });

        bus.publish("outer", 0);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["outer-start", "outer-end", "inner"]
        );
    }

    #[test]
    fn unmatched_topic_is_a_silent_noop() {
        let bus = MessageBus::new();
        bus.publish("nobody-subscribed", 1);
    }
}
