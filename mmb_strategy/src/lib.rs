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

//! Strategy host: the callback surface a strategy implements, the bus
//! wiring that drives it, and a periodic/cron scheduler running on the
//! same loop.

mod host;
mod scheduler;
mod strategy;

pub use host::{StrategyHost, ORDER_TOPICS};
pub use scheduler::Scheduler;
pub use strategy::Strategy;
