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

//! Venue-agnostic entities: markets, instrument ids, market-data events,
//! orders with their lifecycle FSM, algo (TWAP) orders, positions and
//! balances.

pub mod algo_order;
pub mod balance;
pub mod events;
pub mod instrument;
pub mod market;
pub mod order;
pub mod position;

pub use mmb_utils::DateTime;
