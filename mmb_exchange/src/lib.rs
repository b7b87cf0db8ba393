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

//! Venue-polymorphic connector capability surfaces. This crate defines the
//! traits; `exchanges/binance`, `exchanges/okx` and `exchanges/bybit`
//! provide one implementation each, selected at connector construction
//! rather than matched on a `Venue` tag.

mod capability;
mod connector;

pub use capability::{DecodeError, DecodedOrderUpdate, PublicEvent, VenueCapability};
pub use connector::{ListenKeyLifecycle, PrivateConnector, PublicConnector};
