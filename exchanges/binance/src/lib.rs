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

//! Binance venue connector. Implements `mmb_exchange`'s capability
//! and connector traits over `mmb_rest`/`mmb_ws`.

mod capability;
mod connector;
mod endpoints;
mod headers;

pub use capability::BinanceCapability;
pub use connector::{
    new_rest_client, BinancePrivateConnector, BinancePublicConnector, LISTEN_KEY_REFRESH_INTERVAL,
};
pub use headers::{BinanceErrorHandler, BinanceHeaders};
