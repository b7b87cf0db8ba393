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

//! Shared REST plumbing for every venue connector: a connection-pooled
//! `hyper` client, incremental query-string construction, HMAC-SHA256
//! request signing, and an HTTP-status-to-error-taxonomy mapping that lets
//! venues layer their own embedded error codes on top.

mod client;
mod error;
mod signing;
mod uri_builder;

pub use client::{ErrorHandler, ErrorHandlerData, ErrorHandlerEmpty, RequestType, RestClient, RestHeaders, RestResponse};
pub use error::RestError;
pub use signing::{hmac_sha256_base64, hmac_sha256_hex};
pub use uri_builder::{QueryKey, UriBuilder};
