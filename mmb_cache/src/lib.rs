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

//! Authoritative in-memory store of orders, positions and balances plus
//! their derived indices, with periodic snapshotting to a pluggable
//! `KvStore` backend. The in-memory side is a `DashMap`-keyed pool; the
//! backend is a trait so the snapshot target (Redis, Sqlite, or nothing)
//! is a deployment choice, not a compile-time one.

pub mod cache;
pub mod kv_store;

pub use cache::{Cache, CacheOrderEntry};
pub use kv_store::{KvStore, RedisKvStore, SqliteKvStore};
