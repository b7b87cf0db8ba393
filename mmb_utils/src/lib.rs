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

//! Clock/id primitives, cooperative-task spawning, cancellation and a
//! token-bucket rate limiter shared by every other crate in this workspace.
//! Small, dependency-light, imported by everything else.

pub mod cancellation;
pub mod ids;
pub mod infrastructure;
pub mod logger;
pub mod rate_limiter;
pub mod time;

pub type DateTime = chrono::DateTime<chrono::Utc>;

/// Just for marking explicitly: no action to do here and it is not a forgotten branch.
#[inline(always)]
pub fn nothing_to_do() {}

pub static OPERATION_CANCELED_MSG: &str = "Operation cancelled";

pub trait WithExpect<T> {
    fn with_expect(self, msg: impl FnOnce() -> String) -> T;
}

impl<T, E: std::fmt::Debug> WithExpect<T> for Result<T, E> {
    fn with_expect(self, msg: impl FnOnce() -> String) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{}: {:?}", msg(), e),
        }
    }
}

impl<T> WithExpect<T> for Option<T> {
    fn with_expect(self, msg: impl FnOnce() -> String) -> T {
        self.unwrap_or_else(|| panic!("{}", msg()))
    }
}
