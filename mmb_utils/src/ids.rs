//! Small-string interned ids, generalized so venue order ids and local algo
//! ids can reuse the machinery instead of hand-rolling `String` newtypes
//! per call site.

/// Declares a `SmallString`-backed id type with a process-unique
/// `::unique_id()` constructor seeded from the current UNIX time.
#[macro_export]
macro_rules! impl_str_id {
    ($type:ident) => {
        paste::paste! {
            static [<$type:snake:upper _ID>]: once_cell::sync::Lazy<std::sync::atomic::AtomicU64> =
                once_cell::sync::Lazy::new($crate::time::atomic_current_secs);
        }

        #[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone, serde::Serialize, serde::Deserialize, Hash)]
        #[serde(transparent)]
        pub struct $type(smallstr::SmallString<[u8; 16]>);

        impl $type {
            pub fn unique_id() -> Self {
                use std::sync::atomic::Ordering;
                let n = paste::paste! { [<$type:snake:upper _ID>] }.fetch_add(1, Ordering::AcqRel);
                $type(n.to_string().into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $type {
            fn from(value: &str) -> Self {
                $type(smallstr::SmallString::from(value))
            }
        }

        impl From<String> for $type {
            fn from(value: String) -> Self {
                $type(smallstr::SmallString::from(value.as_str()))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    impl_str_id!(TestId);

    #[test]
    fn unique_ids_differ() {
        let a = TestId::unique_id();
        let b = TestId::unique_id();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_str() {
        let id: TestId = "ALGO-abc123".into();
        assert_eq!(id.as_str(), "ALGO-abc123");
        assert_eq!(id.to_string(), "ALGO-abc123");
    }
}
