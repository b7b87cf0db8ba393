//! `log4rs`-backed logger init, grounded on `mmb_utils/src/logger.rs` in the
//! teacher: a YAML config file found by walking up ancestor directories, a
//! custom filter registered by name so the config can drop noisy
//! third-party targets, and an `MMB_NO_LOGS` escape hatch for test runs.
//! The teacher repo also carries two `fern`-based `logger.rs` copies
//! (`src/core/logger.rs`, `framework/src/core/logger.rs`) under its other
//! top-level package; this crate is modeled on the `log4rs` one specifically,
//! the only of the three that ships as the standalone `mmb_utils` crate this
//! workspace's `mmb_utils` is named after.
//!
//! A default `log_config/config.yaml` ships at the repository root so
//! `init_logger` finds a config the first time it walks ancestor
//! directories from a binary's working directory, instead of always
//! falling into the "no config found" branch.

use std::path::{Path, PathBuf};
use std::sync::Once;

use log4rs::config::Deserializers;

const CONFIG_FILE_NAME: &str = "log_config/config.yaml";
const NO_LOGS_VAR: &str = "MMB_NO_LOGS";

static INIT: Once = Once::new();

/// Initializes the global `log4rs` logger from `log_config/config.yaml`,
/// searched for starting at the current directory and walking up through
/// ancestors. Safe to call more than once; only the first call takes effect.
/// Set `MMB_NO_LOGS=1` to skip initialization entirely (used by test binaries
/// that don't want log output interleaved with test output).
pub fn init_logger() {
    if std::env::var(NO_LOGS_VAR).is_ok() {
        return;
    }

    INIT.call_once(|| match find_config_file(CONFIG_FILE_NAME) {
        Some(path) => {
            if let Err(err) = log4rs::init_file(&path, deserializers()) {
                eprintln!("failed to initialize log4rs from {path:?}: {err}");
            }
        }
        None => {
            eprintln!(
                "no {CONFIG_FILE_NAME} found in any ancestor directory; logging is disabled"
            );
        }
    });
}

fn find_config_file(file_name: &str) -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Registers [`outer_modules_filter::Deserializer`] under the name
/// `config.yaml`'s appenders reference it by (`kind: outer_modules_filter`),
/// on top of `log4rs`'s built-in appender/encoder/filter kinds.
fn deserializers() -> Deserializers {
    let mut deserializers = Deserializers::default();
    deserializers.insert("outer_modules_filter", outer_modules_filter::Deserializer);
    deserializers
}

/// A `log4rs` filter that drops everything above `Warn` from noisy
/// third-party crate targets, so `config.yaml` can keep one root logger
/// without being swamped by transport-layer trace spam.
pub mod outer_modules_filter {
    use log::{Level, Record};
    use log4rs::config::{Deserialize, Deserializers};
    use log4rs::filter::{Filter as Log4rsFilter, Response};

    const NOISY_PREFIXES: &[&str] = &["hyper", "tokio_tungstenite", "rustls", "want", "mio"];

    #[derive(serde::Deserialize)]
    pub struct FilterConfig {}

    #[derive(Debug, Default)]
    pub struct Filter;

    impl Log4rsFilter for Filter {
        fn filter(&self, record: &Record) -> Response {
            if record.level() <= Level::Warn {
                return Response::Accept;
            }
            if NOISY_PREFIXES.iter().any(|prefix| record.target().starts_with(prefix)) {
                Response::Reject
            } else {
                Response::Accept
            }
        }
    }

    pub struct Deserializer;

    impl Deserialize for Deserializer {
        type Trait = dyn Log4rsFilter;
        type Config = FilterConfig;

        fn deserialize(&self, _config: FilterConfig, _deserializers: &Deserializers) -> anyhow::Result<Box<dyn Log4rsFilter>> {
            Ok(Box::new(Filter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Record};
    use log4rs::filter::{Filter as Log4rsFilter, Response};

    #[test]
    fn find_config_file_returns_none_outside_any_ancestor() {
        assert_eq!(find_config_file("definitely-not-a-real-file.yaml"), None);
    }

    #[test]
    fn outer_modules_filter_drops_noisy_crates_above_warn() {
        let filter = outer_modules_filter::Filter;
        let record = Record::builder().target("hyper::client").level(Level::Info).build();
        assert!(matches!(filter.filter(&record), Response::Reject));
    }

    #[test]
    fn outer_modules_filter_keeps_warnings_from_noisy_crates() {
        let filter = outer_modules_filter::Filter;
        let record = Record::builder().target("hyper::client").level(Level::Warn).build();
        assert!(matches!(filter.filter(&record), Response::Accept));
    }

    #[test]
    fn outer_modules_filter_keeps_workspace_crates() {
        let filter = outer_modules_filter::Filter;
        let record = Record::builder().target("mmb_ws::connection").level(Level::Trace).build();
        assert!(matches!(filter.filter(&record), Response::Accept));
    }

    #[test]
    fn config_path_is_relative() {
        assert!(!Path::new(CONFIG_FILE_NAME).is_absolute());
    }
}
