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

//! Runtime configuration: a `Config` value deserialized from TOML and
//! handed to the runtime by value/`Arc`, not read from a process-wide
//! singleton. Settings (`config.toml`) are split from credentials
//! (`credentials.toml`) and merged with plain `serde`/`toml`, since config
//! is read once at startup and never written back — nothing here needs
//! `toml_edit`'s document-preserving edits.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use mmb_domain::market::{AccountType, Venue};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as TOML: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{venue:?}/{account_type:?} is in config.toml but has no matching entry in the secrets file")]
    MissingCredentials { venue: Venue, account_type: AccountType },
}

/// One `(venue, account_type)` session's non-secret settings, from
/// `config.toml`'s `[[exchange]]` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub venue: Venue,
    pub account_type: AccountType,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_true")]
    pub enable_rate_limit: bool,
}

fn default_true() -> bool {
    true
}

/// The matching secret half of an [`ExchangeConfig`], from the secrets file
/// (`.keys/.secrets.toml` by convention, never `config.toml` itself, so
/// credentials never end up in a file meant to be checked in).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSecret {
    pub venue: Venue,
    pub account_type: AccountType,
    pub api_key: String,
    pub secret: String,
    /// OKX only; absent for Binance/Bybit.
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// One configured `(venue, account_type)` session, config and secret merged.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub venue: Venue,
    pub account_type: AccountType,
    pub testnet: bool,
    pub enable_rate_limit: bool,
    pub api_key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmsSettings {
    #[serde(default = "default_cache_sync_interval_s")]
    pub cache_sync_interval_s: u64,
    #[serde(default = "default_cache_expire_time_s")]
    pub cache_expire_time_s: u64,
}

fn default_cache_sync_interval_s() -> u64 {
    60
}

fn default_cache_expire_time_s() -> u64 {
    3600
}

impl Default for EmsSettings {
    fn default() -> Self {
        EmsSettings {
            cache_sync_interval_s: default_cache_sync_interval_s(),
            cache_expire_time_s: default_cache_expire_time_s(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum StorageSettings {
    Redis(RedisSettings),
    Sqlite { path: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_redis_port() -> u16 {
    6379
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(rename = "exchange", default)]
    exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    ems: EmsSettings,
    storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSecrets {
    #[serde(rename = "exchange", default)]
    exchanges: Vec<ExchangeSecret>,
}

/// Fully resolved runtime config: one [`ExchangeSettings`] per configured
/// session, plus EMS and storage settings. Constructed once at startup
/// ([`Config::load`]) and then passed by value/`Arc` everywhere else —
/// there is no global accessor for it.
#[derive(Debug, Clone)]
pub struct Config {
    pub exchanges: Vec<ExchangeSettings>,
    pub ems: EmsSettings,
    pub storage: StorageSettings,
}

impl Config {
    /// Reads `config_path` and `secrets_path` as TOML and merges them by
    /// `(venue, account_type)`. Environment variables of the form
    /// `MMB_<VENUE>_<ACCOUNT_TYPE>_API_KEY`/`_SECRET`/`_PASSPHRASE` override
    /// whatever the secrets file supplied, so a deployment can inject
    /// credentials without writing them to disk at all.
    pub fn load(config_path: &Path, secrets_path: &Path) -> Result<Config, ConfigError> {
        let raw: RawConfig = read_toml(config_path)?;
        let secrets: RawSecrets = read_toml(secrets_path)?;

        let mut secrets_by_key: HashMap<(Venue, AccountType), ExchangeSecret> = secrets
            .exchanges
            .into_iter()
            .map(|secret| ((secret.venue, secret.account_type), secret))
            .collect();

        let mut exchanges = Vec::with_capacity(raw.exchanges.len());
        for exchange in raw.exchanges {
            let key = (exchange.venue, exchange.account_type);
            let mut secret = secrets_by_key.remove(&key).ok_or(ConfigError::MissingCredentials {
                venue: exchange.venue,
                account_type: exchange.account_type,
            })?;
            apply_env_overrides(exchange.venue, exchange.account_type, &mut secret);

            exchanges.push(ExchangeSettings {
                venue: exchange.venue,
                account_type: exchange.account_type,
                testnet: exchange.testnet,
                enable_rate_limit: exchange.enable_rate_limit,
                api_key: secret.api_key,
                secret: secret.secret,
                passphrase: secret.passphrase,
            });
        }

        Ok(Config {
            exchanges,
            ems: raw.ems,
            storage: raw.storage,
        })
    }
}

fn apply_env_overrides(venue: Venue, account_type: AccountType, secret: &mut ExchangeSecret) {
    let prefix = format!("MMB_{venue}_{account_type:?}").to_uppercase();
    if let Ok(value) = std::env::var(format!("{prefix}_API_KEY")) {
        secret.api_key = value;
    }
    if let Ok(value) = std::env::var(format!("{prefix}_SECRET")) {
        secret.secret = value;
    }
    if let Ok(value) = std::env::var(format!("{prefix}_PASSPHRASE")) {
        secret.passphrase = Some(value);
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mmb_config_test_{name}_{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_and_merges_config_with_matching_secrets() {
        let config_path = write_temp(
            "config",
            r#"
            [[exchange]]
            venue = "BINANCE"
            account_type = "LIVE"
            testnet = true

            [storage]
            backend = "sqlite"
            path = "mmb.db"
            "#,
        );
        let secrets_path = write_temp(
            "secrets",
            r#"
            [[exchange]]
            venue = "BINANCE"
            account_type = "LIVE"
            api_key = "key"
            secret = "sec"
            "#,
        );

        let config = Config::load(&config_path, &secrets_path).unwrap();
        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.exchanges[0].api_key, "key");
        assert!(config.exchanges[0].testnet);
        assert_eq!(config.ems.cache_sync_interval_s, 60);

        std::fs::remove_file(config_path).ok();
        std::fs::remove_file(secrets_path).ok();
    }

    #[test]
    fn missing_secret_for_a_configured_exchange_is_an_error() {
        let config_path = write_temp(
            "config_missing",
            r#"
            [[exchange]]
            venue = "OKX"
            account_type = "LIVE"

            [storage]
            backend = "sqlite"
            path = "mmb.db"
            "#,
        );
        let secrets_path = write_temp("secrets_missing", "");

        let err = Config::load(&config_path, &secrets_path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredentials { .. }));

        std::fs::remove_file(config_path).ok();
        std::fs::remove_file(secrets_path).ok();
    }

    #[test]
    fn env_override_replaces_secrets_file_api_key() {
        let venue = Venue::Bybit;
        let account_type = AccountType::Live;
        let mut secret = ExchangeSecret {
            venue,
            account_type,
            api_key: "from-file".to_string(),
            secret: "from-file-secret".to_string(),
            passphrase: None,
        };
        std::env::set_var("MMB_BYBIT_LIVE_API_KEY", "from-env");
        apply_env_overrides(venue, account_type, &mut secret);
        std::env::remove_var("MMB_BYBIT_LIVE_API_KEY");

        assert_eq!(secret.api_key, "from-env");
    }
}
