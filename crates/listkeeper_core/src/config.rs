//! Runtime configuration for the core library.
//!
//! # Responsibility
//! - Describe database, logging and paging settings in one serde model.
//! - Load settings from JSON or from `LISTKEEPER_*` environment variables.
//!
//! # Invariants
//! - A validated config always has `1 <= default_limit <= max_limit`.
//! - `log_dir`, when set, is absolute.

use crate::logging::{default_log_level, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PAGE_LIMIT: u32 = 50;
const MAX_PAGE_LIMIT: u32 = 500;

const ENV_DB_PATH: &str = "LISTKEEPER_DB_PATH";
const ENV_DB_BUSY_TIMEOUT_MS: &str = "LISTKEEPER_DB_BUSY_TIMEOUT_MS";
const ENV_LOG_LEVEL: &str = "LISTKEEPER_LOG_LEVEL";
const ENV_LOG_DIR: &str = "LISTKEEPER_LOG_DIR";
const ENV_PAGE_DEFAULT_LIMIT: &str = "LISTKEEPER_PAGE_DEFAULT_LIMIT";
const ENV_PAGE_MAX_LIMIT: &str = "LISTKEEPER_PAGE_MAX_LIMIT";

#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid config value `{value}` for {key}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub paging: PagingConfig,
}

/// SQLite connection settings. `path = None` means an in-memory database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Log backend settings. `log_dir = None` logs to stderr.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagingConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl PagingConfig {
    /// Resolves a requested limit: missing or zero falls back to the default,
    /// oversized values clamp to the maximum.
    pub fn apply(&self, requested: Option<u32>) -> u32 {
        match requested {
            None | Some(0) => self.default_limit,
            Some(value) if value > self.max_limit => self.max_limit,
            Some(value) => value,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(path) = read(ENV_DB_PATH) {
            config.database.path = Some(PathBuf::from(path));
        }
        if let Some(value) = read(ENV_DB_BUSY_TIMEOUT_MS) {
            config.database.busy_timeout_ms = parse_number(ENV_DB_BUSY_TIMEOUT_MS, &value)?;
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            config.logging.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = read(ENV_PAGE_DEFAULT_LIMIT) {
            config.paging.default_limit = parse_number(ENV_PAGE_DEFAULT_LIMIT, &value)?;
        }
        if let Some(value) = read(ENV_PAGE_MAX_LIMIT) {
            config.paging.max_limit = parse_number(ENV_PAGE_MAX_LIMIT, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize_level(&self.logging.level).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "logging.level",
                value: self.logging.level.clone(),
                reason: "expected trace|debug|info|warn|error",
            });
        }
        if let Some(dir) = &self.logging.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    key: "logging.log_dir",
                    value: dir.display().to_string(),
                    reason: "must be an absolute path",
                });
            }
        }
        if self.paging.max_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "paging.max_limit",
                value: self.paging.max_limit.to_string(),
                reason: "must be positive",
            });
        }
        if self.paging.default_limit == 0 || self.paging.default_limit > self.paging.max_limit {
            return Err(ConfigError::InvalidValue {
                key: "paging.default_limit",
                value: self.paging.default_limit.to_string(),
                reason: "must be between 1 and paging.max_limit",
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "expected a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, PagingConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert!(config.database.path.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("LISTKEEPER_DB_PATH", "/var/lib/listkeeper/lists.db"),
            ("LISTKEEPER_DB_BUSY_TIMEOUT_MS", "250"),
            ("LISTKEEPER_LOG_LEVEL", " WARN "),
            ("LISTKEEPER_PAGE_DEFAULT_LIMIT", "20"),
        ]))
        .unwrap();

        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/listkeeper/lists.db"))
        );
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.paging.default_limit, 20);
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let err =
            CoreConfig::from_lookup(lookup(&[("LISTKEEPER_DB_BUSY_TIMEOUT_MS", "soon")]))
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "LISTKEEPER_DB_BUSY_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let err = CoreConfig::from_lookup(lookup(&[("LISTKEEPER_LOG_DIR", "logs")])).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn json_config_is_parsed_and_validated() {
        let config = CoreConfig::from_json_str(
            r#"{"database":{"busy_timeout_ms":100},"paging":{"default_limit":5,"max_limit":10}}"#,
        )
        .unwrap();
        assert_eq!(config.database.busy_timeout_ms, 100);
        assert_eq!(config.paging.apply(None), 5);

        let err = CoreConfig::from_json_str(r#"{"paging":{"default_limit":50,"max_limit":10}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("paging.default_limit"));

        assert!(matches!(
            CoreConfig::from_json_str(r#"{"unknown":1}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn paging_limit_defaults_and_clamps() {
        let paging = PagingConfig::default();
        assert_eq!(paging.apply(None), 50);
        assert_eq!(paging.apply(Some(0)), 50);
        assert_eq!(paging.apply(Some(7)), 7);
        assert_eq!(paging.apply(Some(10_000)), 500);
    }
}
