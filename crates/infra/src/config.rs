//! Environment-driven configuration for a migration service.
//!
//! | Variable                      | Default   |
//! |-------------------------------|-----------|
//! | `FLEETMIG_DATABASE_NAME`      | `Default` |
//! | `FLEETMIG_MAX_TRY_COUNT`      | `3`       |
//! | `FLEETMIG_RETRY_MIN_DELAY_MS` | `5000`    |
//! | `FLEETMIG_RETRY_MAX_DELAY_MS` | `15000`   |
//! | `FLEETMIG_MIGRATIONS_DIR`     | unset     |
//! | `DATABASE_URL`                | unset     |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use fleetmig_core::DatabaseName;

use crate::retry::RetryPolicy;

pub const DATABASE_NAME_VAR: &str = "FLEETMIG_DATABASE_NAME";
pub const MAX_TRY_COUNT_VAR: &str = "FLEETMIG_MAX_TRY_COUNT";
pub const MIN_DELAY_VAR: &str = "FLEETMIG_RETRY_MIN_DELAY_MS";
pub const MAX_DELAY_VAR: &str = "FLEETMIG_RETRY_MAX_DELAY_MS";
pub const MIGRATIONS_DIR_VAR: &str = "FLEETMIG_MIGRATIONS_DIR";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("retry delay window is empty: min {min_ms}ms >= max {max_ms}ms")]
    EmptyDelayWindow { min_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Logical database this service owns.
    pub database_name: DatabaseName,
    pub retry: RetryPolicy,
    /// Directory of SQL migrations; Postgres runners are used when this and
    /// `database_url` are both set.
    pub migrations_dir: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_name: DatabaseName::default_name(),
            retry: RetryPolicy::default(),
            migrations_dir: None,
            database_url: None,
        }
    }
}

impl MigrationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let database_name = match get(DATABASE_NAME_VAR) {
            Some(value) => DatabaseName::new(value.trim()).map_err(|e| ConfigError::Invalid {
                var: DATABASE_NAME_VAR,
                value,
                reason: e.to_string(),
            })?,
            None => defaults.database_name,
        };

        let max_try_count = parse_u64(get(MAX_TRY_COUNT_VAR), MAX_TRY_COUNT_VAR)?
            .map(|n| {
                u32::try_from(n).map_err(|e| ConfigError::Invalid {
                    var: MAX_TRY_COUNT_VAR,
                    value: n.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?
            .unwrap_or(defaults.retry.max_try_count);

        let min_delay = parse_u64(get(MIN_DELAY_VAR), MIN_DELAY_VAR)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.min_delay);
        let max_delay = parse_u64(get(MAX_DELAY_VAR), MAX_DELAY_VAR)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.max_delay);

        if min_delay >= max_delay {
            return Err(ConfigError::EmptyDelayWindow {
                min_ms: min_delay.as_millis() as u64,
                max_ms: max_delay.as_millis() as u64,
            });
        }

        Ok(Self {
            database_name,
            retry: RetryPolicy {
                max_try_count,
                min_delay,
                max_delay,
            },
            migrations_dir: get(MIGRATIONS_DIR_VAR).map(PathBuf::from),
            database_url: get(DATABASE_URL_VAR),
        })
    }
}

fn parse_u64(value: Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    value
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value: raw,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = MigrationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, MigrationConfig::default());
        assert!(config.database_name.is_default());
        assert_eq!(config.retry.max_try_count, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let config = MigrationConfig::from_lookup(lookup(&[
            (DATABASE_NAME_VAR, "Catalog"),
            (MAX_TRY_COUNT_VAR, "5"),
            (MIN_DELAY_VAR, "100"),
            (MAX_DELAY_VAR, "200"),
            (MIGRATIONS_DIR_VAR, "./migrations"),
            (DATABASE_URL_VAR, "postgres://localhost/catalog"),
        ]))
        .unwrap();

        assert_eq!(config.database_name.as_str(), "Catalog");
        assert_eq!(config.retry.max_try_count, 5);
        assert_eq!(config.retry.min_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_millis(200));
        assert_eq!(config.migrations_dir, Some(PathBuf::from("./migrations")));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/catalog"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = MigrationConfig::from_lookup(lookup(&[
            (DATABASE_NAME_VAR, "  "),
            (DATABASE_URL_VAR, ""),
        ]))
        .unwrap();
        assert!(config.database_name.is_default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn non_numeric_try_count_is_rejected() {
        let err = MigrationConfig::from_lookup(lookup(&[(MAX_TRY_COUNT_VAR, "three")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: MAX_TRY_COUNT_VAR, .. }));
    }

    #[test]
    fn inverted_delay_window_is_rejected() {
        let err = MigrationConfig::from_lookup(lookup(&[
            (MIN_DELAY_VAR, "2000"),
            (MAX_DELAY_VAR, "1000"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyDelayWindow { min_ms: 2000, max_ms: 1000 });
    }
}
