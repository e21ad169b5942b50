//! Migration configuration
//!
//! Defaults cover the common case; every field can be overridden through
//! `STRATUM_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::migrations::schema_builder::validate_identifier;

pub const ENV_MIGRATIONS_DIR: &str = "STRATUM_MIGRATIONS_DIR";
pub const ENV_MIGRATIONS_TABLE: &str = "STRATUM_MIGRATIONS_TABLE";
pub const ENV_LOCK_TIMEOUT_SECS: &str = "STRATUM_LOCK_TIMEOUT_SECS";
pub const ENV_LOCK_POLL_MS: &str = "STRATUM_LOCK_POLL_MS";
pub const ENV_ALLOW_UNKNOWN_APPLIED: &str = "STRATUM_ALLOW_UNKNOWN_APPLIED";

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Migration engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory holding SQL migration files
    pub migrations_dir: PathBuf,
    /// Ledger table name
    pub migrations_table: String,
    /// How long a run waits for another run's lock
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
    /// Log, instead of reject, ledger entries no registered unit knows
    pub allow_unknown_applied: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "stratum_migrations".to_string(),
            lock_timeout: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(250),
            allow_unknown_applied: false,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, applying defaults for missing keys
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_MIGRATIONS_DIR) {
            config.migrations_dir = PathBuf::from(dir);
        }

        if let Some(table) = lookup(ENV_MIGRATIONS_TABLE) {
            config.migrations_table = table;
        }

        if let Some(secs) = lookup(ENV_LOCK_TIMEOUT_SECS) {
            let parsed = secs.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: "lock_timeout".to_string(),
                value: secs.clone(),
                expected: "whole number of seconds".to_string(),
            })?;
            config.lock_timeout = Duration::from_secs(parsed);
        }

        if let Some(ms) = lookup(ENV_LOCK_POLL_MS) {
            let parsed = ms.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: "lock_poll_interval".to_string(),
                value: ms.clone(),
                expected: "whole number of milliseconds".to_string(),
            })?;
            config.lock_poll_interval = Duration::from_millis(parsed);
        }

        if let Some(flag) = lookup(ENV_ALLOW_UNKNOWN_APPLIED) {
            config.allow_unknown_applied = parse_bool(&flag).ok_or_else(|| ConfigError::InvalidValue {
                field: "allow_unknown_applied".to_string(),
                value: flag.clone(),
                expected: "true/false, 1/0, yes/no or on/off".to_string(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn allow_unknown_applied(mut self, allow: bool) -> Self {
        self.allow_unknown_applied = allow;
        self
    }

    /// Name of the cross-process lock guarding runs against this ledger
    pub fn lock_name(&self) -> String {
        format!("{}_lock", self.migrations_table)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if validate_identifier("table", &self.migrations_table).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "migrations_table".to_string(),
                value: self.migrations_table.clone(),
                expected: "non-empty table name without quote characters".to_string(),
            });
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                message: "lock_timeout must be greater than zero".to_string(),
            });
        }

        if self.lock_poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed {
                message: "lock_poll_interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
