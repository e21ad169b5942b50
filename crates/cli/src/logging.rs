//! Logging setup for the `stratum` binary
//!
//! Logs go to stderr so command output on stdout stays machine readable.

use std::env;
use std::io;

use anyhow::Context;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// JSON structured logging instead of plain text
    pub json_format: bool,
    pub pretty_print: bool,
    /// Full filter directive, overrides `level` (e.g. "stratum_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Read `LOG_LEVEL`, `LOG_FORMAT` (`text`, `pretty` or `json`) and `LOG_FILTER`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    pub fn from_source<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup("LOG_LEVEL") {
            let level = level.trim().to_lowercase();
            let valid_levels = ["error", "warn", "info", "debug", "trace"];
            if !valid_levels.contains(&level.as_str()) {
                anyhow::bail!(
                    "invalid LOG_LEVEL '{}', expected one of: {}",
                    level,
                    valid_levels.join(", ")
                );
            }
            config.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            match format.trim().to_lowercase().as_str() {
                "json" => config.json_format = true,
                "pretty" => config.pretty_print = true,
                "text" | "plain" => {}
                other => anyhow::bail!("invalid LOG_FORMAT '{}', expected text, pretty or json", other),
            }
        }

        if let Some(filter) = lookup("LOG_FILTER") {
            let filter = filter.trim();
            if !filter.is_empty() {
                EnvFilter::try_new(filter).with_context(|| format!("invalid LOG_FILTER '{}'", filter))?;
                config.env_filter = Some(filter.to_string());
            }
        }

        Ok(config)
    }

    /// Filter directive applied when `RUST_LOG` is unset
    pub fn directive(&self) -> String {
        self.env_filter.clone().unwrap_or_else(|| {
            format!(
                "stratum={level},stratum_migrate={level},sqlx=warn",
                level = self.level
            )
        })
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directive()))
        .context("invalid log filter")?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else if config.pretty_print {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }

    tracing::debug!(
        level = %config.level,
        format = if config.json_format { "json" } else { "text" },
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_source(|_| None).unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.directive(), "stratum=info,stratum_migrate=info,sqlx=warn");
    }

    #[test]
    fn test_env_overrides() {
        let config = LoggingConfig::from_source(|key| match key {
            "LOG_LEVEL" => Some("DEBUG".to_string()),
            "LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
    }

    #[test]
    fn test_log_filter_replaces_level_directive() {
        let config = LoggingConfig::from_source(|key| match key {
            "LOG_LEVEL" => Some("warn".to_string()),
            "LOG_FILTER" => Some(" stratum_migrate=trace,sqlx=info ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.env_filter.as_deref(), Some("stratum_migrate=trace,sqlx=info"));
        assert_eq!(config.directive(), "stratum_migrate=trace,sqlx=info");

        let blank = LoggingConfig::from_source(|key| (key == "LOG_FILTER").then(|| "  ".to_string())).unwrap();
        assert_eq!(blank.env_filter, None);
    }

    #[test]
    fn test_rejects_unknown_values() {
        assert!(LoggingConfig::from_source(|key| (key == "LOG_FILTER").then(|| "stratum=loud".to_string())).is_err());
        assert!(LoggingConfig::from_source(|key| (key == "LOG_LEVEL").then(|| "loud".to_string())).is_err());
        assert!(LoggingConfig::from_source(|key| (key == "LOG_FORMAT").then(|| "xml".to_string())).is_err());
    }
}
