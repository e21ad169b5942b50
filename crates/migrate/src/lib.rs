//! # stratum-migrate: schema migrations over sqlx
//!
//! Ordered, ledgered and revertible schema migrations for PostgreSQL, MySQL
//! and SQLite. Applications declare their units in a [`MigrationRegistry`],
//! hand it to a [`MigrationRunner`] together with a connection, and call
//! [`MigrationRunner::apply_pending`] at startup.
//!
//! ```no_run
//! use stratum_migrate::{MigrationConfig, MigrationRegistry, MigrationRunner};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrationConfig::from_env()?;
//! let registry = MigrationRegistry::from_directory(&config.migrations_dir)?;
//! let mut runner = MigrationRunner::connect("sqlite://app.db", registry, config).await?;
//! let summary = runner.apply_pending().await?;
//! println!("applied {} migration(s)", summary.applied_count());
//! runner.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{
    connect, DatabaseBackendType, MySqlSchemaConnection, PostgresSchemaConnection, SchemaConnection,
    SqlDialect, SqliteSchemaConnection,
};
pub use config::{ConfigError, MigrationConfig};
pub use error::*;
pub use migrations::*;
