//! Database Backend Abstractions
//!
//! Supports PostgreSQL, MySQL and SQLite through the common
//! [`SchemaConnection`] trait.

pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use self::core::*;
pub use mysql::MySqlSchemaConnection;
pub use postgres::PostgresSchemaConnection;
pub use sqlite::SqliteSchemaConnection;

use crate::error::{DatabaseError, DatabaseResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> DatabaseResult<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| DatabaseError::UnsupportedUrl(url.to_string()))?;

        scheme
            .parse()
            .map_err(|_| DatabaseError::UnsupportedUrl(url.to_string()))
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Open a dedicated connection for the backend named by `database_url`
pub async fn connect(database_url: &str) -> DatabaseResult<Box<dyn SchemaConnection>> {
    let connection: Box<dyn SchemaConnection> = match DatabaseBackendType::from_url(database_url)? {
        DatabaseBackendType::PostgreSQL => {
            Box::new(PostgresSchemaConnection::connect(database_url).await?)
        }
        DatabaseBackendType::MySQL => Box::new(MySqlSchemaConnection::connect(database_url).await?),
        DatabaseBackendType::SQLite => Box::new(SqliteSchemaConnection::connect(database_url).await?),
    };

    tracing::debug!(
        backend = %connection.dialect(),
        url = %redact_url(database_url),
        "opened migration connection"
    );
    Ok(connection)
}

/// Database URL with any password replaced, safe for logs and CLI output
pub fn redact_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // cannot fail for URLs that already carry a password
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => database_url
            .split_once(':')
            .map(|(scheme, _)| format!("{}:<unparseable>", scheme))
            .unwrap_or_else(|| "<unparseable>".to_string()),
    }
}
