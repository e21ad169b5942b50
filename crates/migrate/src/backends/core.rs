//! Core Database Backend Traits
//!
//! The runner talks to the database only through [`SchemaConnection`], one
//! exclusively owned session per run. [`SqlDialect`] captures everything the
//! schema builder and ledger need to know about the backend's SQL flavor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseResult;
use crate::migrations::definitions::LedgerEntry;

use super::DatabaseBackendType;

/// A single live database session used for one migration run
#[async_trait]
pub trait SchemaConnection: Send {
    /// SQL dialect spoken by this connection
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement without parameters, returning affected rows
    async fn execute(&mut self, sql: &str) -> DatabaseResult<u64>;

    /// Insert a ledger row; `sql` takes the identifier then the timestamp
    async fn insert_entry(
        &mut self,
        sql: &str,
        identifier: &str,
        applied_at: DateTime<Utc>,
    ) -> DatabaseResult<u64>;

    /// Delete a ledger row; `sql` takes the identifier
    async fn delete_entry(&mut self, sql: &str, identifier: &str) -> DatabaseResult<u64>;

    /// Count ledger rows matching an identifier
    async fn count_entries(&mut self, sql: &str, identifier: &str) -> DatabaseResult<i64>;

    /// Fetch `(identifier, applied_at)` rows
    async fn fetch_entries(&mut self, sql: &str) -> DatabaseResult<Vec<LedgerEntry>>;

    /// Try once to take the named migration lock
    async fn try_lock(&mut self, name: &str) -> DatabaseResult<bool>;

    /// Release the named migration lock
    async fn unlock(&mut self, name: &str) -> DatabaseResult<()>;

    /// Begin a transaction on this session
    async fn begin(&mut self) -> DatabaseResult<()> {
        let sql = self.dialect().begin_transaction_sql();
        self.execute(sql).await.map(|_| ())
    }

    /// Commit the open transaction
    async fn commit(&mut self) -> DatabaseResult<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    /// Roll back the open transaction
    async fn rollback(&mut self) -> DatabaseResult<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Close the session
    async fn close(self: Box<Self>) -> DatabaseResult<()>;
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Backend this dialect belongs to
    pub fn backend_type(&self) -> DatabaseBackendType {
        match self {
            SqlDialect::PostgreSQL => DatabaseBackendType::PostgreSQL,
            SqlDialect::MySQL => DatabaseBackendType::MySQL,
            SqlDialect::SQLite => DatabaseBackendType::SQLite,
        }
    }

    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    /// Quote an identifier. Callers validate identifiers before quoting.
    pub fn quote(&self, identifier: &str) -> String {
        let q = self.identifier_quote();
        format!("{q}{identifier}{q}")
    }

    /// Whether schema statements can be rolled back inside a transaction
    pub fn supports_transactional_ddl(&self) -> bool {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => true,
            // MySQL commits implicitly around every DDL statement
            SqlDialect::MySQL => false,
        }
    }

    /// Whether constraints can be added to or dropped from existing tables
    pub fn supports_alter_constraints(&self) -> bool {
        !matches!(self, SqlDialect::SQLite)
    }

    /// Statement opening a transaction
    pub fn begin_transaction_sql(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "BEGIN",
            SqlDialect::MySQL => "START TRANSACTION",
            // take the write lock up front so concurrent writers wait instead of deadlocking
            SqlDialect::SQLite => "BEGIN IMMEDIATE",
        }
    }

    /// Default expression for "now" on a timestamp column
    pub fn current_timestamp(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => "CURRENT_TIMESTAMP",
            SqlDialect::MySQL => "CURRENT_TIMESTAMP(6)",
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.backend_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(1), "$2");
        assert_eq!(SqlDialect::MySQL.parameter_placeholder(3), "?");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(0), "?");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(SqlDialect::PostgreSQL.quote("users"), "\"users\"");
        assert_eq!(SqlDialect::MySQL.quote("users"), "`users`");
    }

    #[test]
    fn test_capabilities() {
        assert!(SqlDialect::PostgreSQL.supports_transactional_ddl());
        assert!(SqlDialect::SQLite.supports_transactional_ddl());
        assert!(!SqlDialect::MySQL.supports_transactional_ddl());
        assert!(!SqlDialect::SQLite.supports_alter_constraints());
        assert_eq!(SqlDialect::SQLite.begin_transaction_sql(), "BEGIN IMMEDIATE");
    }
}
