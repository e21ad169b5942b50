//! Migration Ledger - persistent record of applied migrations
//!
//! The ledger is a reserved table inside the migrated database holding one
//! row per applied unit. A row exists only if that unit's apply step
//! succeeded on this database.

use chrono::{DateTime, Utc};

use super::definitions::LedgerEntry;
use super::schema_builder::SchemaBuilder;
use crate::backends::{SchemaConnection, SqlDialect};
use crate::error::LedgerError;

/// Ledger stored in `table`
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
}

impl MigrationLedger {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self, dialect: SqlDialect) -> Result<String, LedgerError> {
        let mut schema = SchemaBuilder::new(dialect);
        schema.create_table_if_not_exists(&self.table, |table| {
            table.string("identifier", Some(255)).primary_key();
            table.timestamp("applied_at").not_null();
        });

        let statements = schema.build().map_err(LedgerError::InvalidTable)?;
        Ok(statements.concat())
    }

    pub fn insert_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "INSERT INTO {} (identifier, applied_at) VALUES ({}, {})",
            dialect.quote(&self.table),
            dialect.parameter_placeholder(0),
            dialect.parameter_placeholder(1)
        )
    }

    pub fn delete_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "DELETE FROM {} WHERE identifier = {}",
            dialect.quote(&self.table),
            dialect.parameter_placeholder(0)
        )
    }

    pub fn count_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE identifier = {}",
            dialect.quote(&self.table),
            dialect.parameter_placeholder(0)
        )
    }

    pub fn select_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "SELECT identifier, applied_at FROM {} ORDER BY applied_at ASC, identifier ASC",
            dialect.quote(&self.table)
        )
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure_initialized(&self, connection: &mut dyn SchemaConnection) -> Result<(), LedgerError> {
        let sql = self.create_table_sql(connection.dialect())?;
        connection
            .execute(&sql)
            .await
            .map_err(LedgerError::InitFailed)?;
        tracing::trace!(table = %self.table, "migration ledger ready");
        Ok(())
    }

    pub async fn is_applied(
        &self,
        connection: &mut dyn SchemaConnection,
        identifier: &str,
    ) -> Result<bool, LedgerError> {
        let sql = self.count_sql(connection.dialect());
        let count = connection
            .count_entries(&sql, identifier)
            .await
            .map_err(LedgerError::ReadFailed)?;
        Ok(count > 0)
    }

    /// Record `identifier` as applied at `applied_at`
    pub async fn record_applied(
        &self,
        connection: &mut dyn SchemaConnection,
        identifier: &str,
        applied_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let sql = self.insert_sql(connection.dialect());
        connection
            .insert_entry(&sql, identifier, applied_at)
            .await
            .map_err(|source| LedgerError::WriteFailed {
                identifier: identifier.to_string(),
                source,
            })?;
        Ok(())
    }

    pub async fn remove_applied(
        &self,
        connection: &mut dyn SchemaConnection,
        identifier: &str,
    ) -> Result<(), LedgerError> {
        let sql = self.delete_sql(connection.dialect());
        let removed = connection
            .delete_entry(&sql, identifier)
            .await
            .map_err(|source| LedgerError::WriteFailed {
                identifier: identifier.to_string(),
                source,
            })?;
        if removed == 0 {
            tracing::warn!(identifier, "no ledger entry to remove");
        }
        Ok(())
    }

    /// Applied entries, oldest first
    pub async fn list_applied(&self, connection: &mut dyn SchemaConnection) -> Result<Vec<LedgerEntry>, LedgerError> {
        let sql = self.select_sql(connection.dialect());
        let mut entries = connection
            .fetch_entries(&sql)
            .await
            .map_err(LedgerError::ReadFailed)?;

        // text timestamps on SQLite do not always sort chronologically
        entries.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let ledger = MigrationLedger::new("stratum_migrations");

        let pg = ledger.create_table_sql(SqlDialect::PostgreSQL).unwrap();
        assert!(pg.starts_with("CREATE TABLE IF NOT EXISTS \"stratum_migrations\""));
        assert!(pg.contains("\"identifier\" VARCHAR(255) NOT NULL PRIMARY KEY"));
        assert!(pg.contains("\"applied_at\" TIMESTAMPTZ NOT NULL"));

        let mysql = ledger.create_table_sql(SqlDialect::MySQL).unwrap();
        assert!(mysql.contains("`applied_at` DATETIME(6) NOT NULL"));
    }

    #[test]
    fn test_query_sql_per_dialect() {
        let ledger = MigrationLedger::new("ledger");

        assert_eq!(
            ledger.insert_sql(SqlDialect::PostgreSQL),
            "INSERT INTO \"ledger\" (identifier, applied_at) VALUES ($1, $2)"
        );
        assert_eq!(
            ledger.delete_sql(SqlDialect::MySQL),
            "DELETE FROM `ledger` WHERE identifier = ?"
        );
        assert_eq!(
            ledger.count_sql(SqlDialect::SQLite),
            "SELECT COUNT(*) FROM \"ledger\" WHERE identifier = ?"
        );
        assert!(ledger
            .select_sql(SqlDialect::SQLite)
            .ends_with("ORDER BY applied_at ASC, identifier ASC"));
    }

    #[test]
    fn test_invalid_table_name() {
        let ledger = MigrationLedger::new("bad\"table");
        assert!(matches!(
            ledger.create_table_sql(SqlDialect::PostgreSQL),
            Err(LedgerError::InvalidTable(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_round_trip_on_sqlite() {
        use chrono::SubsecRound;

        use crate::backends::SqliteSchemaConnection;

        let mut connection = SqliteSchemaConnection::connect("sqlite::memory:").await.unwrap();
        let ledger = MigrationLedger::new("stratum_migrations");
        ledger.ensure_initialized(&mut connection).await.unwrap();
        ledger.ensure_initialized(&mut connection).await.unwrap();

        let id = "20240929_000001_create_users";
        assert!(!ledger.is_applied(&mut connection, id).await.unwrap());

        let applied_at = Utc::now().trunc_subsecs(6);
        ledger.record_applied(&mut connection, id, applied_at).await.unwrap();
        assert!(ledger.is_applied(&mut connection, id).await.unwrap());
        assert!(!ledger.is_applied(&mut connection, "20240929_000002_other").await.unwrap());
        assert_eq!(
            ledger.list_applied(&mut connection).await.unwrap(),
            vec![LedgerEntry { identifier: id.to_string(), applied_at }]
        );

        // primary key rejects a second record
        assert!(matches!(
            ledger.record_applied(&mut connection, id, applied_at).await,
            Err(LedgerError::WriteFailed { .. })
        ));

        ledger.remove_applied(&mut connection, id).await.unwrap();
        assert!(!ledger.is_applied(&mut connection, id).await.unwrap());
        assert!(ledger.list_applied(&mut connection).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_applied_before_initialization_fails_to_read() {
        use crate::backends::SqliteSchemaConnection;

        let mut connection = SqliteSchemaConnection::connect("sqlite::memory:").await.unwrap();
        let ledger = MigrationLedger::new("stratum_migrations");
        assert!(matches!(
            ledger.is_applied(&mut connection, "20240929_000001_create_users").await,
            Err(LedgerError::ReadFailed(_))
        ));
    }
}
