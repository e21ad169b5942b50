//! SQLite Backend Implementation
//!
//! SQLite has no advisory locks, so the migration lock is a single-row table
//! named after the lock. A connection owns the lock while its holder id sits
//! in that row.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor, SqliteConnection};
use uuid::Uuid;

use super::core::{SchemaConnection, SqlDialect};
use crate::error::{DatabaseError, DatabaseResult};
use crate::migrations::definitions::LedgerEntry;

/// Dedicated SQLite session for a migration run
pub struct SqliteSchemaConnection {
    inner: SqliteConnection,
    holder: String,
}

impl SqliteSchemaConnection {
    /// Connect to a SQLite URL, creating the database file if needed
    pub async fn connect(database_url: &str) -> DatabaseResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let inner = options
            .connect()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect to SQLite: {}", e)))?;
        Ok(Self::from_connection(inner))
    }

    /// Wrap an already established sqlx connection
    pub fn from_connection(inner: SqliteConnection) -> Self {
        Self {
            inner,
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Holder id written into the lock row while this session owns it
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn lock_table_sql(name: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    \
                id INTEGER PRIMARY KEY CHECK (id = 1),\n    \
                holder TEXT NOT NULL,\n    \
                acquired_at TEXT NOT NULL\n\
            )",
            name
        )
    }
}

#[async_trait]
impl SchemaConnection for SqliteSchemaConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&mut self, sql: &str) -> DatabaseResult<u64> {
        let result = (&mut self.inner).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn insert_entry(
        &mut self,
        sql: &str,
        identifier: &str,
        applied_at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(sql)
            .bind(identifier)
            .bind(applied_at)
            .execute(&mut self.inner)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_entry(&mut self, sql: &str, identifier: &str) -> DatabaseResult<u64> {
        let result = sqlx::query(sql).bind(identifier).execute(&mut self.inner).await?;
        Ok(result.rows_affected())
    }

    async fn count_entries(&mut self, sql: &str, identifier: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(sql)
            .bind(identifier)
            .fetch_one(&mut self.inner)
            .await?;
        Ok(count)
    }

    async fn fetch_entries(&mut self, sql: &str) -> DatabaseResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(sql)
            .fetch_all(&mut self.inner)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(identifier, applied_at)| LedgerEntry { identifier, applied_at })
            .collect())
    }

    async fn try_lock(&mut self, name: &str) -> DatabaseResult<bool> {
        self.execute(&Self::lock_table_sql(name)).await?;

        let insert = format!(
            "INSERT OR IGNORE INTO \"{}\" (id, holder, acquired_at) VALUES (1, ?, ?)",
            name
        );
        let result = sqlx::query(&insert)
            .bind(&self.holder)
            .bind(Utc::now())
            .execute(&mut self.inner)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // re-entrant for the session that already holds it
        let holder = sqlx::query_scalar::<_, String>(&format!("SELECT holder FROM \"{}\" WHERE id = 1", name))
            .fetch_optional(&mut self.inner)
            .await?;
        Ok(holder.as_deref() == Some(self.holder.as_str()))
    }

    async fn unlock(&mut self, name: &str) -> DatabaseResult<()> {
        let delete = format!("DELETE FROM \"{}\" WHERE id = 1 AND holder = ?", name);
        let result = sqlx::query(&delete)
            .bind(&self.holder)
            .execute(&mut self.inner)
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!(lock = name, "lock row was not held by this session");
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}
