//! PostgreSQL Backend Implementation
//!
//! Runs DDL inside transactions and serializes runs with a session-level
//! advisory lock keyed on `hashtext(lock_name)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, PgConnection};

use super::core::{SchemaConnection, SqlDialect};
use crate::error::{DatabaseError, DatabaseResult};
use crate::migrations::definitions::LedgerEntry;

/// Dedicated PostgreSQL session for a migration run
pub struct PostgresSchemaConnection {
    inner: PgConnection,
}

impl PostgresSchemaConnection {
    /// Connect to a PostgreSQL database URL
    pub async fn connect(database_url: &str) -> DatabaseResult<Self> {
        let inner = PgConnection::connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;
        Ok(Self::from_connection(inner))
    }

    /// Wrap an already established sqlx connection
    pub fn from_connection(inner: PgConnection) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SchemaConnection for PostgresSchemaConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut self.inner)
            .await?;
        Ok(acquired)
    }

    async fn unlock(&mut self, name: &str) -> DatabaseResult<()> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut self.inner)
            .await?;
        if !released {
            tracing::warn!(lock = name, "advisory lock was not held by this session");
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}
