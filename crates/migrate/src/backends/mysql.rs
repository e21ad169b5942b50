//! MySQL Backend Implementation
//!
//! MySQL commits implicitly around DDL, so units run without a wrapping
//! transaction here. Runs are serialized with `GET_LOCK`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, MySqlConnection};

use super::core::{SchemaConnection, SqlDialect};
use crate::error::{DatabaseError, DatabaseResult};
use crate::migrations::definitions::LedgerEntry;

/// Dedicated MySQL session for a migration run
pub struct MySqlSchemaConnection {
    inner: MySqlConnection,
}

impl MySqlSchemaConnection {
    /// Connect to a MySQL database URL
    pub async fn connect(database_url: &str) -> DatabaseResult<Self> {
        let inner = MySqlConnection::connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect to MySQL: {}", e)))?;
        Ok(Self::from_connection(inner))
    }

    /// Wrap an already established sqlx connection
    pub fn from_connection(inner: MySqlConnection) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SchemaConnection for MySqlSchemaConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
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
        // 1 = acquired, 0 = held elsewhere, NULL = error inside GET_LOCK
        let acquired = sqlx::query_scalar::<_, Option<i64>>("SELECT GET_LOCK(?, 0)")
            .bind(name)
            .fetch_one(&mut self.inner)
            .await?;
        Ok(acquired == Some(1))
    }

    async fn unlock(&mut self, name: &str) -> DatabaseResult<()> {
        let released = sqlx::query_scalar::<_, Option<i64>>("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .fetch_one(&mut self.inner)
            .await?;
        if released != Some(1) {
            tracing::warn!(lock = name, "named lock was not held by this session");
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}
