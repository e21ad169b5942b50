//! Migration Rollback - Handles reverting applied migrations
//!
//! Units are reverted most recent first, with the same lock, transaction
//! and halt-on-failure rules as forward runs.

use std::time::Instant;

use super::definitions::{MigrationDirection, RevertSummary};
use super::runner::{run_unit, MigrationRunner};
use crate::error::{RunnerError, RunnerResult};

impl MigrationRunner {
    /// Revert the last `steps` applied migrations
    pub async fn revert(&mut self, steps: usize) -> RunnerResult<RevertSummary> {
        self.revert_with_lock(Some(steps)).await
    }

    /// Revert every applied migration
    pub async fn revert_all(&mut self) -> RunnerResult<RevertSummary> {
        self.revert_with_lock(None).await
    }

    async fn revert_with_lock(&mut self, steps: Option<usize>) -> RunnerResult<RevertSummary> {
        let start_time = Instant::now();

        self.acquire_lock().await?;
        let result = self.revert_locked(steps).await;
        let released = self.release_lock().await;

        let mut summary = result?;
        released?;
        summary.duration = start_time.elapsed();

        tracing::info!(
            reverted = summary.reverted_count(),
            elapsed_ms = summary.duration.as_millis() as u64,
            "revert complete"
        );
        Ok(summary)
    }

    async fn revert_locked(&mut self, steps: Option<usize>) -> RunnerResult<RevertSummary> {
        self.ledger.ensure_initialized(self.connection.as_mut()).await?;
        let applied = self.applied_in_order().await?;

        let count = steps.unwrap_or(applied.len()).min(applied.len());
        let targets: Vec<String> = applied
            .iter()
            .rev()
            .take(count)
            .map(|e| e.identifier.clone())
            .collect();

        // refuse up front rather than stopping halfway through
        if let Some(unknown) = targets.iter().find(|id| !self.registry.contains(id)) {
            return Err(RunnerError::UnknownMigration(unknown.clone()));
        }

        let mut summary = RevertSummary::default();
        for identifier in targets {
            let migration = self
                .registry
                .get(&identifier)
                .ok_or_else(|| RunnerError::UnknownMigration(identifier.clone()))?;

            tracing::info!(
                identifier = %identifier,
                description = migration.description(),
                "reverting migration"
            );
            run_unit(
                self.connection.as_mut(),
                &self.ledger,
                migration,
                MigrationDirection::Down,
            )
            .await?;
            summary.reverted.push(identifier);
        }

        Ok(summary)
    }
}
