//! Migration Runner - Executes migrations against the database
//!
//! The runner owns one connection for its whole lifetime. Every mutating run
//! takes the cross-process migration lock, consults the ledger, then executes
//! units one at a time in registry order, halting on the first failure.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{SubsecRound, Utc};

use super::definitions::{
    LedgerEntry, Migration, MigrationDirection, MigrationStatus, MigrationStatusEntry,
    MigrationSummary, UnitState,
};
use super::ledger::MigrationLedger;
use super::registry::MigrationRegistry;
use super::schema_builder::SchemaBuilder;
use crate::backends::{self, SchemaConnection, SqlDialect};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, RunnerError, RunnerResult};

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    pub(super) registry: MigrationRegistry,
    pub(super) connection: Box<dyn SchemaConnection>,
    pub(super) ledger: MigrationLedger,
    config: MigrationConfig,
}

impl MigrationRunner {
    /// Create a runner with the default configuration
    pub fn new(connection: Box<dyn SchemaConnection>, registry: MigrationRegistry) -> Self {
        Self::with_config(connection, registry, MigrationConfig::default())
    }

    pub fn with_config(
        connection: Box<dyn SchemaConnection>,
        registry: MigrationRegistry,
        config: MigrationConfig,
    ) -> Self {
        let ledger = MigrationLedger::new(config.migrations_table.clone());
        Self {
            registry,
            connection,
            ledger,
            config,
        }
    }

    /// Create a new migration runner from database URL
    pub async fn connect(
        database_url: &str,
        registry: MigrationRegistry,
        config: MigrationConfig,
    ) -> RunnerResult<Self> {
        let connection = backends::connect(database_url).await?;
        Ok(Self::with_config(connection, registry, config))
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn dialect(&self) -> SqlDialect {
        self.connection.dialect()
    }

    /// The runner's connection, for work outside of migration runs
    pub fn connection(&mut self) -> &mut dyn SchemaConnection {
        self.connection.as_mut()
    }

    /// Close the underlying connection
    pub async fn close(self) -> RunnerResult<()> {
        self.connection.close().await?;
        Ok(())
    }

    /// Run all pending migrations
    pub async fn apply_pending(&mut self) -> RunnerResult<MigrationSummary> {
        let start_time = Instant::now();

        self.acquire_lock().await?;
        let result = self.apply_pending_locked().await;
        let released = self.release_lock().await;

        let mut summary = result?;
        released?;
        summary.duration = start_time.elapsed();

        tracing::info!(
            applied = summary.applied_count(),
            skipped = summary.skipped,
            elapsed_ms = summary.duration.as_millis() as u64,
            "migration run complete"
        );
        Ok(summary)
    }

    async fn apply_pending_locked(&mut self) -> RunnerResult<MigrationSummary> {
        self.ledger.ensure_initialized(self.connection.as_mut()).await?;

        let applied = self.applied_in_order().await?;
        self.enforce_consistency(&applied)?;

        let applied_ids: HashSet<&str> = applied.iter().map(|e| e.identifier.as_str()).collect();
        self.warn_out_of_order(&applied_ids);

        let mut summary = MigrationSummary::default();
        for migration in self.registry.iter() {
            if applied_ids.contains(migration.identifier()) {
                tracing::trace!(identifier = migration.identifier(), "already applied, skipping");
                summary.skipped += 1;
                continue;
            }

            tracing::info!(
                identifier = migration.identifier(),
                description = migration.description(),
                "applying migration"
            );
            run_unit(
                self.connection.as_mut(),
                &self.ledger,
                migration,
                MigrationDirection::Up,
            )
            .await?;
            summary.applied.push(migration.identifier().to_string());
        }

        Ok(summary)
    }

    /// Applied ledger entries, oldest first
    pub async fn list_applied(&mut self) -> RunnerResult<Vec<LedgerEntry>> {
        self.ledger.ensure_initialized(self.connection.as_mut()).await?;
        self.applied_in_order().await
    }

    /// Identifiers of registered units not yet applied, in registry order
    pub async fn list_pending(&mut self) -> RunnerResult<Vec<String>> {
        let applied: HashSet<String> = self
            .list_applied()
            .await?
            .into_iter()
            .map(|e| e.identifier)
            .collect();

        Ok(self
            .registry
            .iter()
            .map(|m| m.identifier())
            .filter(|id| !applied.contains(*id))
            .map(str::to_string)
            .collect())
    }

    /// Every registered unit with its state, followed by unregistered ledger entries
    pub async fn status(&mut self) -> RunnerResult<Vec<MigrationStatusEntry>> {
        let applied = self.list_applied().await?;
        let applied_at: HashMap<&str, _> = applied
            .iter()
            .map(|e| (e.identifier.as_str(), e.applied_at))
            .collect();

        let mut entries: Vec<MigrationStatusEntry> = self
            .registry
            .iter()
            .map(|migration| MigrationStatusEntry {
                identifier: migration.identifier().to_string(),
                description: migration.description().to_string(),
                status: match applied_at.get(migration.identifier()) {
                    Some(at) => MigrationStatus::Applied { applied_at: *at },
                    None => MigrationStatus::Pending,
                },
            })
            .collect();

        entries.extend(
            applied
                .iter()
                .filter(|e| !self.registry.contains(&e.identifier))
                .map(|e| MigrationStatusEntry {
                    identifier: e.identifier.clone(),
                    description: e.identifier.clone(),
                    status: MigrationStatus::Unregistered { applied_at: e.applied_at },
                }),
        );

        Ok(entries)
    }

    /// Check that every ledger entry belongs to a registered unit
    pub async fn check_consistency(&mut self) -> RunnerResult<()> {
        let applied = self.list_applied().await?;
        self.enforce_consistency(&applied)
    }

    /// Ledger entries in apply order; timestamp ties fall back to registry order
    pub(super) async fn applied_in_order(&mut self) -> RunnerResult<Vec<LedgerEntry>> {
        let mut entries = self.ledger.list_applied(self.connection.as_mut()).await?;
        let registry = &self.registry;
        entries.sort_by_key(|e| (e.applied_at, registry.position(&e.identifier).unwrap_or(usize::MAX)));
        Ok(entries)
    }

    fn enforce_consistency(&self, applied: &[LedgerEntry]) -> RunnerResult<()> {
        let unknown: Vec<String> = applied
            .iter()
            .filter(|e| !self.registry.contains(&e.identifier))
            .map(|e| e.identifier.clone())
            .collect();

        if unknown.is_empty() {
            return Ok(());
        }
        if self.config.allow_unknown_applied {
            tracing::warn!(unknown = ?unknown, "ledger contains migrations that are not registered");
            return Ok(());
        }
        Err(RunnerError::InconsistentLedger { unknown })
    }

    /// Pending units registered ahead of applied ones break the ordering contract
    fn warn_out_of_order(&self, applied: &HashSet<&str>) {
        let last_applied = self
            .registry
            .iter()
            .enumerate()
            .filter(|(_, m)| applied.contains(m.identifier()))
            .map(|(i, _)| i)
            .last();

        if let Some(last_applied) = last_applied {
            for migration in self.registry.iter().take(last_applied) {
                if !applied.contains(migration.identifier()) {
                    tracing::warn!(
                        identifier = migration.identifier(),
                        "pending migration is registered before an applied one; \
                         it will run after migrations that were meant to follow it"
                    );
                }
            }
        }
    }

    pub(super) async fn acquire_lock(&mut self) -> RunnerResult<()> {
        let lock = self.config.lock_name();
        let started = Instant::now();

        loop {
            let acquired = self
                .connection
                .try_lock(&lock)
                .await
                .map_err(|source| RunnerError::Lock {
                    lock: lock.clone(),
                    source,
                })?;

            if acquired {
                tracing::debug!(lock = %lock, waited_ms = started.elapsed().as_millis() as u64, "acquired migration lock");
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                tracing::error!(lock = %lock, "timed out waiting for migration lock");
                return Err(RunnerError::LockTimeout {
                    lock,
                    backend: self.dialect().backend_type(),
                    waited,
                });
            }

            tracing::debug!(lock = %lock, "migration lock is held by another run, waiting");
            let remaining = self.config.lock_timeout - waited;
            tokio::time::sleep(self.config.lock_poll_interval.min(remaining)).await;
        }
    }

    pub(super) async fn release_lock(&mut self) -> RunnerResult<()> {
        let lock = self.config.lock_name();
        self.connection
            .unlock(&lock)
            .await
            .map_err(|source| RunnerError::Lock {
                lock: lock.clone(),
                source,
            })?;
        tracing::debug!(lock = %lock, "released migration lock");
        Ok(())
    }
}

/// Describe, compile and execute one unit in `direction`, updating the ledger
pub(super) async fn run_unit(
    connection: &mut dyn SchemaConnection,
    ledger: &MigrationLedger,
    migration: &dyn Migration,
    direction: MigrationDirection,
) -> RunnerResult<()> {
    let identifier = migration.identifier();
    let mut state = UnitState::Pending;
    transition(identifier, direction, &mut state, UnitState::Running);

    let mut schema = SchemaBuilder::new(connection.dialect());
    let described = match direction {
        MigrationDirection::Up => migration.apply(&mut schema),
        MigrationDirection::Down => migration.revert(&mut schema),
    };
    let statements = match described.and_then(|_| schema.build().map_err(MigrationError::from)) {
        Ok(statements) => statements,
        Err(source) => {
            transition(identifier, direction, &mut state, UnitState::Failed);
            return Err(RunnerError::MigrationFailed {
                identifier: identifier.to_string(),
                direction,
                source,
            });
        }
    };

    let transactional = connection.dialect().supports_transactional_ddl() && migration.transactional();
    let outcome = if transactional {
        execute_in_transaction(connection, ledger, identifier, direction, &statements).await
    } else {
        execute_direct(connection, ledger, identifier, direction, &statements).await
    };

    match outcome {
        Ok(()) => {
            transition(identifier, direction, &mut state, UnitState::Applied);
            Ok(())
        }
        Err(e) => {
            transition(identifier, direction, &mut state, UnitState::Failed);
            tracing::error!(identifier, %direction, error = %e, "migration failed");
            Err(e)
        }
    }
}

async fn execute_in_transaction(
    connection: &mut dyn SchemaConnection,
    ledger: &MigrationLedger,
    identifier: &str,
    direction: MigrationDirection,
    statements: &[String],
) -> RunnerResult<()> {
    let failed = |source: MigrationError| RunnerError::MigrationFailed {
        identifier: identifier.to_string(),
        direction,
        source,
    };

    connection.begin().await.map_err(|e| failed(e.into()))?;

    for sql in statements {
        tracing::trace!(identifier, sql = %sql, "executing statement");
        if let Err(e) = connection.execute(sql).await {
            rollback_quietly(connection, identifier).await;
            return Err(failed(e.into()));
        }
    }

    if let Err(e) = write_ledger(connection, ledger, identifier, direction).await {
        rollback_quietly(connection, identifier).await;
        return Err(e.into());
    }

    if let Err(e) = connection.commit().await {
        rollback_quietly(connection, identifier).await;
        return Err(failed(e.into()));
    }
    Ok(())
}

async fn execute_direct(
    connection: &mut dyn SchemaConnection,
    ledger: &MigrationLedger,
    identifier: &str,
    direction: MigrationDirection,
    statements: &[String],
) -> RunnerResult<()> {
    for (executed, sql) in statements.iter().enumerate() {
        tracing::trace!(identifier, sql = %sql, "executing statement");
        if let Err(e) = connection.execute(sql).await {
            let source = MigrationError::Database(e);
            if executed == 0 {
                return Err(RunnerError::MigrationFailed {
                    identifier: identifier.to_string(),
                    direction,
                    source,
                });
            }
            return Err(RunnerError::PartialApply {
                identifier: identifier.to_string(),
                direction,
                executed,
                source,
            });
        }
    }

    match write_ledger(connection, ledger, identifier, direction).await {
        Ok(()) => Ok(()),
        Err(e) if statements.is_empty() => Err(e.into()),
        Err(e) => {
            tracing::error!(identifier, %direction, "statements executed but the ledger could not be updated");
            Err(RunnerError::PartialApply {
                identifier: identifier.to_string(),
                direction,
                executed: statements.len(),
                source: MigrationError::Ledger(e),
            })
        }
    }
}

async fn write_ledger(
    connection: &mut dyn SchemaConnection,
    ledger: &MigrationLedger,
    identifier: &str,
    direction: MigrationDirection,
) -> Result<(), crate::error::LedgerError> {
    match direction {
        MigrationDirection::Up => {
            ledger
                .record_applied(connection, identifier, Utc::now().trunc_subsecs(6))
                .await
        }
        MigrationDirection::Down => ledger.remove_applied(connection, identifier).await,
    }
}

async fn rollback_quietly(connection: &mut dyn SchemaConnection, identifier: &str) {
    if let Err(e) = connection.rollback().await {
        tracing::warn!(identifier, error = %e, "rollback after failure did not complete");
    }
}

fn transition(identifier: &str, direction: MigrationDirection, state: &mut UnitState, next: UnitState) {
    debug_assert!(state.can_transition_to(next), "illegal transition {:?} -> {:?}", state, next);
    tracing::debug!(identifier, %direction, from = ?state, to = ?next, "migration state change");
    *state = next;
}
