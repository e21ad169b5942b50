//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the [`Migration`] trait implemented by every migration unit, the
//! ledger record type, per-unit run states and the summaries returned to
//! callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schema_builder::SchemaBuilder;
use crate::error::MigrationError;

/// A named, versioned pair of schema changes
///
/// `apply` and `revert` only *describe* their changes on the given
/// [`SchemaBuilder`]; the runner compiles and executes the description.
/// Identifiers must never change or be reused once a unit has shipped.
pub trait Migration: Send + Sync {
    /// Globally unique, lexically sortable identifier (e.g. `20240929_create_users`)
    fn identifier(&self) -> &str;

    /// Human readable label for logs and status output
    fn description(&self) -> &str {
        self.identifier()
    }

    /// Describe the forward change
    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError>;

    /// Describe the inverse of [`Migration::apply`]
    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError>;

    /// Whether the unit may run inside a transaction.
    ///
    /// Return `false` for statements that refuse to run in one, such as
    /// `CREATE INDEX CONCURRENTLY` on PostgreSQL.
    fn transactional(&self) -> bool {
        true
    }
}

/// Migration status in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration identifier
    pub identifier: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "apply"),
            MigrationDirection::Down => write!(f, "revert"),
        }
    }
}

/// State of a unit within one runner invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running,
    Applied,
    Failed,
}

impl UnitState {
    /// Whether the state ends the unit's lifecycle for this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Applied | UnitState::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        matches!(
            (self, next),
            (UnitState::Pending, UnitState::Running)
                | (UnitState::Pending, UnitState::Applied)
                | (UnitState::Running, UnitState::Applied)
                | (UnitState::Running, UnitState::Failed)
        )
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Registered but not yet applied
    Pending,
    /// Registered and applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
    /// In the ledger but missing from the registry
    Unregistered {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
}

/// One row of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatusEntry {
    pub identifier: String,
    pub description: String,
    pub status: MigrationStatus,
}

impl MigrationStatusEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, MigrationStatus::Pending)
    }
}

/// Result of running pending migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationSummary {
    /// Identifiers applied by this run, in execution order
    pub applied: Vec<String>,
    /// Number of registered migrations that were already applied
    pub skipped: usize,
    /// Wall time of the run, lock wait included
    pub duration: Duration,
}

impl MigrationSummary {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// True when the run applied nothing
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Result of reverting migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertSummary {
    /// Identifiers reverted by this run, most recent first
    pub reverted: Vec<String>,
    pub duration: Duration,
}

impl RevertSummary {
    pub fn reverted_count(&self) -> usize {
        self.reverted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverted.is_empty()
    }
}
