//! Error types for the migration engine
//!
//! One error enum per concern: the database layer, schema compilation,
//! individual migration units, the ledger, the registry and the runner.
//! Every runner error that concerns a specific migration carries its
//! identifier so operators know which unit to fix.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backends::DatabaseBackendType;
use crate::migrations::definitions::MigrationDirection;

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Result type alias for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised by a backend connection
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Error reported by the sqlx driver
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Connection could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// The database URL does not map to a supported backend
    #[error("unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

/// Errors raised while compiling schema operations into statements
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The target backend cannot express the requested operation
    #[error("{backend} does not support {operation}")]
    UnsupportedOperation {
        backend: DatabaseBackendType,
        operation: String,
    },

    /// The description itself is malformed
    #[error("invalid schema definition: {0}")]
    InvalidDefinition(String),
}

/// Errors produced by a migration unit's apply or revert step
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Statements ran but the ledger could not record the outcome
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The unit has no revert step
    #[error("migration cannot be reverted: {0}")]
    Irreversible(String),

    /// Failure reported by the unit itself
    #[error("{0}")]
    Failed(String),
}

impl MigrationError {
    /// Shorthand for a unit-level failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        MigrationError::Failed(message.into())
    }
}

/// Errors raised by the migration ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Ledger table could not be created
    #[error("failed to initialize migration ledger: {0}")]
    InitFailed(#[source] DatabaseError),

    /// Ledger could not be read
    #[error("failed to read migration ledger: {0}")]
    ReadFailed(#[source] DatabaseError),

    /// Ledger table name cannot be used as an identifier
    #[error("invalid migration ledger table: {0}")]
    InvalidTable(#[source] SchemaError),

    /// Ledger entry could not be written or removed
    #[error("failed to update migration ledger for {identifier}: {source}")]
    WriteFailed {
        identifier: String,
        #[source]
        source: DatabaseError,
    },
}

/// Errors raised while building a migration registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two units share an identifier
    #[error("duplicate migration identifier: {0}")]
    DuplicateIdentifier(String),

    /// A migration file or directory could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration file does not follow the expected layout
    #[error("malformed migration file {path}: {reason}")]
    MalformedFile { path: PathBuf, reason: String },
}

/// Errors surfaced by the migration runner
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Another run holds the migration lock
    #[error(
        "timed out after {waited:?} waiting for migration lock '{lock}'{}",
        stale_lock_hint(*backend, lock)
    )]
    LockTimeout {
        lock: String,
        backend: DatabaseBackendType,
        waited: Duration,
    },

    /// Acquiring or releasing the migration lock failed
    #[error("migration lock '{lock}' failed: {source}")]
    Lock {
        lock: String,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A unit failed cleanly: nothing it did was kept
    #[error("migration {identifier} failed during {direction}: {source}")]
    MigrationFailed {
        identifier: String,
        direction: MigrationDirection,
        #[source]
        source: MigrationError,
    },

    /// A unit failed after some of its statements were already executed
    /// without a transaction to undo them
    #[error(
        "migration {identifier} partially executed during {direction} \
         ({executed} statement(s) ran before the failure); manual repair required: {source}"
    )]
    PartialApply {
        identifier: String,
        direction: MigrationDirection,
        executed: usize,
        #[source]
        source: MigrationError,
    },

    /// Ledger holds identifiers the registry does not know about
    #[error("migration ledger contains unregistered migrations: {}", unknown.join(", "))]
    InconsistentLedger { unknown: Vec<String> },

    /// An applied migration cannot be reverted because it is not registered
    #[error("applied migration {0} is not registered and cannot be reverted")]
    UnknownMigration(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// SQLite locks are table rows that outlive a crashed holder
fn stale_lock_hint(backend: DatabaseBackendType, lock: &str) -> String {
    match backend {
        DatabaseBackendType::SQLite => format!(
            "; the lock is the row in table \"{lock}\", delete it if no other run is active \
             (DELETE FROM \"{lock}\")"
        ),
        _ => String::new(),
    }
}

impl RunnerError {
    /// Identifier of the migration the error concerns, if any
    pub fn identifier(&self) -> Option<&str> {
        match self {
            RunnerError::MigrationFailed { identifier, .. }
            | RunnerError::PartialApply { identifier, .. }
            | RunnerError::UnknownMigration(identifier) => Some(identifier),
            RunnerError::Ledger(LedgerError::WriteFailed { identifier, .. }) => Some(identifier),
            _ => None,
        }
    }

    /// Whether the database may hold schema changes not reflected in the ledger
    pub fn is_partial(&self) -> bool {
        matches!(self, RunnerError::PartialApply { .. })
    }
}
