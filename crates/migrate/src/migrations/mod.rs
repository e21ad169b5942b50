//! Migration System
//!
//! Schema description ([`schema_builder`]), migration units
//! ([`definitions`], [`manager`]), their ordered [`registry`], the applied
//! [`ledger`] and the [`runner`] tying them together.

pub mod definitions;
pub mod ledger;
pub mod manager;
pub mod registry;
pub mod rollback;
pub mod runner;
pub mod schema_builder;

pub use definitions::*;
pub use ledger::MigrationLedger;
pub use manager::{split_sql_statements, MigrationManager, SqlMigration};
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
pub use schema_builder::*;
