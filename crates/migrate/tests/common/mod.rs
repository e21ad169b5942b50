#![allow(dead_code)]

use std::time::Duration;

use sqlx::{Connection, SqliteConnection};
use stratum_migrate::{
    ColumnType, ForeignKeyAction, ForeignKeyConstraint, MigrationConfig, MigrationError,
    MigrationRegistry, MigrationRunner, SchemaBuilder, SchemaConnection,
};
use tempfile::TempDir;

pub struct CreateUsersTable;

impl CreateUsersTable {
    pub const ID: &'static str = "20240929_000001_create_users";
    pub const TABLE: &'static str = "users";
}

impl stratum_migrate::Migration for CreateUsersTable {
    fn identifier(&self) -> &str {
        Self::ID
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.create_table(Self::TABLE, |table| {
            table.id("id");
            table.string("name", Some(255)).not_null();
            table.string("username", Some(255)).not_null().unique();
        });
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_table(Self::TABLE);
        Ok(())
    }
}

pub struct CreateAcronymsTable;

impl CreateAcronymsTable {
    pub const ID: &'static str = "20240929_000002_create_acronyms";
    pub const TABLE: &'static str = "acronyms";
}

impl stratum_migrate::Migration for CreateAcronymsTable {
    fn identifier(&self) -> &str {
        Self::ID
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.create_table(Self::TABLE, |table| {
            table.id("id");
            table.string("short", Some(64)).not_null();
            table.string("long", Some(255)).not_null();
            table.integer("user_id").not_null();
            table.constraint(
                ForeignKeyConstraint::new(&["user_id"], CreateUsersTable::TABLE, &["id"])
                    .on_delete(ForeignKeyAction::Cascade),
            );
        });
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_table(Self::TABLE);
        Ok(())
    }
}

pub struct AddTwitterFieldToUsers;

impl AddTwitterFieldToUsers {
    pub const ID: &'static str = "20241001_000001_add_twitter_to_users";
    pub const COLUMN: &'static str = "twitter_url";
}

impl stratum_migrate::Migration for AddTwitterFieldToUsers {
    fn identifier(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "add twitter url to users"
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.add_column(CreateUsersTable::TABLE, Self::COLUMN, ColumnType::String(255));
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_column(CreateUsersTable::TABLE, Self::COLUMN);
        Ok(())
    }
}

/// Creates a table, then runs a statement that fails
pub struct BrokenMigration {
    pub id: &'static str,
    pub transactional: bool,
}

impl BrokenMigration {
    pub const TABLE: &'static str = "audit_log";
}

impl stratum_migrate::Migration for BrokenMigration {
    fn identifier(&self) -> &str {
        self.id
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.create_table(Self::TABLE, |table| {
            table.id("id");
            table.text("entry");
        });
        schema.raw("INSERT INTO table_that_does_not_exist (id) VALUES (1)");
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_table_if_exists(Self::TABLE);
        Ok(())
    }

    fn transactional(&self) -> bool {
        self.transactional
    }
}

/// Single-statement unit that runs outside a transaction
pub struct CreateScratchTable;

impl CreateScratchTable {
    pub const ID: &'static str = "20241003_000001_create_scratch";
    pub const TABLE: &'static str = "scratch";
}

impl stratum_migrate::Migration for CreateScratchTable {
    fn identifier(&self) -> &str {
        Self::ID
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.create_table(Self::TABLE, |table| {
            table.id("id");
        });
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_table(Self::TABLE);
        Ok(())
    }

    fn transactional(&self) -> bool {
        false
    }
}

/// Adds a constraint in place, which SQLite cannot do
pub struct AddUsernameConstraint;

impl AddUsernameConstraint {
    pub fn constraint() -> stratum_migrate::Constraint {
        stratum_migrate::Constraint::check("length(username) > 2")
    }
}

impl stratum_migrate::Migration for AddUsernameConstraint {
    fn identifier(&self) -> &str {
        "20241002_000001_users_username_check"
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.add_constraint(CreateUsersTable::TABLE, Self::constraint());
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        schema.drop_constraint(
            CreateUsersTable::TABLE,
            &Self::constraint().resolved_name(CreateUsersTable::TABLE),
        );
        Ok(())
    }
}

pub fn scenario_registry() -> MigrationRegistry {
    scenario_prefix(3)
}

/// The first `count` scenario units
pub fn scenario_prefix(count: usize) -> MigrationRegistry {
    let units: Vec<Box<dyn stratum_migrate::Migration>> = vec![
        Box::new(CreateUsersTable),
        Box::new(CreateAcronymsTable),
        Box::new(AddTwitterFieldToUsers),
    ];

    let mut registry = MigrationRegistry::new();
    for unit in units.into_iter().take(count) {
        registry.register_boxed(unit).unwrap();
    }
    registry
}

pub fn test_config() -> MigrationConfig {
    MigrationConfig::default()
        .with_lock_timeout(Duration::from_secs(10))
        .with_lock_poll_interval(Duration::from_millis(20))
}

pub async fn memory_runner(registry: MigrationRegistry) -> MigrationRunner {
    MigrationRunner::connect("sqlite::memory:", registry, test_config())
        .await
        .unwrap()
}

/// A SQLite database file that lives as long as the value
pub struct TempDatabase {
    _dir: TempDir,
    pub url: String,
}

impl TempDatabase {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        Self { _dir: dir, url }
    }

    pub async fn runner(&self, registry: MigrationRegistry, config: MigrationConfig) -> MigrationRunner {
        MigrationRunner::connect(&self.url, registry, config).await.unwrap()
    }

    /// Every user table's columns plus every index, in a stable order
    pub async fn schema_snapshot(&self) -> Vec<String> {
        let mut conn = SqliteConnection::connect(&self.url).await.unwrap();
        let mut snapshot = sqlx::query_scalar::<_, String>(
            "SELECT m.name || '.' || p.name || ':' || p.type || ':' || p.\"notnull\" || ':' || p.pk \
             FROM sqlite_master m JOIN pragma_table_info(m.name) p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
             ORDER BY m.name, p.cid",
        )
        .fetch_all(&mut conn)
        .await
        .unwrap();

        let indexes = sqlx::query_scalar::<_, String>(
            "SELECT 'index ' || name FROM sqlite_master WHERE type = 'index' ORDER BY name",
        )
        .fetch_all(&mut conn)
        .await
        .unwrap();
        snapshot.extend(indexes);

        conn.close().await.unwrap();
        snapshot
    }
}

pub async fn table_exists(connection: &mut dyn SchemaConnection, table: &str) -> bool {
    connection
        .count_entries(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            table,
        )
        .await
        .unwrap()
        > 0
}

pub async fn column_exists(connection: &mut dyn SchemaConnection, table: &str, column: &str) -> bool {
    let sql = format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?", table);
    connection.count_entries(&sql, column).await.unwrap() > 0
}

pub fn applied_ids(entries: &[stratum_migrate::LedgerEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.identifier.as_str()).collect()
}
