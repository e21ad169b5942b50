//! Schema Builder - DSL for describing database schema changes
//!
//! Provides a fluent interface for describing table, column, constraint and
//! index changes. Nothing touches the database here: [`SchemaBuilder::build`]
//! compiles the recorded operations into statements for one [`SqlDialect`],
//! and the runner executes them.

use std::collections::HashSet;

use uuid::Uuid;

use crate::backends::SqlDialect;
use crate::error::SchemaError;

/// Logical column types, mapped to concrete types per dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key
    Serial,
    Integer,
    BigInteger,
    /// Variable length string with a maximum length
    String(u32),
    Text,
    Boolean,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Timestamp,
    Date,
    Uuid,
    Json,
    Binary,
}

impl ColumnType {
    /// Concrete column type for a dialect
    pub fn sql(&self, dialect: SqlDialect) -> String {
        use SqlDialect::*;

        match (self, dialect) {
            (ColumnType::Serial, PostgreSQL) => "SERIAL".to_string(),
            (ColumnType::Serial, MySQL) => "INT".to_string(),
            (ColumnType::Serial, SQLite) => "INTEGER".to_string(),
            (ColumnType::Integer, MySQL) => "INT".to_string(),
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::BigInteger, SQLite) => "INTEGER".to_string(),
            (ColumnType::BigInteger, _) => "BIGINT".to_string(),
            (ColumnType::String(_), SQLite) => "TEXT".to_string(),
            (ColumnType::String(len), _) => format!("VARCHAR({})", len),
            (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Float, MySQL) => "FLOAT".to_string(),
            (ColumnType::Float, _) => "REAL".to_string(),
            (ColumnType::Double, PostgreSQL) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Double, MySQL) => "DOUBLE".to_string(),
            (ColumnType::Double, SQLite) => "REAL".to_string(),
            (ColumnType::Decimal { .. }, SQLite) => "NUMERIC".to_string(),
            (ColumnType::Decimal { precision, scale }, PostgreSQL) => {
                format!("NUMERIC({}, {})", precision, scale)
            }
            (ColumnType::Decimal { precision, scale }, MySQL) => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            (ColumnType::Timestamp, PostgreSQL) => "TIMESTAMPTZ".to_string(),
            (ColumnType::Timestamp, MySQL) => "DATETIME(6)".to_string(),
            (ColumnType::Timestamp, SQLite) => "TEXT".to_string(),
            (ColumnType::Date, SQLite) => "TEXT".to_string(),
            (ColumnType::Date, _) => "DATE".to_string(),
            (ColumnType::Uuid, PostgreSQL) => "UUID".to_string(),
            (ColumnType::Uuid, MySQL) => "CHAR(36)".to_string(),
            (ColumnType::Uuid, SQLite) => "TEXT".to_string(),
            (ColumnType::Json, PostgreSQL) => "JSONB".to_string(),
            (ColumnType::Json, MySQL) => "JSON".to_string(),
            (ColumnType::Json, SQLite) => "TEXT".to_string(),
            (ColumnType::Binary, PostgreSQL) => "BYTEA".to_string(),
            (ColumnType::Binary, _) => "BLOB".to_string(),
        }
    }
}

/// Column default value
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    CurrentTimestamp,
    /// Raw SQL expression, emitted in parentheses
    Expression(String),
}

impl DefaultValue {
    fn sql(&self, dialect: SqlDialect) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(true) => "TRUE".to_string(),
            DefaultValue::Bool(false) => "FALSE".to_string(),
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Float(value) => value.to_string(),
            DefaultValue::Text(value) => format!("'{}'", value.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => dialect.current_timestamp().to_string(),
            DefaultValue::Expression(expr) => format!("({})", expr),
        }
    }

    /// Whether the value is a constant SQLite accepts in `ADD COLUMN`
    fn is_constant(&self) -> bool {
        !matches!(self, DefaultValue::CurrentTimestamp | DefaultValue::Expression(_))
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Bool(value)
    }
}

impl From<i32> for DefaultValue {
    fn from(value: i32) -> Self {
        DefaultValue::Integer(value as i64)
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Integer(value)
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        DefaultValue::Float(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Text(value.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        DefaultValue::Text(value)
    }
}

/// A column description
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub primary_key: bool,
    pub unique: bool,
}

impl ColumnDefinition {
    /// New nullable column without default
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    pub fn default(&mut self, value: impl Into<DefaultValue>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    fn is_primary_key(&self) -> bool {
        self.primary_key || self.column_type == ColumnType::Serial
    }

    fn to_sql(&self, dialect: SqlDialect) -> Result<String, SchemaError> {
        validate_identifier("column", &self.name)?;
        let name = dialect.quote(&self.name);

        if self.column_type == ColumnType::Serial {
            return Ok(match dialect {
                SqlDialect::PostgreSQL => format!("{} SERIAL PRIMARY KEY", name),
                SqlDialect::MySQL => format!("{} INT NOT NULL AUTO_INCREMENT PRIMARY KEY", name),
                SqlDialect::SQLite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
            });
        }

        let mut sql = format!("{} {}", name, self.column_type.sql(dialect));
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.sql(dialect));
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if self.unique {
            sql.push_str(" UNIQUE");
        }
        Ok(sql)
    }
}

/// Referential action for ON DELETE / ON UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Restrict => "RESTRICT",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Foreign key description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyConstraint {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKeyConstraint {
    pub fn new(columns: &[&str], references_table: &str, references_columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: to_strings(columns),
            references_table: references_table.to_string(),
            references_columns: to_strings(references_columns),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }
}

/// Table constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    PrimaryKey { name: Option<String>, columns: Vec<String> },
    Unique { name: Option<String>, columns: Vec<String> },
    ForeignKey(ForeignKeyConstraint),
    Check { name: Option<String>, expression: String },
}

impl Constraint {
    pub fn primary_key(columns: &[&str]) -> Self {
        Constraint::PrimaryKey { name: None, columns: to_strings(columns) }
    }

    pub fn unique(columns: &[&str]) -> Self {
        Constraint::Unique { name: None, columns: to_strings(columns) }
    }

    pub fn foreign_key(columns: &[&str], references_table: &str, references_columns: &[&str]) -> Self {
        Constraint::ForeignKey(ForeignKeyConstraint::new(columns, references_table, references_columns))
    }

    pub fn check(expression: &str) -> Self {
        Constraint::Check { name: None, expression: expression.to_string() }
    }

    /// Give the constraint an explicit name
    pub fn named(mut self, constraint_name: &str) -> Self {
        let slot = match &mut self {
            Constraint::PrimaryKey { name, .. }
            | Constraint::Unique { name, .. }
            | Constraint::Check { name, .. } => name,
            Constraint::ForeignKey(fk) => &mut fk.name,
        };
        *slot = Some(constraint_name.to_string());
        self
    }

    /// Explicit name, or the conventional `<table>_<columns>_<suffix>` name.
    ///
    /// Unnamed checks get `<table>_check_<hash>`, where the hash is derived
    /// from the expression so separate checks on one table never collide.
    pub fn resolved_name(&self, table: &str) -> String {
        match self {
            Constraint::PrimaryKey { name, .. } => {
                name.clone().unwrap_or_else(|| format!("{}_pkey", table))
            }
            Constraint::Unique { name, columns } => name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_key", table, columns.join("_"))),
            Constraint::ForeignKey(fk) => fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fkey", table, fk.columns.join("_"))),
            Constraint::Check { name, expression } => name
                .clone()
                .unwrap_or_else(|| format!("{}_check_{}", table, expression_digest(expression))),
        }
    }

    fn to_sql(&self, dialect: SqlDialect, table: &str) -> Result<String, SchemaError> {
        let name = self.resolved_name(table);
        validate_identifier("constraint", &name)?;

        let body = match self {
            Constraint::PrimaryKey { columns, .. } => {
                format!("PRIMARY KEY ({})", column_list(dialect, columns)?)
            }
            Constraint::Unique { columns, .. } => {
                format!("UNIQUE ({})", column_list(dialect, columns)?)
            }
            Constraint::ForeignKey(fk) => {
                validate_identifier("table", &fk.references_table)?;
                if fk.columns.len() != fk.references_columns.len() {
                    return Err(SchemaError::InvalidDefinition(format!(
                        "foreign key {} maps {} column(s) onto {} referenced column(s)",
                        name,
                        fk.columns.len(),
                        fk.references_columns.len()
                    )));
                }
                let mut sql = format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    column_list(dialect, &fk.columns)?,
                    dialect.quote(&fk.references_table),
                    column_list(dialect, &fk.references_columns)?
                );
                if fk.on_delete != ForeignKeyAction::NoAction {
                    sql.push_str(" ON DELETE ");
                    sql.push_str(fk.on_delete.as_sql());
                }
                if fk.on_update != ForeignKeyAction::NoAction {
                    sql.push_str(" ON UPDATE ");
                    sql.push_str(fk.on_update.as_sql());
                }
                sql
            }
            Constraint::Check { expression, .. } => {
                if expression.trim().is_empty() {
                    return Err(SchemaError::InvalidDefinition(format!(
                        "check constraint {} has an empty expression",
                        name
                    )));
                }
                format!("CHECK ({})", expression)
            }
        };

        Ok(format!("CONSTRAINT {} {}", dialect.quote(&name), body))
    }
}

impl From<ForeignKeyConstraint> for Constraint {
    fn from(fk: ForeignKeyConstraint) -> Self {
        Constraint::ForeignKey(fk)
    }
}

/// Full description of a table to create
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<Constraint>,
    pub if_not_exists: bool,
}

/// Index description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("idx_{}_{}", self.table, self.columns.join("_")))
    }
}

/// One recorded schema operation
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateTable(TableDefinition),
    DropTable { name: String, if_exists: bool },
    RenameTable { from: String, to: String },
    AddColumn { table: String, column: ColumnDefinition },
    DropColumn { table: String, column: String },
    AddConstraint { table: String, constraint: Constraint },
    DropConstraint { table: String, name: String },
    CreateIndex(IndexDefinition),
    DropIndex { table: String, name: String },
    Raw(String),
}

impl SchemaOperation {
    /// Compile this operation into statements for `dialect`
    pub fn compile(&self, dialect: SqlDialect) -> Result<Vec<String>, SchemaError> {
        let q = |name: &str| dialect.quote(name);

        let sql = match self {
            SchemaOperation::CreateTable(table) => compile_create_table(dialect, table)?,
            SchemaOperation::DropTable { name, if_exists } => {
                validate_identifier("table", name)?;
                if *if_exists {
                    format!("DROP TABLE IF EXISTS {}", q(name))
                } else {
                    format!("DROP TABLE {}", q(name))
                }
            }
            SchemaOperation::RenameTable { from, to } => {
                validate_identifier("table", from)?;
                validate_identifier("table", to)?;
                format!("ALTER TABLE {} RENAME TO {}", q(from), q(to))
            }
            SchemaOperation::AddColumn { table, column } => {
                validate_identifier("table", table)?;
                if dialect == SqlDialect::SQLite {
                    check_sqlite_add_column(column)?;
                }
                format!("ALTER TABLE {} ADD COLUMN {}", q(table), column.to_sql(dialect)?)
            }
            SchemaOperation::DropColumn { table, column } => {
                validate_identifier("table", table)?;
                validate_identifier("column", column)?;
                format!("ALTER TABLE {} DROP COLUMN {}", q(table), q(column))
            }
            SchemaOperation::AddConstraint { table, constraint } => {
                validate_identifier("table", table)?;
                if !dialect.supports_alter_constraints() {
                    return Err(unsupported(dialect, "ALTER TABLE ... ADD CONSTRAINT"));
                }
                format!("ALTER TABLE {} ADD {}", q(table), constraint.to_sql(dialect, table)?)
            }
            SchemaOperation::DropConstraint { table, name } => {
                validate_identifier("table", table)?;
                validate_identifier("constraint", name)?;
                if !dialect.supports_alter_constraints() {
                    return Err(unsupported(dialect, "ALTER TABLE ... DROP CONSTRAINT"));
                }
                format!("ALTER TABLE {} DROP CONSTRAINT {}", q(table), q(name))
            }
            SchemaOperation::CreateIndex(index) => {
                validate_identifier("table", &index.table)?;
                let name = index.resolved_name();
                validate_identifier("index", &name)?;
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    q(&name),
                    q(&index.table),
                    column_list(dialect, &index.columns)?
                )
            }
            SchemaOperation::DropIndex { table, name } => {
                validate_identifier("table", table)?;
                validate_identifier("index", name)?;
                match dialect {
                    SqlDialect::MySQL => format!("DROP INDEX {} ON {}", q(name), q(table)),
                    SqlDialect::PostgreSQL | SqlDialect::SQLite => format!("DROP INDEX {}", q(name)),
                }
            }
            SchemaOperation::Raw(sql) => {
                let sql = sql.trim().trim_end_matches(';').trim_end();
                if sql.is_empty() {
                    return Err(SchemaError::InvalidDefinition("empty raw statement".to_string()));
                }
                sql.to_string()
            }
        };

        Ok(vec![sql])
    }
}

/// Schema operations recorded by a migration unit
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    dialect: SqlDialect,
    operations: Vec<SchemaOperation>,
}

impl SchemaBuilder {
    /// Create a new schema builder targeting `dialect`
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            operations: Vec::new(),
        }
    }

    /// Dialect the operations will be compiled for
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);
        self.operations
            .push(SchemaOperation::CreateTable(table_builder.into_definition()));
        self
    }

    /// Create a table unless it already exists
    pub fn create_table_if_not_exists<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);
        let mut definition = table_builder.into_definition();
        definition.if_not_exists = true;
        self.operations.push(SchemaOperation::CreateTable(definition));
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropTable {
            name: table_name.to_string(),
            if_exists: false,
        });
        self
    }

    /// Drop a table if it exists
    pub fn drop_table_if_exists(&mut self, table_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropTable {
            name: table_name.to_string(),
            if_exists: true,
        });
        self
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Add a column to an existing table; returns the column for further configuration
    pub fn add_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        column_type: ColumnType,
    ) -> &mut ColumnDefinition {
        self.operations.push(SchemaOperation::AddColumn {
            table: table_name.to_string(),
            column: ColumnDefinition::new(column_name, column_type),
        });
        match self.operations.last_mut() {
            Some(SchemaOperation::AddColumn { column, .. }) => column,
            _ => unreachable!("an AddColumn operation was just pushed"),
        }
    }

    /// Drop a column from existing table
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropColumn {
            table: table_name.to_string(),
            column: column_name.to_string(),
        });
        self
    }

    pub fn add_constraint(&mut self, table_name: &str, constraint: impl Into<Constraint>) -> &mut Self {
        self.operations.push(SchemaOperation::AddConstraint {
            table: table_name.to_string(),
            constraint: constraint.into(),
        });
        self
    }

    pub fn drop_constraint(&mut self, table_name: &str, constraint_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropConstraint {
            table: table_name.to_string(),
            name: constraint_name.to_string(),
        });
        self
    }

    /// Create an index
    pub fn create_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        self.push_index(table_name, column_names, index_name, false)
    }

    pub fn create_unique_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        self.push_index(table_name, column_names, index_name, true)
    }

    /// Drop an index
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropIndex {
            table: table_name.to_string(),
            name: index_name.to_string(),
        });
        self
    }

    /// Record a raw statement, passed through unchanged
    pub fn raw(&mut self, sql: &str) -> &mut Self {
        self.operations.push(SchemaOperation::Raw(sql.to_string()));
        self
    }

    /// Operations recorded so far
    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Compile every recorded operation into executable statements
    pub fn build(&self) -> Result<Vec<String>, SchemaError> {
        let mut statements = Vec::with_capacity(self.operations.len());
        for operation in &self.operations {
            statements.extend(operation.compile(self.dialect)?);
        }
        Ok(statements)
    }

    fn push_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
        unique: bool,
    ) -> &mut Self {
        self.operations.push(SchemaOperation::CreateIndex(IndexDefinition {
            name: index_name.map(str::to_string),
            table: table_name.to_string(),
            columns: to_strings(column_names),
            unique,
        }));
        self
    }
}

/// Table builder for CREATE TABLE statements
pub struct TableBuilder {
    definition: TableDefinition,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            definition: TableDefinition {
                name: table_name.to_string(),
                columns: Vec::new(),
                constraints: Vec::new(),
                if_not_exists: false,
            },
        }
    }

    /// Add a column of any type
    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDefinition {
        let index = self.definition.columns.len();
        self.definition
            .columns
            .push(ColumnDefinition::new(name, column_type));
        &mut self.definition.columns[index]
    }

    /// Add an ID column (auto-increment primary key)
    pub fn id(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Serial)
    }

    /// Add a UUID column
    pub fn uuid(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Uuid)
    }

    /// Add a string column; `None` means unbounded text
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut ColumnDefinition {
        match length {
            Some(len) => self.column(name, ColumnType::String(len)),
            None => self.column(name, ColumnType::Text),
        }
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Text)
    }

    /// Add an integer column
    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::BigInteger)
    }

    /// Add a boolean column
    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Boolean)
    }

    pub fn float(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Float)
    }

    pub fn double(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Double)
    }

    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Decimal { precision, scale })
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Timestamp)
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Date)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Json)
    }

    pub fn binary(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Binary)
    }

    /// Add timestamp columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.timestamp("created_at")
            .not_null()
            .default(DefaultValue::CurrentTimestamp);
        self.timestamp("updated_at")
            .not_null()
            .default(DefaultValue::CurrentTimestamp);
        self
    }

    /// Add a primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraint(Constraint::primary_key(columns))
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraint(Constraint::unique(columns))
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.constraint(ForeignKeyConstraint::new(
            &[column],
            references_table,
            &[references_column],
        ))
    }

    /// Add any constraint
    pub fn constraint(&mut self, constraint: impl Into<Constraint>) -> &mut Self {
        self.definition.constraints.push(constraint.into());
        self
    }

    pub fn into_definition(self) -> TableDefinition {
        self.definition
    }

    /// Build the CREATE TABLE SQL
    pub fn to_sql(&self, dialect: SqlDialect) -> Result<String, SchemaError> {
        compile_create_table(dialect, &self.definition)
    }
}

fn compile_create_table(dialect: SqlDialect, table: &TableDefinition) -> Result<String, SchemaError> {
    validate_identifier("table", &table.name)?;
    if table.columns.is_empty() {
        return Err(SchemaError::InvalidDefinition(format!(
            "table {} has no columns",
            table.name
        )));
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        if !seen.insert(column.name.as_str()) {
            return Err(SchemaError::InvalidDefinition(format!(
                "column {} is defined twice on table {}",
                column.name, table.name
            )));
        }
    }

    let inline_keys = table.columns.iter().filter(|c| c.is_primary_key()).count();
    let key_constraints = table
        .constraints
        .iter()
        .filter(|c| matches!(c, Constraint::PrimaryKey { .. }))
        .count();
    if inline_keys + key_constraints > 1 {
        return Err(SchemaError::InvalidDefinition(format!(
            "table {} declares more than one primary key; use a composite primary key constraint",
            table.name
        )));
    }

    let mut parts = Vec::with_capacity(table.columns.len() + table.constraints.len());
    for column in &table.columns {
        parts.push(column.to_sql(dialect)?);
    }
    for constraint in &table.constraints {
        parts.push(constraint.to_sql(dialect, &table.name)?);
    }

    Ok(format!(
        "CREATE TABLE {}{} (\n    {}\n)",
        if table.if_not_exists { "IF NOT EXISTS " } else { "" },
        dialect.quote(&table.name),
        parts.join(",\n    ")
    ))
}

fn check_sqlite_add_column(column: &ColumnDefinition) -> Result<(), SchemaError> {
    if column.is_primary_key() || column.unique {
        return Err(unsupported(
            SqlDialect::SQLite,
            "ADD COLUMN with a PRIMARY KEY or UNIQUE column",
        ));
    }
    match &column.default {
        None | Some(DefaultValue::Null) if !column.nullable => Err(unsupported(
            SqlDialect::SQLite,
            "ADD COLUMN of a NOT NULL column without a default",
        )),
        Some(default) if !default.is_constant() => Err(unsupported(
            SqlDialect::SQLite,
            "ADD COLUMN with a non-constant default",
        )),
        _ => Ok(()),
    }
}

fn unsupported(dialect: SqlDialect, operation: &str) -> SchemaError {
    SchemaError::UnsupportedOperation {
        backend: dialect.backend_type(),
        operation: operation.to_string(),
    }
}

fn column_list(dialect: SqlDialect, columns: &[String]) -> Result<String, SchemaError> {
    if columns.is_empty() {
        return Err(SchemaError::InvalidDefinition("empty column list".to_string()));
    }
    let mut quoted = Vec::with_capacity(columns.len());
    for column in columns {
        validate_identifier("column", column)?;
        quoted.push(dialect.quote(column));
    }
    Ok(quoted.join(", "))
}

/// Identifiers are always quoted, so only characters that would break quoting are rejected
pub(crate) fn validate_identifier(kind: &str, name: &str) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        return Err(SchemaError::InvalidDefinition(format!("empty {} name", kind)));
    }
    if name.contains(['"', '`', '\0']) {
        return Err(SchemaError::InvalidDefinition(format!(
            "{} name {:?} contains a quote or NUL character",
            kind, name
        )));
    }
    Ok(())
}

/// Stable 8 hex digit digest of a check expression, whitespace-insensitive
fn expression_digest(expression: &str) -> String {
    let normalized = expression.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes()).simple().to_string();
    digest[..8].to_string()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new(SqlDialect::PostgreSQL)
    }
}
