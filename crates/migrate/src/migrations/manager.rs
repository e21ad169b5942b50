//! Migration Manager - File system operations for migrations
//!
//! Creates and loads `.sql` migration files. A file named
//! `<identifier>.sql` holds an `-- Up migration` section and an optional
//! `-- Down migration` section; a `-- no-transaction` line anywhere in the
//! header opts the unit out of the per-unit transaction.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, TokenWithLocation, Tokenizer};

use super::definitions::Migration;
use super::schema_builder::SchemaBuilder;
use crate::backends::SqlDialect;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, RegistryError};

const UP_MARKER: &str = "up";
const DOWN_MARKER: &str = "down";
const NO_TRANSACTION_MARKER: &str = "-- no-transaction";

/// A migration unit loaded from a SQL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    identifier: String,
    description: String,
    up_sql: String,
    down_sql: String,
    transactional: bool,
}

impl SqlMigration {
    pub fn new(identifier: &str, up_sql: &str, down_sql: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            description: describe(identifier),
            up_sql: up_sql.trim().to_string(),
            down_sql: down_sql.trim().to_string(),
            transactional: true,
        }
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> &str {
        &self.down_sql
    }

    /// Whether the file carries a down section
    pub fn is_reversible(&self) -> bool {
        !self.down_sql.is_empty()
    }
}

impl Migration for SqlMigration {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        for statement in split_sql_statements(&self.up_sql, schema.dialect()) {
            schema.raw(&statement);
        }
        Ok(())
    }

    fn revert(&self, schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
        if !self.is_reversible() {
            return Err(MigrationError::Irreversible(format!(
                "{} has no down section",
                self.identifier
            )));
        }
        for statement in split_sql_statements(&self.down_sql, schema.dialect()) {
            schema.raw(&statement);
        }
        Ok(())
    }

    fn transactional(&self) -> bool {
        self.transactional
    }
}

/// Migration manager for creating and loading migration files
pub struct MigrationManager {
    migrations_dir: PathBuf,
}

impl MigrationManager {
    /// Manager over an explicit directory
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Manager over the configured migrations directory
    pub fn with_config(config: &MigrationConfig) -> Self {
        Self::new(config.migrations_dir.clone())
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Create a new migration file, returning its path
    pub fn create_migration(&self, name: &str) -> Result<PathBuf, RegistryError> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(RegistryError::MalformedFile {
                path: self.migrations_dir.clone(),
                reason: format!("migration name {:?} has no usable characters", name),
            });
        }

        fs::create_dir_all(&self.migrations_dir).map_err(|source| RegistryError::Io {
            path: self.migrations_dir.clone(),
            source,
        })?;

        let identifier = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), slug);
        let path = self.migrations_dir.join(format!("{}.sql", identifier));
        if path.exists() {
            return Err(RegistryError::DuplicateIdentifier(identifier));
        }

        fs::write(&path, migration_template(name, &identifier))
            .map_err(|source| RegistryError::Io { path: path.clone(), source })?;

        tracing::info!(identifier = %identifier, path = %path.display(), "created migration file");
        Ok(path)
    }

    /// Load all migration files, sorted by identifier. A missing directory holds no migrations.
    pub fn load_migrations(&self) -> Result<Vec<SqlMigration>, RegistryError> {
        if !self.migrations_dir.exists() {
            tracing::debug!(dir = %self.migrations_dir.display(), "migrations directory does not exist");
            return Ok(Vec::new());
        }

        let io_error = |source| RegistryError::Io {
            path: self.migrations_dir.clone(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.migrations_dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                migrations.push(self.parse_migration_file(&path)?);
            }
        }

        migrations.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(migrations)
    }

    /// Parse one migration file
    pub fn parse_migration_file(&self, path: &Path) -> Result<SqlMigration, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let malformed = |reason: &str| RegistryError::MalformedFile {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let identifier = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| malformed("file name is not valid UTF-8"))?;
        if !is_valid_identifier(identifier) {
            return Err(malformed(
                "file name must follow <timestamp>_<name>.sql, e.g. 20240929_120000_create_users.sql",
            ));
        }

        let sections = parse_migration_content(&content);
        if !sections.has_up_marker {
            return Err(malformed("missing `-- Up migration` section"));
        }
        if sections.up.trim().is_empty() {
            return Err(malformed("`-- Up migration` section is empty"));
        }

        let mut migration = SqlMigration::new(identifier, &sections.up, &sections.down);
        migration.transactional = !sections.no_transaction;
        Ok(migration)
    }
}

struct MigrationSections {
    up: String,
    down: String,
    has_up_marker: bool,
    no_transaction: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Header,
    Up,
    Down,
}

fn parse_migration_content(content: &str) -> MigrationSections {
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut section = Section::Header;
    let mut has_up_marker = false;
    let mut no_transaction = false;

    for line in content.lines() {
        let trimmed = line.trim();
        let lowered = trimmed.to_lowercase();

        if is_section_marker(&lowered, UP_MARKER) {
            section = Section::Up;
            has_up_marker = true;
            continue;
        }
        if is_section_marker(&lowered, DOWN_MARKER) {
            section = Section::Down;
            continue;
        }
        if section == Section::Header && lowered == NO_TRANSACTION_MARKER {
            no_transaction = true;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        match section {
            Section::Up => up.push(line),
            Section::Down => down.push(line),
            Section::Header => {}
        }
    }

    MigrationSections {
        up: up.join("\n"),
        down: down.join("\n"),
        has_up_marker,
        no_transaction,
    }
}

/// `-- up`, `-- Up migration`, `-- up migration: ...`
fn is_section_marker(lowered: &str, section: &str) -> bool {
    match lowered.strip_prefix("--").map(str::trim_start) {
        Some(rest) => {
            rest == section
                || rest
                    .strip_prefix(section)
                    .map_or(false, |tail| tail.trim_start().starts_with("migration"))
        }
        None => false,
    }
}

/// Split a SQL script into statements for `dialect`.
///
/// Statements end at `;` tokens outside string literals, dollar-quoted bodies
/// and `BEGIN ... END` blocks of `CREATE` statements. Each statement is the
/// author's original text. A script the tokenizer rejects is kept whole.
pub fn split_sql_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let parser_dialect: Box<dyn Dialect> = match dialect {
        SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
        SqlDialect::MySQL => Box::new(MySqlDialect {}),
        SqlDialect::SQLite => Box::new(SQLiteDialect {}),
    };

    let tokens = match Tokenizer::new(parser_dialect.as_ref(), sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(dialect = %dialect, "SQL tokenizing failed, executing the script as one statement: {}", e);
            let whole = sql.trim().trim_end_matches(';').trim_end();
            return if whole.is_empty() { Vec::new() } else { vec![whole.to_string()] };
        }
    };

    let significant: Vec<&TokenWithLocation> = tokens
        .iter()
        .filter(|t| !matches!(t.token, Token::Whitespace(_)))
        .collect();
    let offsets = LineOffsets::new(sql);

    let mut statements = Vec::new();
    let mut start = 0;
    let mut head: Option<String> = None;
    let mut depth = 0usize;
    let mut skip_next = false;

    for (i, token) in significant.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }

        match &token.token {
            Token::SemiColon if depth == 0 => {
                let end = offsets.byte_offset(sql, token.location);
                if head.is_some() {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end + 1;
                head = None;
            }
            Token::Word(word) if word.quote_style.is_none() => {
                let value = word.value.to_ascii_uppercase();
                let statement_head = head.get_or_insert_with(|| value.clone());
                match value.as_str() {
                    "BEGIN" if depth > 0 || statement_head.as_str() == "CREATE" => depth += 1,
                    "CASE" => depth += 1,
                    "END" => match next_word(&significant, i).as_deref() {
                        // closers of blocks that were never counted
                        Some("IF" | "LOOP" | "WHILE" | "REPEAT") => skip_next = true,
                        Some("CASE") => {
                            skip_next = true;
                            depth = depth.saturating_sub(1);
                        }
                        _ => depth = depth.saturating_sub(1),
                    },
                    _ => {}
                }
            }
            _ => {
                head.get_or_insert_with(String::new);
            }
        }
    }

    if head.is_some() {
        let rest = sql[start..].trim();
        if !rest.is_empty() {
            statements.push(rest.to_string());
        }
    }
    statements
}

fn next_word(tokens: &[&TokenWithLocation], index: usize) -> Option<String> {
    match tokens.get(index + 1).map(|t| &t.token) {
        Some(Token::Word(word)) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// Maps tokenizer line/column locations back to byte offsets
struct LineOffsets {
    starts: Vec<usize>,
}

impl LineOffsets {
    fn new(sql: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn byte_offset(&self, sql: &str, location: Location) -> usize {
        let line_start = self
            .starts
            .get(location.line.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(sql.len());
        sql[line_start..]
            .char_indices()
            .nth(location.column.saturating_sub(1) as usize)
            .map_or(sql.len(), |(i, _)| line_start + i)
    }
}

/// `YYYYMMDD_HHMMSS_slug` or `<digits>_slug`
fn is_valid_identifier(identifier: &str) -> bool {
    match identifier.split_once('_') {
        Some((timestamp, rest)) => {
            !timestamp.is_empty()
                && timestamp.chars().all(|c| c.is_ascii_digit())
                && !rest.is_empty()
        }
        None => false,
    }
}

fn describe(identifier: &str) -> String {
    let parts: Vec<&str> = identifier.split('_').collect();
    let name_parts = if parts.len() >= 3 && parts[0].len() == 8 && parts[1].len() == 6 {
        &parts[2..]
    } else if parts.len() >= 2 {
        &parts[1..]
    } else {
        &parts[..]
    };
    name_parts.join(" ")
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn migration_template(name: &str, identifier: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- ID: {}\n\
         -- Created: {}\n\
         -- Add `-- no-transaction` above the Up section to run without a transaction\n\n\
         -- Up migration\n\n\n\
         -- Down migration\n\n",
        name,
        identifier,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POSTS: &str = "\
-- Migration: create posts
-- Up migration
CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
CREATE INDEX idx_posts_title ON posts (title);

-- Down migration
DROP TABLE posts;
";

    #[test]
    fn test_parse_sections() {
        let sections = parse_migration_content(POSTS);
        assert!(sections.has_up_marker);
        assert!(!sections.no_transaction);
        assert!(sections.up.starts_with("CREATE TABLE posts"));
        assert!(sections.up.contains("CREATE INDEX"));
        assert_eq!(sections.down, "DROP TABLE posts;");
    }

    #[test]
    fn test_comments_are_not_markers() {
        let sections = parse_migration_content(
            "-- Up migration\n-- update users first\nUPDATE users SET name = 'x';\n-- down\nSELECT 1;\n",
        );
        assert_eq!(sections.up, "UPDATE users SET name = 'x';");
        assert_eq!(sections.down, "SELECT 1;");
    }

    #[test]
    fn test_no_transaction_header() {
        let sections = parse_migration_content(
            "-- no-transaction\n-- Up migration\nCREATE INDEX CONCURRENTLY idx ON t (c);\n",
        );
        assert!(sections.no_transaction);
        assert!(sections.down.is_empty());
    }

    #[test]
    fn test_split_statements() {
        let statements = split_sql_statements(
            "CREATE TABLE a (id INTEGER); INSERT INTO a VALUES (1);",
            SqlDialect::SQLite,
        );
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[1].starts_with("INSERT INTO a"));
    }

    #[test]
    fn test_split_keeps_unknown_statements() {
        let statements = split_sql_statements("FROBNICATE everything; DO more", SqlDialect::PostgreSQL);
        assert_eq!(statements, vec!["FROBNICATE everything", "DO more"]);
    }

    #[test]
    fn test_split_keeps_original_text() {
        let statements = split_sql_statements(
            "INSERT INTO notes (body) VALUES ('a;b');\n  CREATE INDEX idx_notes_body ON notes (body) ;\n",
            SqlDialect::SQLite,
        );
        assert_eq!(
            statements,
            vec![
                "INSERT INTO notes (body) VALUES ('a;b')",
                "CREATE INDEX idx_notes_body ON notes (body)",
            ]
        );
    }

    #[test]
    fn test_split_postgres_dollar_quoted_function() {
        let function = "CREATE FUNCTION touch_updated_at() RETURNS trigger AS $$\n\
                        BEGIN\n    NEW.updated_at = now();\n    RETURN NEW;\nEND;\n\
                        $$ LANGUAGE plpgsql";
        let trigger = "CREATE TRIGGER posts_touch BEFORE UPDATE ON posts \
                       FOR EACH ROW EXECUTE FUNCTION touch_updated_at()";
        let script = format!("{};\n{};\n", function, trigger);

        let statements = split_sql_statements(&script, SqlDialect::PostgreSQL);
        assert_eq!(statements, vec![function, trigger]);
    }

    #[test]
    fn test_split_sqlite_trigger_body() {
        let trigger = "CREATE TRIGGER posts_audit AFTER UPDATE ON posts\n\
                       BEGIN\n    \
                       UPDATE posts SET note = 'a;b' WHERE id = NEW.id;\n    \
                       INSERT INTO audit (entry) VALUES (CASE WHEN NEW.id > 0 THEN 'up' ELSE 'down' END);\n\
                       END";
        let script = format!("{};\nINSERT INTO posts (title) VALUES ('x');", trigger);

        let statements = split_sql_statements(&script, SqlDialect::SQLite);
        assert_eq!(statements, vec![trigger, "INSERT INTO posts (title) VALUES ('x')"]);
    }

    #[test]
    fn test_split_transaction_statements_and_mysql_blocks() {
        let statements = split_sql_statements("BEGIN; CREATE TABLE t (id INT); COMMIT;", SqlDialect::SQLite);
        assert_eq!(statements, vec!["BEGIN", "CREATE TABLE t (id INT)", "COMMIT"]);

        let procedure = "CREATE PROCEDURE bump() BEGIN IF 1 = 1 THEN UPDATE t SET id = id + 1; END IF; END";
        let statements = split_sql_statements(&format!("{}; SELECT 1;", procedure), SqlDialect::MySQL);
        assert_eq!(statements, vec![procedure, "SELECT 1"]);
    }

    #[test]
    fn test_split_skips_trailing_comments() {
        let statements = split_sql_statements("SELECT 1; -- done\n/* nothing */", SqlDialect::PostgreSQL);
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn test_split_untokenizable_script_is_kept_whole() {
        let statements = split_sql_statements("INSERT INTO t VALUES ('oops); SELECT 1;", SqlDialect::SQLite);
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('oops); SELECT 1"]);
    }

    #[test]
    fn test_load_migrations_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20240202_000000_create_posts.sql"), POSTS).unwrap();
        fs::write(
            dir.path().join("20240101_000000_create_tags.sql"),
            "-- Up migration\nCREATE TABLE tags (id INTEGER);\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let manager = MigrationManager::new(dir.path());
        let migrations = manager.load_migrations().unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].identifier(), "20240101_000000_create_tags");
        assert_eq!(migrations[0].description(), "create tags");
        assert!(!migrations[0].is_reversible());
        assert!(migrations[1].is_reversible());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(dir.path().join("nope"));
        assert!(manager.load_migrations().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_files() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(dir.path());

        let no_up = dir.path().join("20240101_000000_broken.sql");
        fs::write(&no_up, "CREATE TABLE t (id INTEGER);").unwrap();
        assert!(matches!(
            manager.parse_migration_file(&no_up),
            Err(RegistryError::MalformedFile { .. })
        ));

        let bad_name = dir.path().join("create_things.sql");
        fs::write(&bad_name, POSTS).unwrap();
        assert!(matches!(
            manager.parse_migration_file(&bad_name),
            Err(RegistryError::MalformedFile { .. })
        ));
    }

    #[test]
    fn test_create_migration_template() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(dir.path().join("migrations"));

        let path = manager.create_migration("Add Twitter URL!").unwrap();
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("_add_twitter_url.sql"));
        assert!(is_valid_identifier(path.file_stem().unwrap().to_str().unwrap()));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("-- Up migration"));
        assert!(content.contains("-- Down migration"));

        // an untouched template must be filled in before it can load
        assert!(manager.load_migrations().is_err());

        assert!(matches!(
            manager.create_migration("!!!"),
            Err(RegistryError::MalformedFile { .. })
        ));
    }

    #[test]
    fn test_irreversible_sql_migration() {
        let migration = SqlMigration::new("20240101_000000_seed", "INSERT INTO t VALUES (1)", "");
        let mut schema = SchemaBuilder::new(SqlDialect::SQLite);
        assert!(matches!(
            migration.revert(&mut schema),
            Err(MigrationError::Irreversible(_))
        ));

        migration.apply(&mut schema).unwrap();
        assert_eq!(schema.operations().len(), 1);
    }
}
