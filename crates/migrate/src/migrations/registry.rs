//! Migration Registry - the ordered list of units an application declares
//!
//! Order is registration order, never identifier order. Once any database has
//! applied a unit, nothing may be registered in front of it.

use std::collections::HashSet;
use std::path::Path;

use super::definitions::Migration;
use super::manager::MigrationManager;
use crate::error::RegistryError;

/// Ordered, duplicate-free collection of migration units
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
    identifiers: HashSet<String>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit; fails if its identifier is already registered
    pub fn register<M>(&mut self, migration: M) -> Result<&mut Self, RegistryError>
    where
        M: Migration + 'static,
    {
        self.register_boxed(Box::new(migration))
    }

    pub fn register_boxed(&mut self, migration: Box<dyn Migration>) -> Result<&mut Self, RegistryError> {
        let identifier = migration.identifier().to_string();
        if !self.identifiers.insert(identifier.clone()) {
            return Err(RegistryError::DuplicateIdentifier(identifier));
        }
        tracing::trace!(identifier = %identifier, position = self.migrations.len(), "registered migration");
        self.migrations.push(migration);
        Ok(self)
    }

    /// Registry of every SQL migration in `dir`, in identifier order
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for migration in MigrationManager::new(dir.as_ref()).load_migrations()? {
            registry.register(migration)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&dyn Migration> {
        self.iter().find(|m| m.identifier() == identifier)
    }

    /// Registration position of a unit
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.migrations
            .iter()
            .position(|m| m.identifier() == identifier)
    }

    /// Units in registration order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> + '_ {
        self.migrations.iter().map(|m| m.as_ref())
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.iter().map(|m| m.identifier()).collect()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.identifiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::migrations::schema_builder::SchemaBuilder;

    struct Named(&'static str);

    impl Migration for Named {
        fn identifier(&self) -> &str {
            self.0
        }

        fn apply(&self, _schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
            Ok(())
        }

        fn revert(&self, _schema: &mut SchemaBuilder) -> Result<(), MigrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = MigrationRegistry::new();
        registry
            .register(Named("20240301_b"))
            .unwrap()
            .register(Named("20240101_a"))
            .unwrap();

        assert_eq!(registry.identifiers(), vec!["20240301_b", "20240101_a"]);
        assert_eq!(registry.position("20240101_a"), Some(1));
        assert!(registry.get("20240301_b").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut registry = MigrationRegistry::new();
        registry.register(Named("20240101_a")).unwrap();

        let err = registry.register(Named("20240101_a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIdentifier(id) if id == "20240101_a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_from_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("20240102_000000_second.sql"),
            "-- Up migration\nCREATE TABLE second (id INTEGER);\n-- Down migration\nDROP TABLE second;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20240101_000000_first.sql"),
            "-- Up migration\nCREATE TABLE first (id INTEGER);\n",
        )
        .unwrap();

        let registry = MigrationRegistry::from_directory(dir.path()).unwrap();
        assert_eq!(
            registry.identifiers(),
            vec!["20240101_000000_first", "20240102_000000_second"]
        );
    }
}
