mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::*;
use stratum_migrate::MigrationConfig;

#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(about = "Versioned schema migrations for PostgreSQL, MySQL and SQLite")]
struct Cli {
    /// Database URL, falls back to DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding the SQL migration files
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Database migrations
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum MigrateCommands {
    /// Create a new migration
    Create {
        /// Migration name
        name: String,
    },

    /// Run pending migrations
    Run,

    /// Rollback applied migrations, most recent first
    Rollback {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,

        /// Revert every applied migration
        #[arg(long, conflicts_with = "steps")]
        all: bool,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn migration_config(&self) -> anyhow::Result<MigrationConfig> {
        let mut config = MigrationConfig::from_env().context("invalid migration configuration")?;
        if let Some(dir) = &self.migrations_dir {
            config = config.with_migrations_dir(dir.clone());
        }
        Ok(config)
    }

    fn database_url(&self) -> anyhow::Result<String> {
        match &self.database_url {
            Some(url) => Ok(url.clone()),
            None => std::env::var("DATABASE_URL")
                .context("no database URL: pass --database-url or set DATABASE_URL"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&logging::LoggingConfig::from_env()?)?;

    let config = cli.migration_config()?;

    match &cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Create { name } => {
                migrate::create(&config, name)?;
            }
            MigrateCommands::Run => {
                migrate::run(&cli.database_url()?, config).await?;
            }
            MigrateCommands::Rollback { steps, all } => {
                migrate::rollback(&cli.database_url()?, config, *steps, *all).await?;
            }
            MigrateCommands::Status { json } => {
                migrate::status(&cli.database_url()?, config, *json).await?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrate_command(args: &[&str]) -> MigrateCommands {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Migrate { migrate_command } => migrate_command,
        }
    }

    #[test]
    fn test_parse_rollback_defaults_to_one_step() {
        assert_eq!(
            migrate_command(&["stratum", "migrate", "rollback"]),
            MigrateCommands::Rollback { steps: 1, all: false }
        );
        assert_eq!(
            migrate_command(&["stratum", "migrate", "rollback", "--steps", "3"]),
            MigrateCommands::Rollback { steps: 3, all: false }
        );
        assert_eq!(
            migrate_command(&["stratum", "migrate", "rollback", "--all"]),
            MigrateCommands::Rollback { steps: 1, all: true }
        );
    }

    #[test]
    fn test_rollback_all_conflicts_with_steps() {
        assert!(Cli::try_parse_from(["stratum", "migrate", "rollback", "--all", "--steps", "2"]).is_err());
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "stratum",
            "migrate",
            "status",
            "--json",
            "--database-url",
            "sqlite::memory:",
            "--migrations-dir",
            "db/migrations",
        ])
        .unwrap();

        assert_eq!(cli.database_url().unwrap(), "sqlite::memory:");
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("db/migrations")));
        match cli.command {
            Commands::Migrate { migrate_command } => {
                assert_eq!(migrate_command, MigrateCommands::Status { json: true })
            }
        }
    }

    #[test]
    fn test_create_requires_name() {
        assert!(Cli::try_parse_from(["stratum", "migrate", "create"]).is_err());
        assert_eq!(
            migrate_command(&["stratum", "migrate", "create", "add_users"]),
            MigrateCommands::Create { name: "add_users".to_string() }
        );
    }
}
