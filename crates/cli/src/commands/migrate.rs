use anyhow::{Context, Result};
use stratum_migrate::backends::redact_url;
use stratum_migrate::{
    MigrationConfig, MigrationManager, MigrationRegistry, MigrationRunner, MigrationStatus,
    MigrationStatusEntry, RunnerError, RunnerResult,
};

pub fn create(config: &MigrationConfig, name: &str) -> Result<()> {
    let manager = MigrationManager::with_config(config);
    let path = manager
        .create_migration(name)
        .with_context(|| format!("could not create migration '{}'", name))?;

    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(database_url: &str, config: MigrationConfig) -> Result<()> {
    let mut runner = open_runner(database_url, config).await?;
    let result = runner.apply_pending().await;
    let summary = settle(result, runner.close().await, "migration run failed")?;

    if summary.is_empty() {
        println!("Nothing to migrate ({} already applied)", summary.skipped);
    } else {
        for identifier in &summary.applied {
            println!("Applied: {}", identifier);
        }
        println!(
            "Applied {} migration(s) in {} ms",
            summary.applied_count(),
            summary.duration.as_millis()
        );
    }
    Ok(())
}

pub async fn rollback(database_url: &str, config: MigrationConfig, steps: usize, all: bool) -> Result<()> {
    let mut runner = open_runner(database_url, config).await?;
    let result = if all {
        runner.revert_all().await
    } else {
        runner.revert(steps).await
    };
    let summary = settle(result, runner.close().await, "rollback failed")?;

    if summary.is_empty() {
        println!("Nothing to roll back");
    } else {
        for identifier in &summary.reverted {
            println!("Reverted: {}", identifier);
        }
        println!(
            "Reverted {} migration(s) in {} ms",
            summary.reverted_count(),
            summary.duration.as_millis()
        );
    }
    Ok(())
}

pub async fn status(database_url: &str, config: MigrationConfig, json: bool) -> Result<()> {
    let mut runner = open_runner(database_url, config).await?;
    let result = runner.status().await;
    let entries = settle(result, runner.close().await, "could not read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render_status(&entries));
    }
    Ok(())
}

async fn open_runner(database_url: &str, config: MigrationConfig) -> Result<MigrationRunner> {
    let registry = MigrationRegistry::from_directory(&config.migrations_dir).with_context(|| {
        format!(
            "could not load migrations from {}",
            config.migrations_dir.display()
        )
    })?;
    tracing::debug!(count = registry.len(), dir = %config.migrations_dir.display(), "loaded migrations");

    MigrationRunner::connect(database_url, registry, config)
        .await
        .with_context(|| format!("could not connect to {}", redact_url(database_url)))
}

/// The command's own error wins over a failure to close the connection
fn settle<T>(result: RunnerResult<T>, closed: RunnerResult<()>, action: &'static str) -> Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_error)) => {
            Err(anyhow::Error::new(close_error).context("could not close the database connection"))
        }
        (Err(e), closed) => {
            if let Err(close_error) = closed {
                tracing::warn!(error = %close_error, "could not close the database connection");
            }
            Err(anyhow::Error::new(e).context(action))
        }
    }
}

fn render_status(entries: &[MigrationStatusEntry]) -> String {
    let mut out = String::from("Migration Status:\n================\n");
    if entries.is_empty() {
        out.push_str("No migrations found\n");
        return out;
    }

    let mut pending = 0;
    for entry in entries {
        let line = match &entry.status {
            MigrationStatus::Applied { applied_at } => format!(
                "  ✅ {}  (applied {})",
                entry.identifier,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            MigrationStatus::Pending => {
                pending += 1;
                format!("  ⏳ {}", entry.identifier)
            }
            MigrationStatus::Unregistered { applied_at } => format!(
                "  ⚠️  {}  (applied {}, not registered)",
                entry.identifier,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!("\n{} pending\n", pending));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_status() {
        let applied_at = Utc.with_ymd_and_hms(2024, 9, 29, 12, 0, 0).unwrap();
        let entries = vec![
            MigrationStatusEntry {
                identifier: "20240929_000001_create_users".to_string(),
                description: "create users".to_string(),
                status: MigrationStatus::Applied { applied_at },
            },
            MigrationStatusEntry {
                identifier: "20241001_000001_add_twitter".to_string(),
                description: "add twitter".to_string(),
                status: MigrationStatus::Pending,
            },
        ];

        let rendered = render_status(&entries);
        assert!(rendered.contains("✅ 20240929_000001_create_users  (applied 2024-09-29 12:00:00 UTC)"));
        assert!(rendered.contains("⏳ 20241001_000001_add_twitter"));
        assert!(rendered.ends_with("1 pending\n"));
    }

    #[test]
    fn test_settle_keeps_the_command_error() {
        let failed: RunnerResult<()> = Err(RunnerError::UnknownMigration("20240101_000000_gone".to_string()));
        let close_failed: RunnerResult<()> = Err(RunnerError::InconsistentLedger { unknown: vec![] });

        let err = settle(failed, close_failed, "rollback failed").unwrap_err();
        assert_eq!(err.to_string(), "rollback failed");
        assert!(format!("{:#}", err).contains("20240101_000000_gone"));

        let err = settle(Ok(3), Err(RunnerError::InconsistentLedger { unknown: vec![] }), "run failed")
            .unwrap_err();
        assert_eq!(err.to_string(), "could not close the database connection");

        assert_eq!(settle(Ok(3), Ok(()), "run failed").unwrap(), 3);
    }

    #[test]
    fn test_render_empty_status() {
        assert!(render_status(&[]).contains("No migrations found"));
    }

    #[tokio::test]
    async fn test_create_then_status_on_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MigrationConfig::default().with_migrations_dir(dir.path().join("migrations"));

        create(&config, "create widgets").unwrap();
        let path = std::fs::read_dir(&config.migrations_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let filled = std::fs::read_to_string(&path)
            .unwrap()
            .replace(
                "-- Up migration\n",
                "-- Up migration\nCREATE TABLE widgets (id INTEGER PRIMARY KEY);\n",
            )
            .replace("-- Down migration\n", "-- Down migration\nDROP TABLE widgets;\n");
        std::fs::write(&path, filled).unwrap();

        let url = format!("sqlite://{}", dir.path().join("cli.db").display());
        run(&url, config.clone()).await.unwrap();
        status(&url, config.clone(), true).await.unwrap();
        rollback(&url, config, 1, false).await.unwrap();
    }
}
