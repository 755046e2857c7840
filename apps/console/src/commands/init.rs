//! Create the database and write a default config file.

use std::path::PathBuf;

use anyhow::{Context, Result};

use attendo_sync::AttendoConfig;

use crate::context::open_database;

/// Run the init command.
pub async fn run(config: &AttendoConfig, config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = config_path
        .or_else(AttendoConfig::default_config_path)
        .context("Could not determine config directory")?;

    let wrote_config = if config_path.exists() && !force {
        false
    } else {
        config
            .save(Some(config_path.clone()))
            .context("Failed to write config file")?;
        true
    };

    let db = open_database(config).await?;
    let (total, applied) = db
        .migration_status()
        .await
        .context("Failed to read migration status")?;
    db.close().await;

    println!("Attendo initialized.");
    println!();
    if wrote_config {
        println!("  Config:     {}", config_path.display());
    } else {
        println!(
            "  Config:     {} (kept, use --force to overwrite)",
            config_path.display()
        );
    }
    println!("  Database:   {}", config.database_path().display());
    println!("  Migrations: {}/{} applied", applied, total);
    println!();
    println!("Next steps:");
    println!("  1. Register a terminal: attendo device add --name <name> --model <model> --serial <sn> --ip <ip>");
    println!("  2. Pull its users and punches: attendo sync");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> AttendoConfig {
        let mut config = AttendoConfig::default();
        config.database.path = Some(dir.join("data").join("attendo.db"));
        config
    }

    #[tokio::test]
    async fn init_creates_config_and_database() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let config_path = dir.path().join("config.toml");

        run(&config, Some(config_path.clone()), false).await.unwrap();

        assert!(config_path.exists());
        assert!(dir.path().join("data").join("attendo.db").exists());

        let loaded = AttendoConfig::load(Some(config_path)).unwrap();
        assert_eq!(loaded.session, config.session);
    }

    #[tokio::test]
    async fn init_keeps_existing_config_without_force() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[session]\ntimeout_secs = 9\n").unwrap();

        run(&config, Some(config_path.clone()), false).await.unwrap();
        assert!(std::fs::read_to_string(&config_path)
            .unwrap()
            .contains("timeout_secs = 9"));

        run(&config, Some(config_path.clone()), true).await.unwrap();
        assert!(std::fs::read_to_string(&config_path)
            .unwrap()
            .contains("timeout_secs = 5"));
    }
}
