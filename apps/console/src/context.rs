//! # Console Context
//!
//! Everything a command needs: configuration, the database handle and the
//! connector that builds terminal clients.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Console                                          │
//! │                                                                         │
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐    │
//! │  │  AttendoConfig   │ │  Arc<Database>   │ │ Arc<dyn Terminal-    │    │
//! │  │                  │ │                  │ │     Connector>       │    │
//! │  │ • session        │ │ • devices()      │ │ • ZkConnector        │    │
//! │  │ • database path  │ │ • users()        │ │ • MockConnector      │    │
//! │  │                  │ │ • attendance()   │ │   (tests)            │    │
//! │  └──────────────────┘ └──────────────────┘ └──────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use attendo_core::Device;
use attendo_db::{Database, DbConfig};
use attendo_sync::{
    AttendoConfig, DeviceSession, NoOpEmitter, SyncEventEmitter, SyncOrchestrator,
    TerminalConnector, ZkConnector,
};

/// Shared state handed to every command.
pub struct Console {
    pub config: AttendoConfig,
    pub db: Arc<Database>,
    pub connector: Arc<dyn TerminalConnector>,
    /// Print JSON instead of text.
    pub json: bool,
}

impl Console {
    /// Opens the configured database (running migrations) and wires up the
    /// TCP connector.
    pub async fn open(config: AttendoConfig, json: bool) -> Result<Self> {
        let db = open_database(&config).await?;
        Ok(Console {
            config,
            db: Arc::new(db),
            connector: Arc::new(ZkConnector),
            json,
        })
    }

    /// Builds a console around an existing database and connector.
    #[cfg(test)]
    pub fn with_parts(
        config: AttendoConfig,
        db: Database,
        connector: Arc<dyn TerminalConnector>,
    ) -> Self {
        Console {
            config,
            db: Arc::new(db),
            connector,
            json: false,
        }
    }

    /// Looks up a registered device or fails with a readable message.
    pub async fn device(&self, id: i64) -> Result<Device> {
        self.db
            .devices()
            .get_by_id(id)
            .await
            .context("Failed to load device")?
            .with_context(|| format!("No device with id {}", id))
    }

    /// A fresh, disconnected session for `device`.
    pub fn session(&self, device: &Device) -> DeviceSession {
        DeviceSession::new(
            device,
            self.config.session.session_config(),
            Arc::clone(&self.connector),
        )
    }

    /// An orchestrator reporting progress to `emitter`.
    pub fn orchestrator(&self, emitter: Option<Arc<dyn SyncEventEmitter>>) -> Arc<SyncOrchestrator> {
        let emitter: Arc<dyn SyncEventEmitter> = match emitter {
            Some(emitter) => emitter,
            None => Arc::new(NoOpEmitter),
        };
        Arc::new(SyncOrchestrator::with_emitter(
            Arc::clone(&self.db),
            Arc::clone(&self.connector),
            self.config.session.session_config(),
            emitter,
        ))
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

/// Opens the database file named by `config`, creating its directory.
pub async fn open_database(config: &AttendoConfig) -> Result<Database> {
    let path = config.database_path();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!(path = %path.display(), "Opening database");

    Database::new(DbConfig::new(path))
        .await
        .context("Failed to open database")
}
