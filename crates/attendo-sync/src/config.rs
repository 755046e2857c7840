//! # Attendo Configuration
//!
//! Configuration for terminal sessions and the local datastore.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ATTENDO_DB_PATH=/var/lib/attendo/attendo.db                        │
//! │     ATTENDO_DEVICE_PASSWORD=1234                                       │
//! │     ATTENDO_SESSION_TIMEOUT=10                                         │
//! │     ATTENDO_BULK_TIMEOUT=120                                           │
//! │     ATTENDO_CONFIRM_TONE=false                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/attendo/config.toml (Linux)                              │
//! │     ~/Library/Application Support/com.attendo.attendo/config.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     password 0, timeout 5s, bulk timeout 60s, confirmation tone on     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [session]
//! password = 0
//! timeout_secs = 5
//! bulk_timeout_secs = 60
//! confirm_tone = true
//! voice_index = 0
//!
//! [database]
//! path = "/var/lib/attendo/attendo.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use attendo_core::{
    DEFAULT_BULK_TIMEOUT_SECS, DEFAULT_DEVICE_PASSWORD, DEFAULT_SESSION_TIMEOUT_SECS,
};

use crate::error::{SyncError, SyncResult};
use crate::session::SessionConfig;

/// Longest session timeout accepted, in seconds.
const MAX_SESSION_TIMEOUT_SECS: u64 = 300;

/// Longest bulk download timeout accepted, in seconds.
const MAX_BULK_TIMEOUT_SECS: u64 = 3600;

/// File name of the database inside the platform data directory.
const DATABASE_FILE_NAME: &str = "attendo.db";

// =============================================================================
// Session Settings
// =============================================================================

/// Settings applied to every terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Communication password configured on the terminals.
    #[serde(default = "default_password")]
    pub password: u32,

    /// Bound on every network call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bound on a whole user or attendance download, in seconds. Raise it for
    /// terminals holding a large attendance log.
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,

    /// Play a tone on the terminal when a session opens.
    #[serde(default = "default_true")]
    pub confirm_tone: bool,

    /// Which built-in voice prompt to play.
    #[serde(default)]
    pub voice_index: u32,
}

fn default_password() -> u32 {
    DEFAULT_DEVICE_PASSWORD
}
fn default_timeout_secs() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}
fn default_bulk_timeout_secs() -> u64 {
    DEFAULT_BULK_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            password: default_password(),
            timeout_secs: default_timeout_secs(),
            bulk_timeout_secs: default_bulk_timeout_secs(),
            confirm_tone: true,
            voice_index: 0,
        }
    }
}

impl SessionSettings {
    /// Builds the runtime session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            password: self.password,
            timeout: Duration::from_secs(self.timeout_secs),
            bulk_timeout: Duration::from_secs(self.bulk_timeout_secs),
            confirm_tone: self.confirm_tone,
            voice_index: self.voice_index,
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Location of the local datastore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Explicit database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete Attendo configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendoConfig {
    /// Terminal session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Datastore settings.
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl AttendoConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (config.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file, creating parent directories.
    ///
    /// ## Returns
    /// The path written.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<PathBuf> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(path)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.session.timeout_secs == 0 || self.session.timeout_secs > MAX_SESSION_TIMEOUT_SECS {
            return Err(SyncError::InvalidConfig(format!(
                "session.timeout_secs must be between 1 and {}, got {}",
                MAX_SESSION_TIMEOUT_SECS, self.session.timeout_secs
            )));
        }

        let bulk = self.session.bulk_timeout_secs;
        if bulk < self.session.timeout_secs || bulk > MAX_BULK_TIMEOUT_SECS {
            return Err(SyncError::InvalidConfig(format!(
                "session.bulk_timeout_secs must be between timeout_secs ({}) and {}, got {}",
                self.session.timeout_secs, MAX_BULK_TIMEOUT_SECS, bulk
            )));
        }

        if let Some(ref path) = self.database.path {
            if path.as_os_str().is_empty() {
                return Err(SyncError::InvalidConfig(
                    "database.path must not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`; unparsable values are ignored with a
    /// warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ATTENDO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(password) = lookup("ATTENDO_DEVICE_PASSWORD") {
            match password.parse::<u32>() {
                Ok(p) => self.session.password = p,
                Err(_) => warn!("ATTENDO_DEVICE_PASSWORD is not a number, ignoring"),
            }
        }

        if let Some(timeout) = lookup("ATTENDO_SESSION_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => {
                    debug!(secs, "Overriding session timeout from environment");
                    self.session.timeout_secs = secs;
                }
                Err(_) => warn!(value = %timeout, "ATTENDO_SESSION_TIMEOUT is not a number, ignoring"),
            }
        }

        if let Some(timeout) = lookup("ATTENDO_BULK_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.session.bulk_timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "ATTENDO_BULK_TIMEOUT is not a number, ignoring"),
            }
        }

        if let Some(tone) = lookup("ATTENDO_CONFIRM_TONE") {
            match tone.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.session.confirm_tone = true,
                "0" | "false" | "no" | "off" => self.session.confirm_tone = false,
                _ => warn!(value = %tone, "Unknown ATTENDO_CONFIRM_TONE value"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Resolves the database file: configured path, else the platform data
    /// directory, else the working directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.database.path {
            return path.clone();
        }

        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "attendo", "attendo")
    }
}
