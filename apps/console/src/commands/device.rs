//! # Device Commands
//!
//! Registration and upkeep of fingerprint terminals.
//!
//! ```text
//! attendo device add ──► DeviceForm ──► validate_device_form ──► devices.insert
//! attendo device edit ─► stored fields + changes ──► validate ──► devices.update
//! attendo device check ► DeviceSession: connect ──► probe ──► disconnect
//! ```

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use attendo_core::validation::{validate_device_form, DeviceForm};
use attendo_core::Device;

use crate::context::Console;
use crate::output::{print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Register a terminal
    Add(DeviceArgs),

    /// List registered terminals
    List,

    /// Change fields of a registered terminal
    Edit {
        /// Device id
        id: i64,

        #[command(flatten)]
        changes: DeviceChanges,
    },

    /// Remove a terminal (its users stay, without an owning device)
    Delete {
        /// Device id
        id: i64,
    },

    /// Connect to a terminal and probe it
    Check {
        /// Device id
        id: i64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Display name
    #[arg(long)]
    pub name: String,

    /// Hardware model, e.g. K40
    #[arg(long)]
    pub model: String,

    /// Serial number (unique)
    #[arg(long)]
    pub serial: String,

    /// IPv4 or IPv6 address
    #[arg(long)]
    pub ip: String,

    /// TCP port
    #[arg(long, default_value = "4370")]
    pub port: String,
}

impl From<DeviceArgs> for DeviceForm {
    fn from(args: DeviceArgs) -> Self {
        DeviceForm {
            name: args.name,
            device_model: args.model,
            serial_number: args.serial,
            ip: args.ip,
            port: args.port,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeviceChanges {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub serial: Option<String>,

    #[arg(long)]
    pub ip: Option<String>,

    #[arg(long)]
    pub port: Option<String>,
}

impl DeviceChanges {
    /// The stored device as a form, with the given changes applied.
    fn merge(self, current: &Device) -> DeviceForm {
        DeviceForm {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            device_model: self.model.unwrap_or_else(|| current.device_model.clone()),
            serial_number: self
                .serial
                .unwrap_or_else(|| current.serial_number.clone()),
            ip: self.ip.unwrap_or_else(|| current.ip.clone()),
            port: self.port.unwrap_or_else(|| current.port.to_string()),
        }
    }
}

/// Result of `device check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCheck {
    pub device_id: i64,
    pub name: String,
    pub address: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run a device command.
pub async fn run(console: &Console, command: DeviceCommand) -> Result<()> {
    match command {
        DeviceCommand::Add(args) => {
            let device = add(console, args.into()).await?;
            report(console, "Registered", &device)
        }
        DeviceCommand::List => {
            let devices = console
                .db
                .devices()
                .list()
                .await
                .context("Failed to list devices")?;
            if console.json {
                return print_json(&devices);
            }
            if devices.is_empty() {
                println!("No devices registered.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = devices
                .iter()
                .map(|d| {
                    vec![
                        d.id.to_string(),
                        d.name.clone(),
                        d.device_model.clone(),
                        d.serial_number.clone(),
                        d.address(),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "MODEL", "SERIAL", "ADDRESS"], &rows);
            Ok(())
        }
        DeviceCommand::Edit { id, changes } => {
            let device = edit(console, id, changes).await?;
            report(console, "Updated", &device)
        }
        DeviceCommand::Delete { id } => {
            console
                .db
                .devices()
                .delete(id)
                .await
                .with_context(|| format!("Failed to delete device {}", id))?;
            info!(device_id = id, "Device deleted");
            println!("Deleted device {}", id);
            Ok(())
        }
        DeviceCommand::Check { id } => {
            let result = check(console, id).await?;
            if console.json {
                return print_json(&result);
            }
            match result.error {
                None => println!("{} ({}): reachable", result.name, result.address),
                Some(ref error) => {
                    println!("{} ({}): unreachable: {}", result.name, result.address, error)
                }
            }
            Ok(())
        }
    }
}

fn report(console: &Console, verb: &str, device: &Device) -> Result<()> {
    if console.json {
        return print_json(device);
    }
    println!(
        "{} device {}: {} ({})",
        verb,
        device.id,
        device.name,
        device.address()
    );
    Ok(())
}

/// Validates and stores a new device.
pub async fn add(console: &Console, form: DeviceForm) -> Result<Device> {
    let new_device = validate_device_form(&form)?;
    let device = console
        .db
        .devices()
        .insert(&new_device)
        .await
        .context("Failed to register device")?;

    info!(device_id = device.id, ip = %device.ip, "Device registered");
    Ok(device)
}

/// Applies `changes` to a stored device after validating the result.
pub async fn edit(console: &Console, id: i64, changes: DeviceChanges) -> Result<Device> {
    let current = console.device(id).await?;
    let new_device = validate_device_form(&changes.merge(&current))?;

    let device = console
        .db
        .devices()
        .update(id, &new_device)
        .await
        .with_context(|| format!("Failed to update device {}", id))?;

    info!(device_id = id, "Device updated");
    Ok(device)
}

/// Connects to the device, probes it and disconnects.
///
/// An unreachable device is a normal result, not an error.
pub async fn check(console: &Console, id: i64) -> Result<DeviceCheck> {
    let device = console.device(id).await?;
    let mut session = console.session(&device);

    let error = match session.connect().await {
        Err(e) => Some(e.to_string()),
        Ok(()) => {
            if session.is_connected().await {
                None
            } else {
                Some("terminal did not answer the probe".to_string())
            }
        }
    };

    if let Err(e) = session.disconnect().await {
        warn!(device_id = id, error = %e, "Disconnect after check failed");
    }

    Ok(DeviceCheck {
        device_id: device.id,
        name: device.name.clone(),
        address: device.address(),
        reachable: error.is_none(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_db::Database;
    use attendo_sync::protocol::mock::{MockConnector, MockOp, MockTerminal};
    use attendo_sync::{AttendoConfig, ProtocolError};
    use std::sync::Arc;

    fn form(serial: &str, ip: &str) -> DeviceForm {
        DeviceForm {
            name: "Front door".into(),
            device_model: "K40".into(),
            serial_number: serial.into(),
            ip: ip.into(),
            port: "4370".into(),
        }
    }

    async fn console(connector: MockConnector) -> Console {
        let db = Database::in_memory().await.unwrap();
        Console::with_parts(AttendoConfig::default(), db, Arc::new(connector))
    }

    #[tokio::test]
    async fn test_add_validates_before_insert() {
        let console = console(MockConnector::new()).await;

        let mut bad = form("SN001", "10.0.0.5");
        bad.port = "70000".into();
        assert!(add(&console, bad).await.is_err());

        let bad = form("SN001", "not-an-ip");
        assert!(add(&console, bad).await.is_err());

        assert_eq!(console.db.devices().count().await.unwrap(), 0);

        let device = add(&console, form("SN001", "10.0.0.5")).await.unwrap();
        assert_eq!(device.port, 4370);
        assert_eq!(console.db.devices().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_serial_rejected() {
        let console = console(MockConnector::new()).await;
        add(&console, form("SN001", "10.0.0.5")).await.unwrap();
        assert!(add(&console, form("SN001", "10.0.0.6")).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_keeps_unchanged_fields() {
        let console = console(MockConnector::new()).await;
        let device = add(&console, form("SN001", "10.0.0.5")).await.unwrap();

        let changes = DeviceChanges {
            ip: Some("10.0.0.9".into()),
            ..Default::default()
        };
        let updated = edit(&console, device.id, changes).await.unwrap();

        assert_eq!(updated.ip, "10.0.0.9");
        assert_eq!(updated.name, "Front door");
        assert_eq!(updated.serial_number, "SN001");
        assert_eq!(updated.port, 4370);
    }

    #[tokio::test]
    async fn test_edit_unknown_device() {
        let console = console(MockConnector::new()).await;
        assert!(edit(&console, 42, DeviceChanges::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_check_reachable_releases_terminal() {
        let connector = MockConnector::new();
        let terminal = MockTerminal::new();
        connector.register("10.0.0.5", terminal.clone());
        let console = console(connector).await;
        let device = add(&console, form("SN001", "10.0.0.5")).await.unwrap();

        let result = check(&console, device.id).await.unwrap();

        assert!(result.reachable);
        assert!(result.error.is_none());
        assert!(!terminal.is_open());
        assert!(!terminal.is_ui_disabled());
        assert_eq!(terminal.count(MockOp::GetTime), 1);
    }

    #[tokio::test]
    async fn test_check_unreachable_is_not_an_error() {
        let console = console(MockConnector::new()).await;
        let device = add(&console, form("SN001", "10.0.0.5")).await.unwrap();

        let result = check(&console, device.id).await.unwrap();

        assert!(!result.reachable);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_check_failed_probe() {
        let connector = MockConnector::new();
        let terminal = MockTerminal::new();
        terminal.fail_on(MockOp::GetTime, ProtocolError::Timeout);
        connector.register("10.0.0.5", terminal.clone());
        let console = console(connector).await;
        let device = add(&console, form("SN001", "10.0.0.5")).await.unwrap();

        let result = check(&console, device.id).await.unwrap();

        assert!(!result.reachable);
        assert!(!terminal.is_open());
    }
}
