//! # Terminal Commands
//!
//! Direct operations on one terminal through a [`DeviceSession`]. Nothing is
//! written to the local database here; use `attendo sync` for that.
//!
//! Every command opens a session, runs one operation and always releases the
//! terminal, even when the operation failed.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tracing::warn;

use attendo_core::{
    Privilege, RemoteAttendanceRecord, RemoteUser, RemoteUserPatch, SYNC_TIMESTAMP_FORMAT,
};
use attendo_sync::{DeviceSession, UserSelector};

use crate::context::Console;
use crate::output::{or_dash, print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum TerminalCommand {
    /// List users enrolled on a terminal
    Users {
        /// Device id
        device_id: i64,
    },

    /// List punches stored on a terminal
    Attendance {
        /// Device id
        device_id: i64,
    },

    /// Write a user into a terminal slot (creates or overwrites)
    SetUser {
        /// Device id
        device_id: i64,

        /// Terminal slot number
        #[arg(long)]
        uid: u16,

        /// External user id
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        name: String,

        /// User or Admin
        #[arg(long, default_value = "User")]
        privilege: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(long, default_value = "")]
        group_id: String,

        /// RFID card number
        #[arg(long, default_value_t = 0)]
        card: u32,
    },

    /// Change fields of a user already on a terminal
    EditUser {
        /// Device id
        device_id: i64,

        /// Terminal slot number
        uid: u16,

        #[arg(long)]
        name: Option<String>,

        /// User or Admin
        #[arg(long)]
        privilege: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        group_id: Option<String>,

        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        card: Option<u32>,
    },

    /// Remove a user from a terminal
    DeleteUser {
        /// Device id
        device_id: i64,

        /// Terminal slot number
        #[arg(long, conflicts_with = "user_id", required_unless_present = "user_id")]
        uid: Option<u16>,

        /// External user id
        #[arg(long)]
        user_id: Option<String>,
    },
}

/// Run a terminal command.
pub async fn run(console: &Console, command: TerminalCommand) -> Result<()> {
    match command {
        TerminalCommand::Users { device_id } => {
            let users = list_users(console, device_id).await?;
            if console.json {
                return print_json(&users);
            }
            let rows: Vec<Vec<String>> = users
                .iter()
                .map(|u| {
                    vec![
                        u.uid.to_string(),
                        u.user_id.clone(),
                        u.name.clone(),
                        u.privilege.to_string(),
                        or_dash(Some(&u.group_id).filter(|g| !g.is_empty())),
                        or_dash(Some(u.card).filter(|c| *c != 0)),
                    ]
                })
                .collect();
            print_table(&["UID", "USER_ID", "NAME", "PRIVILEGE", "GROUP", "CARD"], &rows);
            Ok(())
        }
        TerminalCommand::Attendance { device_id } => {
            let records = list_attendance(console, device_id).await?;
            if console.json {
                return print_json(&records);
            }
            let rows: Vec<Vec<String>> = records
                .iter()
                .map(|r| {
                    vec![
                        r.user_id.clone(),
                        r.timestamp.format(SYNC_TIMESTAMP_FORMAT).to_string(),
                        r.status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| format!("code {}", r.status_code)),
                        r.punch.to_string(),
                    ]
                })
                .collect();
            print_table(&["USER_ID", "TIMESTAMP", "STATUS", "PUNCH"], &rows);
            Ok(())
        }
        TerminalCommand::SetUser {
            device_id,
            uid,
            user_id,
            name,
            privilege,
            password,
            group_id,
            card,
        } => {
            let user = RemoteUser {
                uid,
                name,
                privilege: privilege.parse()?,
                password,
                group_id,
                user_id,
                card,
            };
            set_user(console, device_id, &user).await?;
            if console.json {
                return print_json(&user);
            }
            println!("Wrote {} ({}) to slot {}", user.user_id, user.name, user.uid);
            Ok(())
        }
        TerminalCommand::EditUser {
            device_id,
            uid,
            name,
            privilege,
            password,
            group_id,
            user_id,
            card,
        } => {
            let patch = RemoteUserPatch {
                name,
                privilege: privilege.map(|p| p.parse::<Privilege>()).transpose()?,
                password,
                group_id,
                user_id,
                card,
            };
            let user = edit_user(console, device_id, uid, &patch).await?;
            if console.json {
                return print_json(&user);
            }
            println!("Updated slot {}: {} ({})", user.uid, user.user_id, user.name);
            Ok(())
        }
        TerminalCommand::DeleteUser {
            device_id,
            uid,
            user_id,
        } => {
            let selector = match (uid, user_id) {
                (Some(uid), _) => UserSelector::Uid(uid),
                (None, Some(user_id)) => UserSelector::UserId(user_id),
                (None, None) => bail!("Must specify --uid or --user-id"),
            };
            delete_user(console, device_id, &selector).await?;
            println!("Deleted {} from device {}", selector, device_id);
            Ok(())
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

pub async fn list_users(console: &Console, device_id: i64) -> Result<Vec<RemoteUser>> {
    let mut session = open(console, device_id).await?;
    let result = session.list_users().await.context("Failed to read users");
    release(session, result).await
}

pub async fn list_attendance(
    console: &Console,
    device_id: i64,
) -> Result<Vec<RemoteAttendanceRecord>> {
    let mut session = open(console, device_id).await?;
    let result = session
        .list_attendance()
        .await
        .context("Failed to read attendance");
    release(session, result).await
}

pub async fn set_user(console: &Console, device_id: i64, user: &RemoteUser) -> Result<()> {
    let mut session = open(console, device_id).await?;
    let result = session
        .create_user(user)
        .await
        .with_context(|| format!("Failed to write slot {}", user.uid));
    release(session, result).await
}

pub async fn edit_user(
    console: &Console,
    device_id: i64,
    uid: u16,
    patch: &RemoteUserPatch,
) -> Result<RemoteUser> {
    if patch.is_empty() {
        bail!("Nothing to change");
    }
    let mut session = open(console, device_id).await?;
    let result = session
        .update_user(uid, patch)
        .await
        .with_context(|| format!("Failed to update slot {}", uid));
    release(session, result).await
}

pub async fn delete_user(console: &Console, device_id: i64, selector: &UserSelector) -> Result<()> {
    let mut session = open(console, device_id).await?;
    let result = session
        .delete_user(selector)
        .await
        .with_context(|| format!("Failed to delete {}", selector));
    release(session, result).await
}

// =============================================================================
// Session Handling
// =============================================================================

async fn open(console: &Console, device_id: i64) -> Result<DeviceSession> {
    let device = console.device(device_id).await?;
    let mut session = console.session(&device);
    session
        .connect()
        .await
        .with_context(|| format!("Could not connect to {} ({})", device.name, device.address()))?;
    Ok(session)
}

/// Disconnects and hands back the operation result. A failed disconnect is
/// logged; it never masks the operation's own result.
async fn release<T>(mut session: DeviceSession, result: Result<T>) -> Result<T> {
    if let Err(e) = session.disconnect().await {
        warn!(address = %session.address(), error = %e, "Disconnect failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::validation::DeviceForm;
    use attendo_db::Database;
    use attendo_sync::protocol::mock::{MockConnector, MockOp, MockTerminal};
    use attendo_sync::{AttendoConfig, ProtocolError};
    use std::sync::Arc;

    fn remote(uid: u16, user_id: &str, name: &str) -> RemoteUser {
        RemoteUser {
            uid,
            name: name.into(),
            privilege: Privilege::User,
            password: String::new(),
            group_id: String::new(),
            user_id: user_id.into(),
            card: 0,
        }
    }

    async fn setup(terminal: &MockTerminal) -> (Console, i64) {
        let connector = MockConnector::new();
        connector.register("10.0.0.5", terminal.clone());
        let db = Database::in_memory().await.unwrap();
        let console = Console::with_parts(AttendoConfig::default(), db, Arc::new(connector));

        let form = DeviceForm {
            name: "Front door".into(),
            device_model: "K40".into(),
            serial_number: "SN001".into(),
            ip: "10.0.0.5".into(),
            port: "4370".into(),
        };
        let device = crate::commands::device::add(&console, form).await.unwrap();
        (console, device.id)
    }

    #[tokio::test]
    async fn test_list_users_releases_terminal() {
        let terminal = MockTerminal::new().with_users(vec![remote(1, "1001", "Alice")]);
        let (console, device_id) = setup(&terminal).await;

        let users = list_users(&console, device_id).await.unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Alice");
        assert!(!terminal.is_open());
        assert!(!terminal.is_ui_disabled());
    }

    #[tokio::test]
    async fn test_failed_read_still_releases_terminal() {
        let terminal = MockTerminal::new();
        terminal.fail_on(MockOp::GetAttendance, ProtocolError::Timeout);
        let (console, device_id) = setup(&terminal).await;

        assert!(list_attendance(&console, device_id).await.is_err());
        assert!(!terminal.is_open());
        assert!(!terminal.is_ui_disabled());
    }

    #[tokio::test]
    async fn test_set_then_edit_user() {
        let terminal = MockTerminal::new();
        let (console, device_id) = setup(&terminal).await;

        set_user(&console, device_id, &remote(7, "1007", "Gina"))
            .await
            .unwrap();

        let patch = RemoteUserPatch {
            name: Some("Gina R".into()),
            ..Default::default()
        };
        let updated = edit_user(&console, device_id, 7, &patch).await.unwrap();

        assert_eq!(updated.name, "Gina R");
        assert_eq!(updated.user_id, "1007");
        assert_eq!(terminal.users(), vec![updated]);
    }

    #[tokio::test]
    async fn test_empty_patch_never_connects() {
        let terminal = MockTerminal::new();
        let (console, device_id) = setup(&terminal).await;

        assert!(edit_user(&console, device_id, 7, &RemoteUserPatch::default())
            .await
            .is_err());
        assert_eq!(terminal.count(MockOp::Open), 0);
    }

    #[tokio::test]
    async fn test_delete_by_user_id() {
        let terminal = MockTerminal::new()
            .with_users(vec![remote(1, "1001", "Alice"), remote(2, "1002", "Bob")]);
        let (console, device_id) = setup(&terminal).await;

        delete_user(&console, device_id, &UserSelector::UserId("1002".into()))
            .await
            .unwrap();

        assert_eq!(terminal.users(), vec![remote(1, "1001", "Alice")]);
    }

    #[tokio::test]
    async fn test_unreachable_terminal() {
        let terminal = MockTerminal::unreachable();
        let (console, device_id) = setup(&terminal).await;

        assert!(list_users(&console, device_id).await.is_err());
    }
}
