//! Local user management.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use attendo_core::validation::{validate_user_form, UserForm};
use attendo_core::LocalUser;

use crate::context::Console;
use crate::output::{or_dash, print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Add a user to the local list
    Add(UserArgs),

    /// List local users with their owning device
    List,

    /// Change fields of a local user
    Edit {
        /// Row id (see `user list`)
        id: i64,

        #[command(flatten)]
        changes: UserChanges,
    },

    /// Remove a local user (terminals are not touched)
    Delete {
        /// Row id (see `user list`)
        id: i64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    #[arg(long)]
    pub name: String,

    /// User or Admin
    #[arg(long, default_value = "User")]
    pub privilege: String,

    #[arg(long)]
    pub password: String,

    /// External user id (integer, unique)
    #[arg(long)]
    pub user_id: String,

    #[arg(long, default_value = "0")]
    pub group_id: String,

    /// Owning device id
    #[arg(long)]
    pub device_id: Option<String>,
}

impl From<UserArgs> for UserForm {
    fn from(args: UserArgs) -> Self {
        UserForm {
            name: args.name,
            privilege: args.privilege,
            password: args.password,
            user_id: args.user_id,
            group_id: args.group_id,
            device_id: args.device_id.unwrap_or_default(),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct UserChanges {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub privilege: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub user_id: Option<String>,

    #[arg(long)]
    pub group_id: Option<String>,

    /// Owning device id; an empty value clears it
    #[arg(long)]
    pub device_id: Option<String>,
}

impl UserChanges {
    fn merge(self, current: &LocalUser) -> UserForm {
        UserForm {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            privilege: self
                .privilege
                .unwrap_or_else(|| current.privilege.to_string()),
            password: self.password.unwrap_or_else(|| current.password.clone()),
            user_id: self.user_id.unwrap_or_else(|| current.user_id.to_string()),
            group_id: self
                .group_id
                .unwrap_or_else(|| current.group_id.to_string()),
            device_id: self
                .device_id
                .unwrap_or_else(|| current.device_id.map(|d| d.to_string()).unwrap_or_default()),
        }
    }
}

/// Run a user command.
pub async fn run(console: &Console, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Add(args) => {
            let user = add(console, args.into()).await?;
            if console.json {
                return print_json(&user);
            }
            println!("Added user {} ({}) as row {}", user.user_id, user.name, user.id);
            Ok(())
        }
        UserCommand::List => {
            let users = console
                .db
                .users()
                .list_with_device_names()
                .await
                .context("Failed to list users")?;
            if console.json {
                return print_json(&users);
            }
            if users.is_empty() {
                println!("No users.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = users
                .iter()
                .map(|view| {
                    vec![
                        view.user.id.to_string(),
                        view.user.user_id.to_string(),
                        view.user.name.clone(),
                        view.user.privilege.to_string(),
                        view.user.group_id.to_string(),
                        or_dash(view.device_name.as_ref()),
                    ]
                })
                .collect();
            print_table(&["ID", "USER_ID", "NAME", "PRIVILEGE", "GROUP", "DEVICE"], &rows);
            Ok(())
        }
        UserCommand::Edit { id, changes } => {
            let user = edit(console, id, changes).await?;
            if console.json {
                return print_json(&user);
            }
            println!("Updated user {} ({})", user.user_id, user.name);
            Ok(())
        }
        UserCommand::Delete { id } => {
            console
                .db
                .users()
                .delete(id)
                .await
                .with_context(|| format!("Failed to delete user row {}", id))?;
            info!(row = id, "User deleted");
            println!("Deleted user row {}", id);
            Ok(())
        }
    }
}

/// Validates and stores a new user.
pub async fn add(console: &Console, form: UserForm) -> Result<LocalUser> {
    let new_user = validate_user_form(&form)?;
    let user = console
        .db
        .users()
        .insert(&new_user)
        .await
        .context("Failed to add user")?;

    info!(user_id = user.user_id, "User added");
    Ok(user)
}

/// Applies `changes` to a stored user after validating the result.
pub async fn edit(console: &Console, id: i64, changes: UserChanges) -> Result<LocalUser> {
    let current = console
        .db
        .users()
        .get_by_id(id)
        .await
        .context("Failed to load user")?
        .with_context(|| format!("No user with row id {}", id))?;

    let new_user = validate_user_form(&changes.merge(&current))?;
    let user = console
        .db
        .users()
        .update(id, &new_user)
        .await
        .with_context(|| format!("Failed to update user row {}", id))?;

    info!(user_id = user.user_id, "User updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::Privilege;
    use attendo_db::Database;
    use attendo_sync::protocol::mock::MockConnector;
    use attendo_sync::AttendoConfig;
    use std::sync::Arc;

    async fn console() -> Console {
        let db = Database::in_memory().await.unwrap();
        Console::with_parts(AttendoConfig::default(), db, Arc::new(MockConnector::new()))
    }

    fn alice() -> UserForm {
        UserForm {
            name: "Alice".into(),
            privilege: "Admin".into(),
            password: "1234".into(),
            user_id: "1001".into(),
            group_id: "1".into(),
            device_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_add_user() {
        let console = console().await;
        let user = add(&console, alice()).await.unwrap();

        assert_eq!(user.user_id, 1001);
        assert_eq!(user.privilege, Privilege::Admin);
        assert_eq!(user.device_id, None);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_forms() {
        let console = console().await;

        let mut form = alice();
        form.user_id = "A-7".into();
        assert!(add(&console, form).await.is_err());

        let mut form = alice();
        form.privilege = "Root".into();
        assert!(add(&console, form).await.is_err());

        let mut form = alice();
        form.password = "  ".into();
        assert!(add(&console, form).await.is_err());

        assert_eq!(console.db.users().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_user_id_rejected() {
        let console = console().await;
        add(&console, alice()).await.unwrap();
        assert!(add(&console, alice()).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_merges_changes() {
        let console = console().await;
        let user = add(&console, alice()).await.unwrap();

        let changes = UserChanges {
            name: Some("Alice B".into()),
            privilege: Some("user".into()),
            ..Default::default()
        };
        let updated = edit(&console, user.id, changes).await.unwrap();

        assert_eq!(updated.name, "Alice B");
        assert_eq!(updated.privilege, Privilege::User);
        assert_eq!(updated.user_id, 1001);
        assert_eq!(updated.password, "1234");
        assert_eq!(updated.group_id, 1);
    }

    #[tokio::test]
    async fn test_edit_unknown_user() {
        let console = console().await;
        assert!(edit(&console, 99, UserChanges::default()).await.is_err());
    }
}
