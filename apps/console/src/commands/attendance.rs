//! Stored attendance listing.

use anyhow::{Context, Result};
use clap::Subcommand;

use attendo_core::{LocalAttendanceRecord, SYNC_TIMESTAMP_FORMAT};

use crate::context::Console;
use crate::output::{or_dash, print_json, print_table};

#[derive(Subcommand, Debug)]
pub enum AttendanceCommand {
    /// List stored punches, oldest first
    List {
        /// Only punches of this external user id
        #[arg(long)]
        user_id: Option<i64>,
    },
}

/// Run an attendance command.
pub async fn run(console: &Console, command: AttendanceCommand) -> Result<()> {
    match command {
        AttendanceCommand::List { user_id } => {
            let records = list(console, user_id).await?;
            if console.json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No attendance records.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = records.iter().map(row).collect();
            print_table(
                &["ID", "USER_ID", "TIMESTAMP", "STATUS", "DEVICE", "SYNCED"],
                &rows,
            );
            Ok(())
        }
    }
}

pub async fn list(console: &Console, user_id: Option<i64>) -> Result<Vec<LocalAttendanceRecord>> {
    let repo = console.db.attendance();
    let records = match user_id {
        Some(user_id) => repo.list_for_user(user_id).await,
        None => repo.list().await,
    };
    records.context("Failed to list attendance")
}

fn row(record: &LocalAttendanceRecord) -> Vec<String> {
    vec![
        record.id.to_string(),
        record.user_id.to_string(),
        record.timestamp.format(SYNC_TIMESTAMP_FORMAT).to_string(),
        status_label(record),
        or_dash(record.device_ip.as_ref()),
        if record.synced { "yes" } else { "no" }.to_string(),
    ]
}

/// Known status name, else the raw terminal code.
fn status_label(record: &LocalAttendanceRecord) -> String {
    match (record.status, record.status_code) {
        (Some(status), _) => status.to_string(),
        (None, Some(code)) => format!("code {}", code),
        (None, None) => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::{AttendanceStatus, NewAttendanceRecord};
    use attendo_db::Database;
    use attendo_sync::protocol::mock::MockConnector;
    use attendo_sync::AttendoConfig;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn punch(user_id: i64, hour: u32, status: Option<AttendanceStatus>, code: i64) -> NewAttendanceRecord {
        NewAttendanceRecord {
            user_id,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            status,
            status_code: Some(code),
            device_ip: Some("10.0.0.5".into()),
            synced: false,
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_user() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.attendance();
        repo.insert(&punch(1001, 8, Some(AttendanceStatus::In), 0))
            .await
            .unwrap();
        repo.insert(&punch(1002, 9, Some(AttendanceStatus::In), 0))
            .await
            .unwrap();
        repo.insert(&punch(1001, 17, Some(AttendanceStatus::Out), 1))
            .await
            .unwrap();

        let console = Console::with_parts(AttendoConfig::default(), db, Arc::new(MockConnector::new()));

        assert_eq!(list(&console, None).await.unwrap().len(), 3);

        let alice = list(&console, Some(1001)).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.user_id == 1001));
    }

    #[tokio::test]
    async fn test_row_shows_raw_code_for_unknown_status() {
        let db = Database::in_memory().await.unwrap();
        let stored = db
            .attendance()
            .insert(&punch(1001, 8, None, 4))
            .await
            .unwrap();

        let cells = row(&stored);
        assert_eq!(cells[2], "2024-03-01 08:00:00");
        assert_eq!(cells[3], "code 4");
        assert_eq!(cells[4], "10.0.0.5");
        assert_eq!(cells[5], "no");
    }
}
