//! # Sync Command
//!
//! Runs a pass over every registered terminal on a background task while the
//! foreground prints progress.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  foreground                         background task                     │
//! │                                                                         │
//! │  spawn_sync_all() ───────────────►  SyncOrchestrator::sync_all          │
//! │       │                               │ device 1: connect, users,       │
//! │       │  ◄──── DeviceStarted ──────── │           attendance, release   │
//! │  print line                           │ device 2: ...                   │
//! │       │  ◄──── DeviceFinished ─────── │                                 │
//! │  print line                           │                                 │
//! │       │  ◄──── PassFinished ───────── ▼                                 │
//! │  await JoinHandle ──► SyncOutcome                                       │
//! │                                                                         │
//! │  Success: "Last sync: YYYY-MM-DD HH:MM:SS"     exit 0                  │
//! │  Failure: "Sync failed: ..."                   exit 1                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use attendo_core::{SyncOutcome, SyncReport};
use attendo_sync::SyncEventEmitter;

use crate::context::Console;
use crate::output::print_json;
use crate::progress::{render, ChannelEmitter, ProgressEvent};

/// Run the sync command.
///
/// ## Returns
/// `Ok(true)` when the pass succeeded, `Ok(false)` when no terminal could be
/// reached.
pub async fn run(console: &Console) -> Result<bool> {
    let show_progress = !console.json;
    let (outcome, report) = execute(console, |event| {
        if show_progress {
            println!("{}", render(event));
        }
    })
    .await?;

    if console.json {
        print_json(&json!({ "outcome": outcome, "report": report }))?;
        return Ok(outcome.is_success());
    }

    match outcome.completed_at_label() {
        Some(label) => println!("Last sync: {}", label),
        None => println!("Sync failed: no registered device could be reached"),
    }

    Ok(outcome.is_success())
}

/// Spawns the pass and feeds every progress event to `on_event` until the
/// pass ends.
pub async fn execute(
    console: &Console,
    mut on_event: impl FnMut(&ProgressEvent),
) -> Result<(SyncOutcome, Option<SyncReport>)> {
    let (emitter, mut events) = ChannelEmitter::channel();
    let emitter: Arc<dyn SyncEventEmitter> = Arc::new(emitter);
    let handle = console.orchestrator(Some(emitter)).spawn_sync_all();

    info!("Sync dispatched");

    let mut report = None;
    // The channel closes when the task drops the orchestrator.
    while let Some(event) = events.recv().await {
        on_event(&event);
        if let ProgressEvent::PassFinished(finished) = event {
            report = Some(finished);
        }
    }

    let outcome = handle.await.context("Sync task failed")?;
    Ok((outcome, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::validation::DeviceForm;
    use attendo_core::{Privilege, RemoteAttendanceRecord, RemoteUser};
    use attendo_db::Database;
    use attendo_sync::protocol::mock::{MockConnector, MockTerminal};
    use attendo_sync::AttendoConfig;
    use chrono::NaiveDate;

    async fn console_with(terminals: Vec<(&str, MockTerminal)>) -> Console {
        let connector = MockConnector::new();
        let db = Database::in_memory().await.unwrap();
        let console = Console::with_parts(AttendoConfig::default(), db, Arc::new(connector.clone()));

        for (i, (ip, terminal)) in terminals.into_iter().enumerate() {
            connector.register(ip, terminal);
            let form = DeviceForm {
                name: format!("Door {}", i + 1),
                device_model: "K40".into(),
                serial_number: format!("SN{:03}", i + 1),
                ip: ip.into(),
                port: "4370".into(),
            };
            crate::commands::device::add(&console, form).await.unwrap();
        }
        console
    }

    fn alice() -> RemoteUser {
        RemoteUser {
            uid: 1,
            name: "Alice".into(),
            privilege: Privilege::User,
            password: String::new(),
            group_id: String::new(),
            user_id: "1001".into(),
            card: 0,
        }
    }

    fn punch() -> RemoteAttendanceRecord {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        RemoteAttendanceRecord::new(1, "1001", at, 0, 0)
    }

    #[tokio::test]
    async fn test_sync_reports_progress_per_device() {
        let reachable = MockTerminal::new()
            .with_users(vec![alice()])
            .with_attendance(vec![punch()]);
        let console = console_with(vec![
            ("10.0.0.5", reachable),
            ("10.0.0.6", MockTerminal::unreachable()),
        ])
        .await;

        let mut lines = Vec::new();
        let (outcome, report) = execute(&console, |event| lines.push(render(event)))
            .await
            .unwrap();

        assert!(outcome.is_success());
        // started + finished per device, then the pass
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("[1/2] Door 1"));
        assert!(lines[3].contains("unreachable"));

        let report = report.unwrap();
        assert_eq!(report.connected_count(), 1);
        assert_eq!(report.failed_count(), 1);

        assert_eq!(console.db.users().count().await.unwrap(), 1);
        assert_eq!(console.db.attendance().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_fails_when_nothing_reachable() {
        let console = console_with(vec![("10.0.0.5", MockTerminal::unreachable())]).await;

        let (outcome, _) = execute(&console, |_| {}).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Failure);
        assert!(!run(&console).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_with_no_devices_succeeds() {
        let console = console_with(Vec::new()).await;
        assert!(run(&console).await.unwrap());
    }
}
