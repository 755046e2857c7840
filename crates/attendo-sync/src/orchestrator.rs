//! # Sync Orchestrator
//!
//! Runs one synchronization pass over the whole device fleet.
//!
//! ## Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_pass()            (span "sync_pass", pass_id = uuid v4)            │
//! │                                                                         │
//! │  devices = datastore.devices().list()        fresh every pass          │
//! │                                                                         │
//! │  for device in devices (in order, one at a time):                      │
//! │      ┌────────────────────────────────────────────────────────────┐    │
//! │      │ session.connect() ──✗──► failed device, next one           │    │
//! │      │        │                                                   │    │
//! │      │        ▼                                                   │    │
//! │      │ pull_users  ──✗──► recorded, continue                      │    │
//! │      │        │                                                   │    │
//! │      │        ▼                                                   │    │
//! │      │ pull_attendance ──✗──► recorded, continue                  │    │
//! │      │        │                                                   │    │
//! │      │        ▼                                                   │    │
//! │      │ session.disconnect()   (always; drop guard as fallback)    │    │
//! │      └────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  fleet non-empty and no device connected → Failure                     │
//! │  otherwise                               → Success(now)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Passes are serialized by an internal lock. `fleet_summary` takes the same
//! lock because it opens sessions too.

use std::sync::Arc;

use attendo_core::{Device, DeviceSyncReport, FleetSummary, SyncOutcome, SyncReport};
use attendo_db::Database;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::protocol::TerminalConnector;
use crate::reconcile::Reconciler;
use crate::session::{DeviceSession, SessionConfig};

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives progress of a pass (implemented by the console).
pub trait SyncEventEmitter: Send + Sync {
    /// A device is about to be synced; `position` counts from 1.
    fn device_started(&self, device: &Device, position: usize, total: usize);

    /// A device is done, successfully or not.
    fn device_finished(&self, report: &DeviceSyncReport);

    /// The pass is over.
    fn pass_finished(&self, report: &SyncReport);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn device_started(&self, _device: &Device, _position: usize, _total: usize) {}
    fn device_finished(&self, _report: &DeviceSyncReport) {}
    fn pass_finished(&self, _report: &SyncReport) {}
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Syncs every registered device.
pub struct SyncOrchestrator {
    /// Database connection.
    db: Arc<Database>,

    reconciler: Reconciler,

    /// Creates terminal clients.
    connector: Arc<dyn TerminalConnector>,

    /// Applied to every session of a pass.
    session_config: SessionConfig,

    /// Progress sink.
    emitter: Arc<dyn SyncEventEmitter>,

    /// Held for the whole of a pass or summary.
    pass_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<Database>,
        connector: Arc<dyn TerminalConnector>,
        session_config: SessionConfig,
    ) -> Self {
        Self::with_emitter(db, connector, session_config, Arc::new(NoOpEmitter))
    }

    /// Creates an orchestrator reporting progress to `emitter`.
    pub fn with_emitter(
        db: Arc<Database>,
        connector: Arc<dyn TerminalConnector>,
        session_config: SessionConfig,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncOrchestrator {
            reconciler: Reconciler::new(db.clone()),
            db,
            connector,
            session_config,
            emitter,
            pass_lock: Mutex::new(()),
        }
    }

    /// Runs a pass and returns only its outcome.
    ///
    /// Never fails: a pass that cannot even list the devices is a `Failure`.
    pub async fn sync_all(&self) -> SyncOutcome {
        match self.run_pass().await {
            Ok(report) => report.outcome,
            Err(e) => {
                error!(error = %e, "Sync pass aborted");
                SyncOutcome::Failure
            }
        }
    }

    /// Runs [`sync_all`](Self::sync_all) on a background task.
    pub fn spawn_sync_all(self: Arc<Self>) -> JoinHandle<SyncOutcome> {
        tokio::spawn(async move { self.sync_all().await })
    }

    /// Runs a pass and returns the per-device detail.
    ///
    /// ## Errors
    /// `SyncError::Storage` if the device list cannot be read. Failures on
    /// individual devices are reported in the result instead.
    pub async fn run_pass(&self) -> SyncResult<SyncReport> {
        let _guard = self.pass_lock.lock().await;

        let pass_id = Uuid::new_v4().to_string();
        let span = info_span!("sync_pass", pass_id = %pass_id);
        self.run_devices(pass_id).instrument(span).await
    }

    async fn run_devices(&self, pass_id: String) -> SyncResult<SyncReport> {
        let devices = self.db.devices().list().await?;
        let total = devices.len();
        info!(devices = total, "Sync pass started");

        let mut reports = Vec::with_capacity(total);
        for (index, device) in devices.iter().enumerate() {
            self.emitter.device_started(device, index + 1, total);
            let report = self.sync_device(device).await;
            self.emitter.device_finished(&report);
            reports.push(report);
        }

        let connected = reports.iter().filter(|r| r.connected).count();
        let outcome = if total > 0 && connected == 0 {
            SyncOutcome::Failure
        } else {
            SyncOutcome::success_now()
        };

        let report = SyncReport {
            pass_id,
            outcome,
            devices: reports,
        };

        if outcome.is_success() {
            info!(
                connected,
                failed = report.failed_count(),
                "Sync pass finished"
            );
        } else {
            warn!(failed = report.failed_count(), "Sync pass failed: no device reachable");
        }

        self.emitter.pass_finished(&report);
        Ok(report)
    }

    /// Syncs one device: users, then attendance, then release.
    async fn sync_device(&self, device: &Device) -> DeviceSyncReport {
        let mut report = DeviceSyncReport::new(device);
        let mut session =
            DeviceSession::new(device, self.session_config.clone(), self.connector.clone());

        if let Err(e) = session.connect().await {
            warn!(device = %device.name, address = %report.address, error = %e, "Device unreachable");
            report.errors.push(e.to_string());
            return report;
        }
        report.connected = true;

        match self.reconciler.pull_users(&mut session, device).await {
            Ok(summary) => {
                report.users_processed = summary.processed();
                report.users_skipped = summary.skipped;
            }
            Err(e) => {
                warn!(device = %device.name, error = %e, "User pull failed");
                report.errors.push(format!("users: {e}"));
            }
        }

        match self.reconciler.pull_attendance(&mut session, &device.ip).await {
            Ok(summary) => {
                report.attendance_inserted = summary.inserted;
                report.attendance_duplicates = summary.duplicates;
                report.attendance_skipped = summary.skipped;
            }
            Err(e) => {
                warn!(device = %device.name, error = %e, "Attendance pull failed");
                report.errors.push(format!("attendance: {e}"));
            }
        }

        if let Err(e) = session.disconnect().await {
            report.errors.push(format!("disconnect: {e}"));
        }

        debug!(
            device = %device.name,
            users = report.users_processed,
            attendance = report.attendance_inserted,
            errors = report.errors.len(),
            "Device done"
        );
        report
    }

    /// Counts devices, reachable devices and local users.
    ///
    /// Reachability is a connect, probe and disconnect with the confirmation
    /// tone muted. Nothing is pulled or written.
    pub async fn fleet_summary(&self) -> SyncResult<FleetSummary> {
        let _guard = self.pass_lock.lock().await;

        let devices = self.db.devices().list().await?;
        let config = SessionConfig {
            confirm_tone: false,
            ..self.session_config.clone()
        };

        let mut connected_count = 0;
        for device in &devices {
            let mut session = DeviceSession::new(device, config.clone(), self.connector.clone());
            if session.connect().await.is_ok() && session.is_connected().await {
                connected_count += 1;
            }
            if let Err(e) = session.disconnect().await {
                debug!(device = %device.name, error = %e, "Disconnect after probe failed");
            }
        }

        let user_count = self.db.users().count().await?;

        Ok(FleetSummary {
            device_count: devices.len(),
            connected_count,
            user_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::mock::{MockConnector, MockOp, MockTerminal};
    use attendo_core::{NewDevice, Privilege, RemoteAttendanceRecord, RemoteUser};
    use chrono::NaiveDate;
    use std::sync::Mutex as StdMutex;

    fn new_device(serial: &str, ip: &str) -> NewDevice {
        NewDevice {
            name: format!("Terminal {serial}"),
            device_model: "K40".to_string(),
            serial_number: serial.to_string(),
            ip: ip.to_string(),
            port: 4370,
        }
    }

    fn users(count: u16) -> Vec<RemoteUser> {
        (1..=count)
            .map(|uid| RemoteUser {
                uid,
                name: format!("User {uid}"),
                privilege: Privilege::User,
                password: String::new(),
                group_id: "1".to_string(),
                user_id: (100 + uid).to_string(),
                card: 0,
            })
            .collect()
    }

    async fn fleet(ips: &[&str]) -> Arc<Database> {
        let db = Arc::new(Database::in_memory().await.unwrap());
        for (i, ip) in ips.iter().enumerate() {
            db.devices()
                .insert(&new_device(&format!("SN00{}", i + 1), ip))
                .await
                .unwrap();
        }
        db
    }

    fn orchestrator(db: Arc<Database>, connector: MockConnector) -> SyncOrchestrator {
        SyncOrchestrator::new(db, Arc::new(connector), SessionConfig::default())
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: StdMutex<Vec<String>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn device_started(&self, device: &Device, position: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {position}/{total}", device.serial_number));
        }

        fn device_finished(&self, report: &DeviceSyncReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {} {}", report.device_name, report.connected));
        }

        fn pass_finished(&self, report: &SyncReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("pass {}", report.outcome.is_success()));
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_success() {
        let db = fleet(&["10.0.0.5", "10.0.0.6"]).await;
        let connector = MockConnector::new();
        let reachable = MockTerminal::new().with_users(users(5));
        connector.register("10.0.0.5", reachable.clone());
        // 10.0.0.6 is not registered: refused

        let report = orchestrator(db.clone(), connector).run_pass().await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.connected_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.devices[0].users_processed, 5);
        assert_eq!(report.devices[1].users_processed, 0);
        assert!(!report.devices[1].errors.is_empty());

        assert_eq!(db.users().count().await.unwrap(), 5);
        assert!(!reachable.is_open());
        assert!(!reachable.is_ui_disabled());
    }

    #[tokio::test]
    async fn test_all_unreachable_is_failure() {
        let db = fleet(&["10.0.0.5", "10.0.0.6"]).await;
        let outcome = orchestrator(db, MockConnector::new()).sync_all().await;
        assert_eq!(outcome, SyncOutcome::Failure);
    }

    #[tokio::test]
    async fn test_empty_fleet_is_success() {
        let db = fleet(&[]).await;
        let outcome = orchestrator(db, MockConnector::new()).sync_all().await;
        assert!(outcome.is_success());
        assert!(outcome.completed_at_label().is_some());
    }

    #[tokio::test]
    async fn test_first_device_down_does_not_block_the_rest() {
        let db = fleet(&["10.0.0.5", "10.0.0.6"]).await;
        let connector = MockConnector::new();
        let second = MockTerminal::new().with_users(users(2));
        connector.register("10.0.0.6", second.clone());

        let report = orchestrator(db.clone(), connector).run_pass().await.unwrap();
        assert!(!report.devices[0].connected);
        assert!(report.devices[1].connected);
        assert_eq!(second.count(MockOp::GetUsers), 1);
        assert_eq!(db.users().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pull_failure_still_releases_terminal() {
        let db = fleet(&["10.0.0.5"]).await;
        let connector = MockConnector::new();
        let terminal = MockTerminal::new().with_users(users(1));
        terminal.fail_on(MockOp::GetUsers, ProtocolError::Malformed("garbled".into()));
        connector.register("10.0.0.5", terminal.clone());

        let report = orchestrator(db, connector).run_pass().await.unwrap();
        assert!(report.outcome.is_success());
        assert!(report.devices[0].connected);
        assert!(!report.devices[0].is_clean());
        assert!(report.devices[0].errors[0].starts_with("users:"));

        assert_eq!(terminal.count(MockOp::Enable), 1);
        assert_eq!(terminal.count(MockOp::Close), 1);
        assert!(!terminal.is_ui_disabled());
        assert!(!terminal.is_open());
    }

    fn punch(user_id: &str) -> RemoteAttendanceRecord {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        RemoteAttendanceRecord::new(1, user_id, at, 0, 1)
    }

    #[tokio::test]
    async fn test_failed_user_pull_still_pulls_attendance() {
        let db = fleet(&["10.0.0.5"]).await;
        let connector = MockConnector::new();
        let terminal = MockTerminal::new()
            .with_users(users(1))
            .with_attendance(vec![punch("101")]);
        terminal.fail_next(MockOp::GetUsers, ProtocolError::Malformed("one bad frame".into()));
        connector.register("10.0.0.5", terminal.clone());

        let report = orchestrator(db.clone(), connector).run_pass().await.unwrap();
        assert!(report.outcome.is_success());

        let device = &report.devices[0];
        assert_eq!(device.users_processed, 0);
        assert_eq!(device.attendance_inserted, 1);
        assert_eq!(device.errors.len(), 1);
        assert!(device.errors[0].starts_with("users:"));

        // the failed download is not repeated within the pass
        assert_eq!(terminal.count(MockOp::GetUsers), 1);
        assert_eq!(terminal.count(MockOp::Open), 1);
        assert_eq!(db.attendance().count().await.unwrap(), 1);
        assert!(!terminal.is_open());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_only_that_pull() {
        let db = fleet(&["10.0.0.5", "10.0.0.6"]).await;
        let connector = MockConnector::new();
        let first = MockTerminal::new()
            .with_users(users(2))
            .with_attendance(vec![punch("101")]);
        let second = MockTerminal::new()
            .with_users(users(3))
            .with_attendance(vec![punch("102")]);
        connector.register("10.0.0.5", first.clone());
        connector.register("10.0.0.6", second.clone());

        sqlx::query("DROP TABLE attendance")
            .execute(db.pool())
            .await
            .unwrap();

        let report = orchestrator(db.clone(), connector).run_pass().await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.connected_count(), 2);

        for device in &report.devices {
            assert_eq!(device.errors.len(), 1);
            assert!(device.errors[0].starts_with("attendance: Storage error"));
            assert_eq!(device.attendance_inserted, 0);
        }
        assert_eq!(report.devices[0].users_processed, 2);
        assert_eq!(report.devices[1].users_processed, 3);
        assert_eq!(db.users().count().await.unwrap(), 3);

        for terminal in [&first, &second] {
            assert!(!terminal.is_open());
            assert!(!terminal.is_ui_disabled());
        }
    }

    #[tokio::test]
    async fn test_users_before_attendance() {
        let db = fleet(&["10.0.0.5"]).await;
        let connector = MockConnector::new();
        let punch_time = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap();
        let terminal = MockTerminal::new()
            .with_users(users(1))
            .with_attendance(vec![RemoteAttendanceRecord::new(1, "101", punch_time, 0, 1)]);
        connector.register("10.0.0.5", terminal.clone());

        let orchestrator = orchestrator(db.clone(), connector);
        let report = orchestrator.run_pass().await.unwrap();
        assert_eq!(report.devices[0].attendance_inserted, 1);

        let calls = terminal.calls();
        let users_at = calls.iter().position(|c| *c == MockOp::GetUsers).unwrap();
        let punches_at = calls.iter().position(|c| *c == MockOp::GetAttendance).unwrap();
        assert!(users_at < punches_at);

        // second pass: same punch is a duplicate
        let report = orchestrator.run_pass().await.unwrap();
        assert_eq!(report.devices[0].attendance_inserted, 0);
        assert_eq!(report.devices[0].attendance_duplicates, 1);
        assert_eq!(db.attendance().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_emitter_sees_progress() {
        let db = fleet(&["10.0.0.5", "10.0.0.6"]).await;
        let connector = MockConnector::new();
        connector.register("10.0.0.5", MockTerminal::new());
        let emitter = Arc::new(RecordingEmitter::default());

        let orchestrator = SyncOrchestrator::with_emitter(
            db,
            Arc::new(connector),
            SessionConfig::default(),
            emitter.clone(),
        );
        orchestrator.sync_all().await;

        let events = emitter.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start SN001 1/2",
                "done Terminal SN001 true",
                "start SN002 2/2",
                "done Terminal SN002 false",
                "pass true",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawned_pass() {
        let db = fleet(&["10.0.0.5"]).await;
        let connector = MockConnector::new();
        connector.register("10.0.0.5", MockTerminal::new().with_users(users(3)));

        let orchestrator = Arc::new(orchestrator(db.clone(), connector));
        let outcome = orchestrator.clone().spawn_sync_all().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(db.users().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fleet_summary() {
        let db = fleet(&["10.0.0.5", "10.0.0.6", "10.0.0.7"]).await;
        let connector = MockConnector::new();
        let up = MockTerminal::new().with_users(users(4));
        connector.register("10.0.0.5", up.clone());
        connector.register("10.0.0.6", MockTerminal::new());

        let orchestrator = orchestrator(db.clone(), connector);
        orchestrator.run_pass().await.unwrap();

        let summary = orchestrator.fleet_summary().await.unwrap();
        assert_eq!(summary.device_count, 3);
        assert_eq!(summary.connected_count, 2);
        assert_eq!(summary.user_count, 4);
        assert_eq!(summary.devices_label(), "3/2");

        // the probe pulls nothing and stays silent
        assert_eq!(up.count(MockOp::GetUsers), 1);
        assert_eq!(up.voices().len(), 1);
        assert!(!up.is_ui_disabled());
    }
}
