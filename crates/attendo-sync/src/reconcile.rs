//! # Reconciliation
//!
//! Merges one terminal's users and attendance log into the local datastore.
//!
//! ## Merge Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         pull_users                                      │
//! │                                                                         │
//! │  remote user ──► coerce user_id / group_id ──✗──► skip (warn)          │
//! │                        │                                                │
//! │                        ▼ key = external user_id (not the row id)       │
//! │              ┌─────────┴──────────┐                                     │
//! │              ▼                    ▼                                     │
//! │         found: overwrite     absent: insert                            │
//! │         name, privilege,                                               │
//! │         password, group,                                               │
//! │         owning device                                                  │
//! │                                                                         │
//! │                       pull_attendance                                   │
//! │                                                                         │
//! │  remote punch ──► coerce user_id ──✗──► skip (warn)                    │
//! │                        │                                                │
//! │                        ▼ key = (user_id, exact timestamp)              │
//! │              ┌─────────┴──────────┐                                     │
//! │              ▼                    ▼                                     │
//! │         exists: leave it     absent: insert (device ip, unsynced)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each lookup + write runs in its own transaction. A storage error aborts
//! the pull; rows already written stay written.

use std::sync::Arc;

use attendo_core::Device;
use attendo_db::{Database, UpsertOutcome};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::session::DeviceSession;

/// Counts from one user pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserPullSummary {
    /// Users reported by the terminal.
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Users whose ids could not be coerced.
    pub skipped: usize,
}

impl UserPullSummary {
    /// Users written locally, inserted or updated.
    pub fn processed(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Counts from one attendance pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendancePullSummary {
    /// Punches reported by the terminal.
    pub fetched: usize,
    /// Punches newly stored.
    pub inserted: usize,
    /// Punches already stored.
    pub duplicates: usize,
    /// Punches whose user id could not be coerced.
    pub skipped: usize,
}

/// Pulls terminal state into the datastore.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Reconciler { db }
    }

    /// Pulls every enrolled user of `device` and upserts by external user_id.
    ///
    /// ## Arguments
    /// * `session` - connected session to the terminal
    /// * `device` - registered device, recorded as the owner of each user
    ///
    /// ## Errors
    /// * `SyncError::NotConnected` - the liveness probe failed
    /// * `SyncError::Device` - the terminal failed the download
    /// * `SyncError::Storage` - a write failed; the pull stops there
    pub async fn pull_users(
        &self,
        session: &mut DeviceSession,
        device: &Device,
    ) -> SyncResult<UserPullSummary> {
        if !session.is_connected().await {
            return Err(SyncError::NotConnected);
        }

        let remote = session.list_users().await?;
        let repo = self.db.users();
        let mut summary = UserPullSummary {
            fetched: remote.len(),
            ..Default::default()
        };

        for user in &remote {
            let local = match user.to_local(Some(device.id)) {
                Ok(local) => local,
                Err(e) => {
                    let err = SyncError::from(e);
                    warn!(
                        device = %device.name,
                        uid = user.uid,
                        user_id = %user.user_id,
                        error = %err,
                        "Skipping terminal user"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            match repo.upsert_by_user_id(&local).await? {
                UpsertOutcome::Inserted(_) => summary.inserted += 1,
                UpsertOutcome::Updated(_) => summary.updated += 1,
            }
        }

        info!(
            device = %device.name,
            fetched = summary.fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "Users pulled"
        );
        Ok(summary)
    }

    /// Pulls the attendance log and stores punches not yet present.
    ///
    /// ## Arguments
    /// * `session` - connected session to the terminal
    /// * `device_ip` - stamped on every stored punch
    ///
    /// ## Returns
    /// Counts; `inserted` excludes duplicates. An empty log is a success with
    /// zero counts.
    pub async fn pull_attendance(
        &self,
        session: &mut DeviceSession,
        device_ip: &str,
    ) -> SyncResult<AttendancePullSummary> {
        if !session.is_connected().await {
            return Err(SyncError::NotConnected);
        }

        let remote = session.list_attendance().await?;
        let mut summary = AttendancePullSummary {
            fetched: remote.len(),
            ..Default::default()
        };
        if remote.is_empty() {
            info!(ip = %device_ip, "No attendance records on terminal");
            return Ok(summary);
        }

        let repo = self.db.attendance();
        for record in &remote {
            let local = match record.to_local(device_ip) {
                Ok(local) => local,
                Err(e) => {
                    let err = SyncError::from(e);
                    warn!(ip = %device_ip, user_id = %record.user_id, error = %err, "Skipping punch");
                    summary.skipped += 1;
                    continue;
                }
            };

            if local.status.is_none() {
                warn!(
                    ip = %device_ip,
                    user_id = local.user_id,
                    timestamp = %local.timestamp,
                    status_code = record.status_code,
                    "Unknown attendance status, storing raw code"
                );
            }

            match repo.insert_if_absent(&local).await? {
                Some(_) => summary.inserted += 1,
                None => summary.duplicates += 1,
            }
        }

        if summary.inserted == 0 {
            debug!(ip = %device_ip, duplicates = summary.duplicates, "No new attendance records");
        }
        info!(
            ip = %device_ip,
            fetched = summary.fetched,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Attendance pulled"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::mock::{MockConnector, MockOp, MockTerminal};
    use crate::session::SessionConfig;
    use attendo_core::{
        AttendanceStatus, NewDevice, Privilege, RemoteAttendanceRecord, RemoteUser,
    };
    use chrono::{NaiveDate, NaiveDateTime};

    const IP: &str = "10.0.0.5";

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    fn remote(uid: u16, user_id: &str, name: &str) -> RemoteUser {
        RemoteUser {
            uid,
            name: name.to_string(),
            privilege: Privilege::User,
            password: String::new(),
            group_id: "1".to_string(),
            user_id: user_id.to_string(),
            card: 0,
        }
    }

    async fn setup(terminal: &MockTerminal) -> (Arc<Database>, Device, DeviceSession) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let device = db
            .devices()
            .insert(&NewDevice {
                name: "Front door".to_string(),
                device_model: "K40".to_string(),
                serial_number: "SN001".to_string(),
                ip: IP.to_string(),
                port: 4370,
            })
            .await
            .unwrap();

        let connector = MockConnector::new();
        connector.register(IP, terminal.clone());
        let mut session = DeviceSession::new(&device, SessionConfig::default(), Arc::new(connector));
        session.connect().await.unwrap();

        (db, device, session)
    }

    #[tokio::test]
    async fn test_pull_users_is_idempotent() {
        let terminal = MockTerminal::new().with_users(vec![remote(1, "100", "Alice")]);
        let (db, device, mut session) = setup(&terminal).await;
        let reconciler = Reconciler::new(db.clone());

        let first = reconciler.pull_users(&mut session, &device).await.unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(first.processed(), 1);

        let second = reconciler.pull_users(&mut session, &device).await.unwrap();
        assert_eq!(second.updated, 1);
        assert_eq!(second.processed(), 1);

        let users = db.users().list().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, 100);
        assert_eq!(users[0].name, "Alice");
        assert_eq!(users[0].group_id, 1);
        assert_eq!(users[0].device_id, Some(device.id));

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_users_updates_in_place() {
        let terminal = MockTerminal::new().with_users(vec![remote(1, "100", "Alice")]);
        let (db, device, mut session) = setup(&terminal).await;
        let reconciler = Reconciler::new(db.clone());

        reconciler.pull_users(&mut session, &device).await.unwrap();
        let stored = db.users().get_by_user_id(100).await.unwrap().unwrap();

        let mut admin = remote(1, "100", "Alice Smith");
        admin.privilege = Privilege::Admin;
        terminal.replace_users(vec![admin]);

        reconciler.pull_users(&mut session, &device).await.unwrap();
        let updated = db.users().get_by_user_id(100).await.unwrap().unwrap();
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.name, "Alice Smith");
        assert_eq!(updated.privilege, Privilege::Admin);
        assert_eq!(updated.created_at, stored.created_at);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_user_id_skips_only_that_record() {
        let mut blank_group = remote(3, "102", "Carol");
        blank_group.group_id = String::new();
        let terminal = MockTerminal::new().with_users(vec![
            remote(1, "100", "Alice"),
            remote(2, "A12", "Bob"),
            blank_group,
        ]);
        let (db, device, mut session) = setup(&terminal).await;

        let summary = Reconciler::new(db.clone())
            .pull_users(&mut session, &device)
            .await
            .unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.skipped, 1);

        let carol = db.users().get_by_user_id(102).await.unwrap().unwrap();
        assert_eq!(carol.group_id, 0);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_requires_live_session() {
        let terminal = MockTerminal::new().with_users(vec![remote(1, "100", "Alice")]);
        let (db, device, mut session) = setup(&terminal).await;
        let reconciler = Reconciler::new(db.clone());

        terminal.fail_next(MockOp::GetTime, ProtocolError::Timeout);
        let err = reconciler.pull_users(&mut session, &device).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));
        assert_eq!(terminal.count(MockOp::GetUsers), 0);

        // the link is still open and answers the next probe
        let summary = reconciler.pull_attendance(&mut session, IP).await.unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(terminal.count(MockOp::GetAttendance), 1);

        terminal.fail_on(MockOp::GetTime, ProtocolError::Io("reset by peer".into()));
        let err = reconciler.pull_attendance(&mut session, IP).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));
        assert_eq!(terminal.count(MockOp::GetAttendance), 1);

        session.disconnect().await.unwrap();
        assert!(!terminal.is_ui_disabled());
    }

    #[tokio::test]
    async fn test_pull_attendance_dedupes() {
        let terminal = MockTerminal::new()
            .with_attendance(vec![RemoteAttendanceRecord::new(1, "100", at(8, 0), 0, 1)]);
        let (db, _device, mut session) = setup(&terminal).await;
        let reconciler = Reconciler::new(db.clone());

        let first = reconciler.pull_attendance(&mut session, IP).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = reconciler.pull_attendance(&mut session, IP).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);

        let records = db.attendance().list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, 100);
        assert_eq!(records[0].timestamp, at(8, 0));
        assert_eq!(records[0].status, Some(AttendanceStatus::In));
        assert_eq!(records[0].device_ip.as_deref(), Some(IP));
        assert!(!records[0].synced);

        // same user, new time: a new event
        terminal.push_attendance(RemoteAttendanceRecord::new(1, "100", at(17, 0), 1, 1));
        let third = reconciler.pull_attendance(&mut session, IP).await.unwrap();
        assert_eq!(third.inserted, 1);
        assert_eq!(third.duplicates, 1);
        assert_eq!(db.attendance().count().await.unwrap(), 2);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_log_is_success() {
        let terminal = MockTerminal::new();
        let (db, _device, mut session) = setup(&terminal).await;

        let summary = Reconciler::new(db)
            .pull_attendance(&mut session, IP)
            .await
            .unwrap();
        assert_eq!(summary, AttendancePullSummary::default());

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_status_kept_with_raw_code() {
        let terminal = MockTerminal::new().with_attendance(vec![
            RemoteAttendanceRecord::new(1, "100", at(12, 0), 4, 1),
            RemoteAttendanceRecord::new(2, "X9", at(12, 5), 0, 1),
        ]);
        let (db, _device, mut session) = setup(&terminal).await;

        let summary = Reconciler::new(db.clone())
            .pull_attendance(&mut session, IP)
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);

        let stored = &db.attendance().list().await.unwrap()[0];
        assert_eq!(stored.status, None);
        assert_eq!(stored.status_code, Some(4));

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_failure_aborts_pull() {
        let terminal = MockTerminal::new().with_users(vec![remote(1, "100", "Alice")]);
        let (db, device, mut session) = setup(&terminal).await;

        terminal.fail_next(MockOp::GetUsers, ProtocolError::Malformed("short read".into()));
        let err = Reconciler::new(db.clone())
            .pull_users(&mut session, &device)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Device { .. }));
        assert!(err.aborts_pull());
        assert_eq!(db.users().count().await.unwrap(), 0);

        session.disconnect().await.unwrap();
    }
}
