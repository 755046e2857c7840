//! In-memory terminals for tests.
//!
//! A [`MockTerminal`] is a handle to shared state: the clone handed to a
//! session and the clone kept by the test observe the same users, punches and
//! call log.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use attendo_core::{RemoteAttendanceRecord, RemoteUser};
use chrono::{NaiveDate, NaiveDateTime};

use super::packet::{CMD_ACK_ERROR, CMD_DELETE_USER};
use super::{Endpoint, TerminalClient, TerminalConnector};
use crate::error::ProtocolError;

/// Terminal operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Close,
    Disable,
    Enable,
    TestVoice,
    GetTime,
    GetUsers,
    GetAttendance,
    SetUser,
    DeleteUser,
    Refresh,
}

#[derive(Debug)]
struct Inner {
    users: Vec<RemoteUser>,
    attendance: Vec<RemoteAttendanceRecord>,
    clock: NaiveDateTime,
    open: bool,
    ui_disabled: bool,
    voices: Vec<u32>,
    calls: Vec<MockOp>,
    fail_always: HashMap<MockOp, ProtocolError>,
    fail_once: HashMap<MockOp, ProtocolError>,
    hang: HashSet<MockOp>,
    delay: HashMap<MockOp, Duration>,
}

/// A scriptable terminal.
#[derive(Debug, Clone)]
pub struct MockTerminal {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTerminal {
    pub fn new() -> Self {
        let clock = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap_or_default();

        MockTerminal {
            inner: Arc::new(Mutex::new(Inner {
                users: Vec::new(),
                attendance: Vec::new(),
                clock,
                open: false,
                ui_disabled: false,
                voices: Vec::new(),
                calls: Vec::new(),
                fail_always: HashMap::new(),
                fail_once: HashMap::new(),
                hang: HashSet::new(),
                delay: HashMap::new(),
            })),
        }
    }

    /// A terminal that refuses every connection.
    pub fn unreachable() -> Self {
        let terminal = Self::new();
        terminal.fail_on(
            MockOp::Open,
            ProtocolError::ConnectionRefused("connection refused".into()),
        );
        terminal
    }

    pub fn with_users(self, users: Vec<RemoteUser>) -> Self {
        self.lock().users = users;
        self
    }

    pub fn with_attendance(self, attendance: Vec<RemoteAttendanceRecord>) -> Self {
        self.lock().attendance = attendance;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Makes every call of `op` fail with `err`.
    pub fn fail_on(&self, op: MockOp, err: ProtocolError) {
        self.lock().fail_always.insert(op, err);
    }

    /// Makes the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: MockOp, err: ProtocolError) {
        self.lock().fail_once.insert(op, err);
    }

    /// Makes every call of `op` wait forever.
    pub fn hang_on(&self, op: MockOp) {
        self.lock().hang.insert(op);
    }

    /// Makes every call of `op` take `delay` before answering.
    pub fn delay_on(&self, op: MockOp, delay: Duration) {
        self.lock().delay.insert(op, delay);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.fail_always.clear();
        inner.fail_once.clear();
        inner.hang.clear();
        inner.delay.clear();
    }

    pub fn replace_users(&self, users: Vec<RemoteUser>) {
        self.lock().users = users;
    }

    pub fn push_attendance(&self, record: RemoteAttendanceRecord) {
        self.lock().attendance.push(record);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn users(&self) -> Vec<RemoteUser> {
        self.lock().users.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn is_ui_disabled(&self) -> bool {
        self.lock().ui_disabled
    }

    pub fn voices(&self) -> Vec<u32> {
        self.lock().voices.clone()
    }

    pub fn calls(&self) -> Vec<MockOp> {
        self.lock().calls.clone()
    }

    /// Number of times `op` was invoked.
    pub fn count(&self, op: MockOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Records the call and applies scripted behavior.
    async fn step(&self, op: MockOp) -> Result<(), ProtocolError> {
        let (hang, delay) = {
            let mut inner = self.lock();
            inner.calls.push(op);

            if let Some(err) = inner.fail_once.remove(&op) {
                return Err(err);
            }
            if let Some(err) = inner.fail_always.get(&op) {
                return Err(err.clone());
            }
            if !matches!(op, MockOp::Open | MockOp::Close) && !inner.open {
                return Err(ProtocolError::NotConnected);
            }
            (inner.hang.contains(&op), inner.delay.get(&op).copied())
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl TerminalClient for MockTerminal {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        self.step(MockOp::Open).await?;
        self.lock().open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.step(MockOp::Close).await;
        self.lock().open = false;
        result
    }

    async fn disable_device(&mut self) -> Result<(), ProtocolError> {
        self.step(MockOp::Disable).await?;
        self.lock().ui_disabled = true;
        Ok(())
    }

    async fn enable_device(&mut self) -> Result<(), ProtocolError> {
        self.step(MockOp::Enable).await?;
        self.lock().ui_disabled = false;
        Ok(())
    }

    async fn test_voice(&mut self, index: u32) -> Result<(), ProtocolError> {
        self.step(MockOp::TestVoice).await?;
        self.lock().voices.push(index);
        Ok(())
    }

    async fn get_time(&mut self) -> Result<NaiveDateTime, ProtocolError> {
        self.step(MockOp::GetTime).await?;
        Ok(self.lock().clock)
    }

    async fn get_users(&mut self) -> Result<Vec<RemoteUser>, ProtocolError> {
        self.step(MockOp::GetUsers).await?;
        Ok(self.lock().users.clone())
    }

    async fn get_attendance(&mut self) -> Result<Vec<RemoteAttendanceRecord>, ProtocolError> {
        self.step(MockOp::GetAttendance).await?;
        Ok(self.lock().attendance.clone())
    }

    async fn set_user(&mut self, user: &RemoteUser) -> Result<(), ProtocolError> {
        self.step(MockOp::SetUser).await?;
        let mut inner = self.lock();
        match inner.users.iter_mut().find(|u| u.uid == user.uid) {
            Some(slot) => *slot = user.clone(),
            None => inner.users.push(user.clone()),
        }
        Ok(())
    }

    async fn delete_user(&mut self, uid: u16) -> Result<(), ProtocolError> {
        self.step(MockOp::DeleteUser).await?;
        let mut inner = self.lock();
        let before = inner.users.len();
        inner.users.retain(|u| u.uid != uid);
        if inner.users.len() == before {
            return Err(ProtocolError::CommandRejected {
                command: CMD_DELETE_USER,
                reply: CMD_ACK_ERROR,
            });
        }
        Ok(())
    }

    async fn refresh_data(&mut self) -> Result<(), ProtocolError> {
        self.step(MockOp::Refresh).await
    }
}

/// Hands out registered mock terminals by IP. Unknown IPs refuse connections.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    terminals: Arc<Mutex<HashMap<String, MockTerminal>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ip: impl Into<String>, terminal: MockTerminal) {
        self.terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip.into(), terminal);
    }

    pub fn terminal(&self, ip: &str) -> Option<MockTerminal> {
        self.terminals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ip)
            .cloned()
    }
}

impl TerminalConnector for MockConnector {
    fn client_for(&self, endpoint: &Endpoint) -> Box<dyn TerminalClient> {
        Box::new(
            self.terminal(&endpoint.ip)
                .unwrap_or_else(MockTerminal::unreachable),
        )
    }
}
