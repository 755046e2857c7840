//! # Device Session
//!
//! One connection lifecycle to one terminal.
//!
//! ## State Machine
//! ```text
//!                 connect()
//! ┌──────────────┐ ───────► ┌────────────┐  open + disable UI  ┌───────────┐
//! │ Disconnected │          │ Connecting │ ──────────────────► │ Connected │
//! └──────────────┘ ◄─────── └────────────┘                     └───────────┘
//!        ▲           failure                                       │   │
//!        │                                                         │   │
//!        │  probe or operation failure (demoted, link kept)        │   │
//!        ├─────────────────────────────────────────────────────────┘   │
//!        │  disconnect(): enable UI + close                            │
//!        └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Release Guarantee
//! While the link is open the terminal's keypad is locked. `disconnect()`
//! unlocks and closes it even after a demotion. A session dropped without
//! `disconnect()` spawns the same release on the current Tokio runtime.
//!
//! Every network call is bounded by [`SessionConfig::timeout`], except the
//! user and attendance downloads, which get [`SessionConfig::bulk_timeout`]
//! for the whole transfer. Failures are never retried here; they demote the
//! session and surface to the caller. Only [`DeviceSession::is_connected`] may bring a demoted session back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use attendo_core::{
    Device, RemoteAttendanceRecord, RemoteUser, RemoteUserPatch, DEFAULT_BULK_TIMEOUT_SECS,
    DEFAULT_DEVICE_PASSWORD, DEFAULT_SESSION_TIMEOUT_SECS,
};
use tracing::{debug, info, warn};

use crate::error::{ConnectFailure, ProtocolError, SyncError, SyncResult};
use crate::protocol::{Endpoint, TerminalClient, TerminalConnector};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime settings of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Communication password.
    pub password: u32,
    /// Bound on every network call except the bulk reads.
    pub timeout: Duration,
    /// Bound on a whole user or attendance download.
    pub bulk_timeout: Duration,
    /// Play a voice prompt once connected.
    pub confirm_tone: bool,
    pub voice_index: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            password: DEFAULT_DEVICE_PASSWORD,
            timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            bulk_timeout: Duration::from_secs(DEFAULT_BULK_TIMEOUT_SECS),
            confirm_tone: true,
            voice_index: 0,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// How to pick the user to delete on a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSelector {
    /// Terminal-local slot number.
    Uid(u16),
    /// External user id, resolved through the terminal's user list.
    UserId(String),
}

impl fmt::Display for UserSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserSelector::Uid(uid) => write!(f, "uid {uid}"),
            UserSelector::UserId(user_id) => write!(f, "user_id {user_id}"),
        }
    }
}

/// Runs `fut` with a deadline; elapsing maps to [`ProtocolError::Timeout`].
async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ProtocolError>>,
) -> Result<T, ProtocolError> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(ProtocolError::Timeout))
}

// =============================================================================
// Device Session
// =============================================================================

/// Owns the connection to one terminal.
pub struct DeviceSession {
    endpoint: Endpoint,
    config: SessionConfig,
    connector: Arc<dyn TerminalConnector>,
    /// Present while the link is open, including after a demotion.
    client: Option<Box<dyn TerminalClient>>,
    state: SessionState,
    /// Whether this session locked the terminal's keypad.
    ui_disabled: bool,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("link_open", &self.client.is_some())
            .field("ui_disabled", &self.ui_disabled)
            .finish()
    }
}

impl DeviceSession {
    /// Creates a disconnected session for `device`.
    pub fn new(device: &Device, config: SessionConfig, connector: Arc<dyn TerminalConnector>) -> Self {
        let endpoint = Endpoint::for_device(device, config.password);
        Self::for_endpoint(endpoint, config, connector)
    }

    pub fn for_endpoint(
        endpoint: Endpoint,
        config: SessionConfig,
        connector: Arc<dyn TerminalConnector>,
    ) -> Self {
        DeviceSession {
            endpoint,
            config,
            connector,
            client: None,
            state: SessionState::Disconnected,
            ui_disabled: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn address(&self) -> String {
        self.endpoint.address()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the session: handshake, keypad lock, then the confirmation tone.
    ///
    /// Returns immediately if already connected. A link left open by a
    /// demotion is released first.
    ///
    /// ## Errors
    /// `SyncError::ConnectFailed` with the failure reason. A terminal that
    /// accepts the handshake but refuses to lock its keypad counts as a
    /// handshake failure, and the link is closed again. If the lock times
    /// out, an unlock is sent before closing.
    pub async fn connect(&mut self) -> SyncResult<()> {
        if self.state == SessionState::Connected {
            debug!(address = %self.address(), "Already connected");
            return Ok(());
        }

        if self.client.is_some() {
            if let Err(e) = self.disconnect().await {
                warn!(address = %self.address(), error = %e, "Releasing stale link failed");
            }
        }

        self.state = SessionState::Connecting;
        let timeout = self.config.timeout;
        let mut client = self.connector.client_for(&self.endpoint);
        debug!(address = %self.address(), "Connecting");

        if let Err(err) = bounded(timeout, client.open()).await {
            self.state = SessionState::Disconnected;
            return Err(self.connect_failed(ConnectFailure::from(&err), &err));
        }

        if let Err(err) = bounded(timeout, client.disable_device()).await {
            // A late answer may still have locked the keypad.
            if matches!(err, ProtocolError::Timeout) {
                if let Err(unlock_err) = bounded(timeout, client.enable_device()).await {
                    warn!(address = %self.address(), error = %unlock_err, "Unlock after lock timeout failed");
                }
            }
            if let Err(close_err) = bounded(timeout, client.close()).await {
                warn!(address = %self.address(), error = %close_err, "Close after failed lock failed");
            }
            self.state = SessionState::Disconnected;
            let reason = match err {
                ProtocolError::Timeout => ConnectFailure::Timeout,
                _ => ConnectFailure::Handshake,
            };
            return Err(self.connect_failed(reason, &err));
        }
        self.ui_disabled = true;

        if self.config.confirm_tone {
            if let Err(err) = bounded(timeout, client.test_voice(self.config.voice_index)).await {
                warn!(address = %self.address(), error = %err, "Confirmation tone failed");
            }
        }

        self.client = Some(client);
        self.state = SessionState::Connected;
        info!(address = %self.address(), "Session open");
        Ok(())
    }

    fn connect_failed(&self, reason: ConnectFailure, err: &ProtocolError) -> SyncError {
        warn!(address = %self.address(), %reason, error = %err, "Connect failed");
        SyncError::ConnectFailed {
            address: self.address(),
            reason,
            detail: err.to_string(),
        }
    }

    /// Probes the terminal with a clock read.
    ///
    /// The probe runs whenever a link is open, so a session demoted by a
    /// failed operation is promoted back to `Connected` if the terminal still
    /// answers. The failed operation itself is never repeated. A failed probe
    /// demotes the session.
    pub async fn is_connected(&mut self) -> bool {
        let timeout = self.config.timeout;
        let Some(client) = self.client.as_deref_mut() else {
            self.state = SessionState::Disconnected;
            return false;
        };

        match bounded(timeout, client.get_time()).await {
            Ok(time) => {
                if self.state != SessionState::Connected {
                    info!(address = %self.endpoint.address(), "Link still answers, session restored");
                }
                debug!(address = %self.endpoint.address(), %time, "Probe ok");
                self.state = SessionState::Connected;
                true
            }
            Err(err) => {
                warn!(address = %self.endpoint.address(), error = %err, "Probe failed, demoting session");
                self.state = SessionState::Disconnected;
                false
            }
        }
    }

    /// Unlocks the keypad and closes the link.
    ///
    /// Works after a demotion; a no-op when no link is open. The session is
    /// disconnected afterwards whatever the result.
    ///
    /// ## Errors
    /// `SyncError::DisconnectFailed` if unlocking or closing failed.
    pub async fn disconnect(&mut self) -> SyncResult<()> {
        let Some(mut client) = self.client.take() else {
            self.state = SessionState::Disconnected;
            return Ok(());
        };
        let timeout = self.config.timeout;
        let mut failures = Vec::new();

        if self.ui_disabled {
            if let Err(err) = bounded(timeout, client.enable_device()).await {
                failures.push(format!("enable_device: {err}"));
            }
        }
        if let Err(err) = bounded(timeout, client.close()).await {
            failures.push(format!("close: {err}"));
        }

        self.ui_disabled = false;
        self.state = SessionState::Disconnected;

        if failures.is_empty() {
            info!(address = %self.address(), "Session closed");
            Ok(())
        } else {
            let message = failures.join("; ");
            warn!(address = %self.address(), error = %message, "Disconnect incomplete");
            Err(SyncError::DisconnectFailed(message))
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn connected_client(&mut self) -> SyncResult<&mut (dyn TerminalClient + 'static)> {
        if self.state != SessionState::Connected {
            return Err(SyncError::NotConnected);
        }
        match self.client.as_deref_mut() {
            Some(client) => Ok(client),
            None => Err(SyncError::NotConnected),
        }
    }

    /// Turns a call result into a session result, demoting on failure.
    fn settle<T>(&mut self, operation: &str, result: Result<T, ProtocolError>) -> SyncResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    address = %self.endpoint.address(),
                    operation,
                    error = %err,
                    "Terminal operation failed, demoting session"
                );
                self.state = SessionState::Disconnected;
                match err {
                    ProtocolError::NotConnected => Err(SyncError::NotConnected),
                    other => Err(SyncError::device(operation, other)),
                }
            }
        }
    }

    /// Lists enrolled users with their privilege mapped.
    pub async fn list_users(&mut self) -> SyncResult<Vec<RemoteUser>> {
        let timeout = self.config.bulk_timeout;
        let client = self.connected_client()?;
        let result = bounded(timeout, client.get_users()).await;
        let users = self.settle("list_users", result)?;
        debug!(address = %self.address(), count = users.len(), "Fetched users");
        Ok(users)
    }

    /// Lists the attendance log. Unknown status codes come through with no
    /// mapped status.
    pub async fn list_attendance(&mut self) -> SyncResult<Vec<RemoteAttendanceRecord>> {
        let timeout = self.config.bulk_timeout;
        let client = self.connected_client()?;
        let result = bounded(timeout, client.get_attendance()).await;
        let records = self.settle("list_attendance", result)?;
        debug!(address = %self.address(), count = records.len(), "Fetched attendance");
        Ok(records)
    }

    /// Writes `user` into slot `user.uid` and refreshes the terminal.
    pub async fn create_user(&mut self, user: &RemoteUser) -> SyncResult<()> {
        self.write_user("create_user", user).await?;
        info!(address = %self.address(), uid = user.uid, user_id = %user.user_id, "User written");
        Ok(())
    }

    /// Applies `patch` over the terminal's current record for `uid`.
    ///
    /// ## Returns
    /// The record as written.
    ///
    /// ## Errors
    /// `SyncError::UnknownTerminalUser` if no user occupies `uid`.
    pub async fn update_user(&mut self, uid: u16, patch: &RemoteUserPatch) -> SyncResult<RemoteUser> {
        let current = self
            .list_users()
            .await?
            .into_iter()
            .find(|u| u.uid == uid)
            .ok_or_else(|| SyncError::UnknownTerminalUser(UserSelector::Uid(uid).to_string()))?;

        let merged = patch.apply(&current);
        self.write_user("update_user", &merged).await?;
        info!(address = %self.address(), uid, "User updated");
        Ok(merged)
    }

    /// Removes a user and refreshes the terminal.
    pub async fn delete_user(&mut self, selector: &UserSelector) -> SyncResult<()> {
        let uid = match selector {
            UserSelector::Uid(uid) => *uid,
            UserSelector::UserId(user_id) => self
                .list_users()
                .await?
                .into_iter()
                .find(|u| &u.user_id == user_id)
                .map(|u| u.uid)
                .ok_or_else(|| SyncError::UnknownTerminalUser(selector.to_string()))?,
        };

        let timeout = self.config.timeout;
        let client = self.connected_client()?;
        let result = bounded(timeout, client.delete_user(uid)).await;
        self.settle("delete_user", result)?;
        self.refresh("delete_user").await?;

        info!(address = %self.address(), uid, "User deleted");
        Ok(())
    }

    async fn write_user(&mut self, operation: &str, user: &RemoteUser) -> SyncResult<()> {
        let timeout = self.config.timeout;
        let client = self.connected_client()?;
        let result = bounded(timeout, client.set_user(user)).await;
        self.settle(operation, result)?;
        self.refresh(operation).await
    }

    async fn refresh(&mut self, operation: &str) -> SyncResult<()> {
        let timeout = self.config.timeout;
        let client = self.connected_client()?;
        let result = bounded(timeout, client.refresh_data()).await;
        self.settle(operation, result)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        let address = self.endpoint.address();
        let ui_disabled = self.ui_disabled;
        let timeout = self.config.timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(address = %address, "Session dropped while open, releasing in background");
                handle.spawn(async move {
                    if ui_disabled {
                        if let Err(e) = bounded(timeout, client.enable_device()).await {
                            warn!(address = %address, error = %e, "Background unlock failed");
                        }
                    }
                    if let Err(e) = bounded(timeout, client.close()).await {
                        warn!(address = %address, error = %e, "Background close failed");
                    }
                });
            }
            Err(_) => {
                warn!(address = %address, "Session dropped outside a runtime, terminal keypad may stay locked");
            }
        }
    }
}
