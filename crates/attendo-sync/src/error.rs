//! # Sync Error Types
//!
//! Error types for terminal sessions and reconciliation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ProtocolError (client level, one terminal call)                       │
//! │       │                                                                 │
//! │       ▼ classified by DeviceSession                                    │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Connection     │  │   Operation     │  │     Record              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ConnectFailed  │  │  NotConnected   │  │  Format                 │ │
//! │  │   Timeout       │  │  Device         │  │  (skip record,          │ │
//! │  │   Refused       │  │  UnknownTerminal│  │   pull continues)       │ │
//! │  │   Handshake     │  │   User          │  │                         │ │
//! │  │  DisconnectFail │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │  Configuration  │                              │
//! │  │  (aborts pull)  │  │  InvalidConfig  │                              │
//! │  │  DbError        │  │  Load / Save    │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use attendo_core::CoreError;
use attendo_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Protocol Error
// =============================================================================

/// Failure of a single call on a [`TerminalClient`](crate::protocol::TerminalClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The terminal actively refused the TCP connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The terminal did not answer in time.
    #[error("timed out")]
    Timeout,

    /// The handshake was answered with something other than an ACK.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The terminal rejected the communication password.
    #[error("unauthenticated: wrong communication password")]
    Unauthorized,

    /// A call was made on a client that was never opened or already closed.
    #[error("not connected")]
    NotConnected,

    /// The terminal answered a command with a non-success reply code.
    #[error("command {command} rejected with reply {reply}")]
    CommandRejected { command: u16, reply: u16 },

    /// A frame or record could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Socket-level failure after the connection was established.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => ProtocolError::ConnectionRefused(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ProtocolError::Timeout,
            _ => ProtocolError::Io(err.to_string()),
        }
    }
}

// =============================================================================
// Connect Failure Reason
// =============================================================================

/// Why a session could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// No answer within the session timeout.
    Timeout,
    /// TCP connection refused or unreachable.
    Refused,
    /// Connected, but the terminal rejected the handshake (including a
    /// wrong password) or refused to lock its UI.
    Handshake,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::Timeout => write!(f, "timeout"),
            ConnectFailure::Refused => write!(f, "refused"),
            ConnectFailure::Handshake => write!(f, "handshake"),
        }
    }
}

impl From<&ProtocolError> for ConnectFailure {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::Timeout => ConnectFailure::Timeout,
            ProtocolError::ConnectionRefused(_) | ProtocolError::Io(_) => ConnectFailure::Refused,
            ProtocolError::HandshakeFailed(_)
            | ProtocolError::Unauthorized
            | ProtocolError::NotConnected
            | ProtocolError::CommandRejected { .. }
            | ProtocolError::Malformed(_) => ConnectFailure::Handshake,
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering session, reconciliation and configuration
/// failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Opening the session failed.
    #[error("Cannot connect to {address} ({reason}): {detail}")]
    ConnectFailed {
        address: String,
        reason: ConnectFailure,
        detail: String,
    },

    /// Operation attempted without an active session.
    #[error("Not connected to terminal")]
    NotConnected,

    /// The terminal failed an operation (protocol error or timeout).
    #[error("Terminal operation '{operation}' failed: {message}")]
    Device { operation: String, message: String },

    /// A user referenced by uid or user_id is not enrolled on the terminal.
    #[error("No user {0} on terminal")]
    UnknownTerminalUser(String),

    /// Releasing the session failed. The link is considered closed anyway.
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    /// A single terminal record could not be interpreted.
    #[error("Bad terminal record: {0}")]
    Format(#[from] CoreError),

    /// The local datastore failed.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Builds a Device error for `operation`.
    pub fn device(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        SyncError::Device {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    // =========================================================================
    // Error Categorization
    // =========================================================================

    /// Returns true if the session could not be opened.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, SyncError::ConnectFailed { .. })
    }

    /// Returns true if the error concerns one record only.
    pub fn is_record_error(&self) -> bool {
        matches!(self, SyncError::Format(_))
    }

    /// Returns true if the error stops the current pull (as opposed to a
    /// record-level error, which only skips that record).
    pub fn aborts_pull(&self) -> bool {
        !self.is_record_error()
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
