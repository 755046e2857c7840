//! # Terminal Protocol
//!
//! The client side of the ZKTeco terminal protocol, behind an object-safe
//! trait so sessions can be driven against real hardware or an in-memory
//! terminal.
//!
//! ```text
//! DeviceSession ──► Box<dyn TerminalClient> ─┬─► ZkTcpClient   (TCP, port 4370)
//!                        ▲                   └─► MockTerminal  (tests)
//!                        │
//!        TerminalConnector::client_for(&Endpoint)
//! ```
//!
//! Clients apply no timeouts and never retry; the session bounds every call.

mod client;
pub mod packet;
pub mod records;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use async_trait::async_trait;
use attendo_core::{Device, RemoteAttendanceRecord, RemoteUser};
use chrono::NaiveDateTime;

use crate::error::ProtocolError;

pub use client::{ZkConnector, ZkTcpClient};

/// Where and how to reach one terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    /// Communication password (0 when the terminal has none).
    pub password: u32,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16, password: u32) -> Self {
        Endpoint {
            ip: ip.into(),
            port,
            password,
        }
    }

    pub fn for_device(device: &Device, password: u32) -> Self {
        Endpoint::new(device.ip.clone(), device.port, password)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// One connection to one terminal.
///
/// Every method is a single protocol exchange (or a short fixed sequence of
/// them). Calls other than `open` fail with [`ProtocolError::NotConnected`]
/// before `open` succeeds or after `close`.
#[async_trait]
pub trait TerminalClient: Send {
    /// Opens the TCP link and performs the handshake.
    async fn open(&mut self) -> Result<(), ProtocolError>;

    /// Says goodbye and drops the link. The link is gone even on error.
    async fn close(&mut self) -> Result<(), ProtocolError>;

    /// Locks the terminal's keypad and screen.
    async fn disable_device(&mut self) -> Result<(), ProtocolError>;

    /// Unlocks the terminal's keypad and screen.
    async fn enable_device(&mut self) -> Result<(), ProtocolError>;

    /// Plays built-in voice prompt `index`.
    async fn test_voice(&mut self, index: u32) -> Result<(), ProtocolError>;

    /// Reads the terminal clock. Used as the liveness probe.
    async fn get_time(&mut self) -> Result<NaiveDateTime, ProtocolError>;

    async fn get_users(&mut self) -> Result<Vec<RemoteUser>, ProtocolError>;

    async fn get_attendance(&mut self) -> Result<Vec<RemoteAttendanceRecord>, ProtocolError>;

    /// Creates or overwrites the user in slot `user.uid`.
    async fn set_user(&mut self, user: &RemoteUser) -> Result<(), ProtocolError>;

    async fn delete_user(&mut self, uid: u16) -> Result<(), ProtocolError>;

    /// Makes the terminal apply pending user changes.
    async fn refresh_data(&mut self) -> Result<(), ProtocolError>;
}

/// Creates clients for endpoints. Shared by every session of a pass.
pub trait TerminalConnector: Send + Sync {
    fn client_for(&self, endpoint: &Endpoint) -> Box<dyn TerminalClient>;
}
