//! # Domain Types
//!
//! Core domain types used throughout Attendo.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Stored locally (SQLite)                                               │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Device      │   │   LocalUser     │   │ LocalAttendance     │   │
//! │  │  ─────────────  │   │  ─────────────  │   │   Record            │   │
//! │  │  id             │◄──│  device_id (FK) │   │  ─────────────────  │   │
//! │  │  serial (uniq)  │   │  user_id (uniq) │◄ ─│  user_id            │   │
//! │  │  ip, port       │   │  privilege      │   │  timestamp          │   │
//! │  └─────────────────┘   └─────────────────┘   │  (user_id, ts) uniq │   │
//! │                                              └─────────────────────┘   │
//! │  Reported by a terminal (ephemeral)                                    │
//! │  ┌─────────────────┐   ┌─────────────────────────┐                     │
//! │  │   RemoteUser    │   │ RemoteAttendanceRecord  │                     │
//! │  │  uid (u16)      │   │ user_id (string)        │                     │
//! │  │  user_id (str)  │   │ timestamp (naive local) │                     │
//! │  │  group_id (str) │   │ status_code (u8)        │                     │
//! │  └─────────────────┘   └─────────────────────────┘                     │
//! │                                                                         │
//! │  Pass results: SyncOutcome, SyncReport, DeviceSyncReport, FleetSummary │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Users carry two identifiers:
//! - `id`: synthetic row id, used for local relations
//! - `user_id`: the external identifier enrolled on the terminals, unique
//!   across the fleet and the key reconciliation matches on

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::{parse_group_id, parse_user_id};
use crate::SYNC_TIMESTAMP_FORMAT;

// =============================================================================
// Privilege
// =============================================================================

/// Privilege level of an enrolled user.
///
/// Terminals encode this as a flag byte: `14` means administrator, anything
/// else is treated as a regular user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
pub enum Privilege {
    /// Regular user (device flag 0).
    #[default]
    User,
    /// Administrator (device flag 14).
    Admin,
}

impl Privilege {
    /// Flag byte terminals use for an administrator.
    pub const DEVICE_ADMIN_FLAG: u8 = 14;

    /// Flag byte terminals use for a regular user.
    pub const DEVICE_USER_FLAG: u8 = 0;

    /// Maps the terminal's privilege byte.
    pub fn from_device_flag(flag: u8) -> Self {
        if flag == Self::DEVICE_ADMIN_FLAG {
            Privilege::Admin
        } else {
            Privilege::User
        }
    }

    /// Returns the byte written back to a terminal.
    pub fn device_flag(&self) -> u8 {
        match self {
            Privilege::User => Self::DEVICE_USER_FLAG,
            Privilege::Admin => Self::DEVICE_ADMIN_FLAG,
        }
    }

    /// Canonical label, as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::User => "User",
            Privilege::Admin => "Admin",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Privilege::User),
            "admin" => Ok(Privilege::Admin),
            _ => Err(ValidationError::NotAllowed {
                field: "privilege".to_string(),
                allowed: vec!["User".to_string(), "Admin".to_string()],
            }),
        }
    }
}

// =============================================================================
// Attendance Status
// =============================================================================

/// Direction of an attendance punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    /// Check-in (device code 0).
    In,
    /// Check-out (device code 1).
    Out,
}

impl AttendanceStatus {
    /// Maps the terminal's status code.
    ///
    /// ## Returns
    /// * `Some(In)` for 0, `Some(Out)` for 1
    /// * `None` for any other code (break, overtime, firmware specific)
    pub fn from_device_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AttendanceStatus::In),
            1 => Some(AttendanceStatus::Out),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::In => "in",
            AttendanceStatus::Out => "out",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Device
// =============================================================================

/// A registered fingerprint terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Device {
    /// Row identifier.
    pub id: i64,

    /// Display name chosen by the operator.
    pub name: String,

    /// Hardware model (e.g. "K40").
    pub device_model: String,

    /// Serial number, unique across the fleet.
    pub serial_number: String,

    /// IPv4/IPv6 address of the terminal.
    pub ip: String,

    /// TCP port (4370 unless reconfigured).
    pub port: u16,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Returns `ip:port` for logs and connection strings.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Fields needed to register or edit a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub device_model: String,
    pub serial_number: String,
    pub ip: String,
    pub port: u16,
}

// =============================================================================
// Local User
// =============================================================================

/// A user record stored in the local datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalUser {
    /// Synthetic row identifier.
    pub id: i64,

    pub name: String,
    pub privilege: Privilege,
    pub password: String,

    /// External identifier enrolled on the terminals (unique).
    pub user_id: i64,

    pub group_id: i64,

    /// Device the user was last pulled from, if any.
    pub device_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A local user joined with the display name of its owning device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalUserView {
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    #[serde(flatten)]
    pub user: LocalUser,

    /// `None` when the user has no owning device or it was deleted.
    pub device_name: Option<String>,
}

/// Fields written when creating or overwriting a local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocalUser {
    pub name: String,
    pub privilege: Privilege,
    pub password: String,
    pub user_id: i64,
    pub group_id: i64,
    pub device_id: Option<i64>,
}

// =============================================================================
// Remote (terminal-reported) records
// =============================================================================

/// A user as enrolled on a terminal.
///
/// `user_id` and `group_id` are kept exactly as the terminal reports them;
/// coercion into integers happens in [`RemoteUser::to_local`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    /// Terminal-local slot number.
    pub uid: u16,
    pub name: String,
    pub privilege: Privilege,
    pub password: String,
    pub group_id: String,
    pub user_id: String,
    pub card: u32,
}

impl RemoteUser {
    /// Converts the terminal record into the fields of a local user owned by
    /// `device_id`.
    ///
    /// ## Errors
    /// `CoreError::InvalidRecord` if `user_id` or `group_id` is not an
    /// integer. An empty `group_id` becomes 0.
    pub fn to_local(&self, device_id: Option<i64>) -> CoreResult<NewLocalUser> {
        let user_id = parse_user_id(&self.user_id)
            .map_err(|e| CoreError::invalid_record("user_id", &self.user_id, e.to_string()))?;
        let group_id = parse_group_id(&self.group_id)
            .map_err(|e| CoreError::invalid_record("group_id", &self.group_id, e.to_string()))?;

        Ok(NewLocalUser {
            name: self.name.clone(),
            privilege: self.privilege,
            password: self.password.clone(),
            user_id,
            group_id,
            device_id,
        })
    }
}

/// A partial edit applied over a terminal's current user record.
///
/// Fields left as `None` keep the terminal's current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserPatch {
    pub name: Option<String>,
    pub privilege: Option<Privilege>,
    pub password: Option<String>,
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub card: Option<u32>,
}

impl RemoteUserPatch {
    /// Returns `current` with every supplied field replaced.
    pub fn apply(&self, current: &RemoteUser) -> RemoteUser {
        RemoteUser {
            uid: current.uid,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            privilege: self.privilege.unwrap_or(current.privilege),
            password: self
                .password
                .clone()
                .unwrap_or_else(|| current.password.clone()),
            group_id: self
                .group_id
                .clone()
                .unwrap_or_else(|| current.group_id.clone()),
            user_id: self
                .user_id
                .clone()
                .unwrap_or_else(|| current.user_id.clone()),
            card: self.card.unwrap_or(current.card),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &RemoteUserPatch::default()
    }
}

/// An attendance punch as stored on a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttendanceRecord {
    /// Terminal-local slot number of the user (0 when not reported).
    pub uid: u16,

    /// External user id, as reported.
    pub user_id: String,

    /// Terminal-local wall clock time of the punch.
    pub timestamp: NaiveDateTime,

    /// Raw status code.
    pub status_code: u8,

    /// Mapped status; `None` for codes other than 0 and 1.
    pub status: Option<AttendanceStatus>,

    /// Verification method byte (finger, card, password...).
    pub punch: u8,
}

impl RemoteAttendanceRecord {
    /// Builds a record, mapping `status_code` into a status.
    pub fn new(
        uid: u16,
        user_id: impl Into<String>,
        timestamp: NaiveDateTime,
        status_code: u8,
        punch: u8,
    ) -> Self {
        RemoteAttendanceRecord {
            uid,
            user_id: user_id.into(),
            timestamp,
            status_code,
            status: AttendanceStatus::from_device_code(status_code),
            punch,
        }
    }

    /// Converts the punch into a new, unsynced local record stamped with the
    /// originating terminal's IP.
    ///
    /// ## Errors
    /// `CoreError::InvalidRecord` if `user_id` is not an integer.
    pub fn to_local(&self, device_ip: &str) -> CoreResult<NewAttendanceRecord> {
        let user_id = parse_user_id(&self.user_id)
            .map_err(|e| CoreError::invalid_record("user_id", &self.user_id, e.to_string()))?;

        Ok(NewAttendanceRecord {
            user_id,
            timestamp: self.timestamp,
            status: self.status,
            status_code: Some(i64::from(self.status_code)),
            device_ip: Some(device_ip.to_string()),
            synced: false,
        })
    }
}

// =============================================================================
// Local Attendance
// =============================================================================

/// An attendance punch stored in the local datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalAttendanceRecord {
    pub id: i64,
    pub user_id: i64,
    /// Exact terminal-local time; part of the uniqueness key.
    pub timestamp: NaiveDateTime,
    pub status: Option<AttendanceStatus>,
    /// Raw terminal status code, kept even when it maps to no status.
    pub status_code: Option<i64>,
    /// IP of the terminal the punch came from.
    pub device_ip: Option<String>,
    /// Whether the punch has been forwarded downstream.
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when inserting or editing an attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttendanceRecord {
    pub user_id: i64,
    pub timestamp: NaiveDateTime,
    pub status: Option<AttendanceStatus>,
    pub status_code: Option<i64>,
    pub device_ip: Option<String>,
    pub synced: bool,
}

// =============================================================================
// Sync Results
// =============================================================================

/// Result of a full synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// At least one device was reachable (or the fleet is empty).
    Success { completed_at: DateTime<Local> },
    /// Every registered device failed to connect.
    Failure,
}

impl SyncOutcome {
    /// Success stamped with the current local time.
    pub fn success_now() -> Self {
        SyncOutcome::Success {
            completed_at: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }

    /// Completion time formatted as `YYYY-MM-DD HH:MM:SS`.
    pub fn completed_at_label(&self) -> Option<String> {
        match self {
            SyncOutcome::Success { completed_at } => {
                Some(completed_at.format(SYNC_TIMESTAMP_FORMAT).to_string())
            }
            SyncOutcome::Failure => None,
        }
    }
}

/// Per-device detail of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSyncReport {
    pub device_id: i64,
    pub device_name: String,
    pub address: String,
    /// Whether the session was opened.
    pub connected: bool,
    /// Users inserted or updated locally.
    pub users_processed: usize,
    /// Users skipped because a field could not be coerced.
    pub users_skipped: usize,
    /// Attendance records newly inserted.
    pub attendance_inserted: usize,
    /// Attendance records already present locally.
    pub attendance_duplicates: usize,
    /// Attendance records skipped because a field could not be coerced.
    pub attendance_skipped: usize,
    /// Human-readable errors encountered for this device.
    pub errors: Vec<String>,
}

impl DeviceSyncReport {
    pub fn new(device: &Device) -> Self {
        DeviceSyncReport {
            device_id: device.id,
            device_name: device.name.clone(),
            address: device.address(),
            ..Default::default()
        }
    }

    /// Connected and no pull aborted.
    pub fn is_clean(&self) -> bool {
        self.connected && self.errors.is_empty()
    }
}

/// Outcome of a pass plus what happened on each device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Correlation id of the pass (also present in log spans).
    pub pass_id: String,
    pub outcome: SyncOutcome,
    pub devices: Vec<DeviceSyncReport>,
}

impl SyncReport {
    pub fn connected_count(&self) -> usize {
        self.devices.iter().filter(|d| d.connected).count()
    }

    pub fn failed_count(&self) -> usize {
        self.devices.len() - self.connected_count()
    }
}

/// Counts shown on the operator dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    /// Registered devices.
    pub device_count: usize,
    /// Devices that answered a connect + probe.
    pub connected_count: usize,
    /// Users in the local datastore.
    pub user_count: i64,
}

impl FleetSummary {
    /// `total/connected`, e.g. `3/2`.
    pub fn devices_label(&self) -> String {
        format!("{}/{}", self.device_count, self.connected_count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
