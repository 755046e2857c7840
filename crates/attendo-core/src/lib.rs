//! # attendo-core: Pure Domain Model for Attendo
//!
//! This crate holds the domain model shared by every other Attendo crate:
//! registered terminals, locally stored users, attendance punches, and the
//! outcome of a synchronization pass. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Attendo Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  apps/console (attendo binary)                  │   │
//! │  │    device add ──► user list ──► sync ──► summary                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        attendo-sync (sessions, reconciliation, orchestrator)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ attendo-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌───────────────┐  ┌───────────────┐      │   │
//! │  │   │     types     │  │  validation   │  │     error     │      │   │
//! │  │   │ Device        │  │ device form   │  │ CoreError     │      │   │
//! │  │   │ LocalUser     │  │ user form     │  │ Validation    │      │   │
//! │  │   │ Attendance    │  │ id coercion   │  │   Error       │      │   │
//! │  │   └───────────────┘  └───────────────┘  └───────────────┘      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  attendo-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, LocalUser, attendance records, outcomes)
//! - [`error`] - Domain error types
//! - [`validation`] - Operator form validation and terminal field coercion
//!
//! ## Example Usage
//!
//! ```rust
//! use attendo_core::{AttendanceStatus, Privilege};
//!
//! // Terminals report privilege as a flag byte
//! assert_eq!(Privilege::from_device_flag(14), Privilege::Admin);
//! assert_eq!(Privilege::from_device_flag(0), Privilege::User);
//!
//! // ...and punch status as a small code
//! assert_eq!(AttendanceStatus::from_device_code(0), Some(AttendanceStatus::In));
//! assert_eq!(AttendanceStatus::from_device_code(4), None);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// TCP port ZKTeco terminals listen on out of the box.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Communication password used when a terminal has none configured.
pub const DEFAULT_DEVICE_PASSWORD: u32 = 0;

/// Upper bound for every network call made against a terminal.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 5;

/// Upper bound for a whole user or attendance download. These span many
/// exchanges and grow with the size of the terminal's tables.
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 60;

/// Format used when showing the completion time of a sync pass.
///
/// ## Example
/// `2024-03-01 17:45:09`
pub const SYNC_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
