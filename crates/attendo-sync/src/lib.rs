//! # attendo-sync: Terminal Sessions and Reconciliation for Attendo
//!
//! This crate talks to ZKTeco fingerprint terminals and merges what they
//! report into the local datastore.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Architecture                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncOrchestrator (one pass over the fleet)       │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task by the console                          │  │
//! │  │  Devices one at a time, users before attendance                  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┴─────────────────────┐                  │
//! │         ▼                                           ▼                   │
//! │  ┌────────────────┐                        ┌────────────────────────┐  │
//! │  │ DeviceSession  │◄───────────────────────│  Reconciler            │  │
//! │  │                │  list users/attendance │                        │  │
//! │  │ connect, probe │                        │ upsert users by        │  │
//! │  │ bounded calls  │                        │ user_id, dedupe punches│  │
//! │  │ release guard  │                        │ by (user_id, time)     │  │
//! │  └───────┬────────┘                        └───────────┬────────────┘  │
//! │          ▼                                             ▼               │
//! │  ┌────────────────┐                        ┌────────────────────────┐  │
//! │  │ TerminalClient │                        │  attendo-db Database   │  │
//! │  │ ZK over TCP    │                        │  (SQLite)              │  │
//! │  └────────────────┘                        └────────────────────────┘  │
//! │                                                                         │
//! │  PROGRESS EVENTS (SyncEventEmitter):                                   │
//! │  • device_started / device_finished / pass_finished                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Session and datastore configuration
//! - [`error`] - Protocol and sync error types
//! - [`protocol`] - Terminal client trait and the ZK TCP implementation
//! - [`session`] - `DeviceSession` lifecycle
//! - [`reconcile`] - `Reconciler` pull-and-merge
//! - [`orchestrator`] - `SyncOrchestrator` fleet pass
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use attendo_sync::{AttendoConfig, SyncOrchestrator, ZkConnector};
//!
//! let config = AttendoConfig::load_or_default(None);
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     db,
//!     Arc::new(ZkConnector),
//!     config.session.session_config(),
//! ));
//!
//! let outcome = orchestrator.spawn_sync_all().await?;
//! println!("{:?}", outcome.completed_at_label());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod reconcile;
pub mod session;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{AttendoConfig, DatabaseSettings, SessionSettings};
pub use error::{ConnectFailure, ProtocolError, SyncError, SyncResult};
pub use orchestrator::{NoOpEmitter, SyncEventEmitter, SyncOrchestrator};
pub use protocol::{Endpoint, TerminalClient, TerminalConnector, ZkConnector, ZkTcpClient};
pub use reconcile::{AttendancePullSummary, Reconciler, UserPullSummary};
pub use session::{DeviceSession, SessionConfig, SessionState, UserSelector};
