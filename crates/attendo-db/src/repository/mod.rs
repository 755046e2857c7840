//! # Repository Module
//!
//! Database repository implementations for Attendo.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Reconciler / console command                                          │
//! │       │                                                                 │
//! │       │  db.users().upsert_by_user_id(&user)                           │
//! │       ▼                                                                 │
//! │  UserRepository                                                        │
//! │  ├── list / list_with_device_names                                     │
//! │  ├── get_by_id / get_by_user_id                                        │
//! │  ├── insert / update / delete / count                                  │
//! │  └── upsert_by_user_id (transactional)                                 │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`DeviceRepository`](device::DeviceRepository) - Registered terminals
//! - [`UserRepository`](user::UserRepository) - Local users, upsert by external id
//! - [`AttendanceRepository`](attendance::AttendanceRepository) - Punches, deduplicated insert

pub mod attendance;
pub mod device;
pub mod user;
