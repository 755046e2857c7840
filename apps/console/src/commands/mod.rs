//! Console command implementations.

pub mod attendance;
pub mod device;
pub mod init;
pub mod summary;
pub mod sync;
pub mod terminal;
pub mod user;
