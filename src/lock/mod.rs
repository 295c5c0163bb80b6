//! Namespace locking.
//!
//! - [`record`] - Persisted lock record and holder identity
//! - [`manager`] - Acquire, renew and release with background renewal
//! - [`process`] - Liveness of lock holders on this host

pub mod manager;
pub mod process;
pub mod record;

pub use manager::{LockGuard, LockManager, LockSettings};
pub use process::{LocalProcesses, ProcessLiveness};
pub use record::{lock_document_name, LockHolder, LockRecord};
