//! Interfaces to the systems the coordinator drives.
//!
//! The coordinator never talks to a cluster, the ledger or a key generator
//! directly. It goes through these traits, which production wiring backs
//! with real clients and tests back with in-memory fakes.
//!
//! - [`orchestration`] - Container orchestration (pods, node workloads)
//! - [`ledger`] - Ledger transaction submission
//! - [`keys`] - Node key material generation

pub mod keys;
pub mod ledger;
pub mod orchestration;

pub use keys::{KeyMaterialProvider, NodeKeys};
pub use ledger::{LedgerClient, LedgerError, Receipt, Transaction};
pub use orchestration::{NodeSpec, OrchestrationClient, PodInfo};
