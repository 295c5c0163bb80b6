//! Ledgerdeck - coordination core for distributed-ledger network deployments.
//!
//! Ledgerdeck keeps the shared state of a ledger network deployment
//! consistent while several operators, possibly on different machines, add,
//! update and remove consensus nodes. All state lives in an external
//! document store: a lease-style lock per namespace and one versioned
//! remote configuration document describing every component.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Node Lifecycle Coordinator                     │
//! │        prepare  →  submit-transactions  →  execute              │
//! │             (handoff artifacts between phases)                  │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//! ┌────────────────┐  ┌──────────────────────┐  ┌──────────────────┐
//! │  Lock Manager  │  │ Remote Config Store  │  │     Adapters     │
//! │ acquire/renew/ │  │ load → migrate →     │  │ orchestration,   │
//! │ release        │  │ modify (CAS)         │  │ ledger, keys     │
//! └────────────────┘  └──────────────────────┘  └──────────────────┘
//!          │                    │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Document Store                          │
//! │        named documents, versioned compare-and-replace           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::context`] - Per-invocation wiring
//! - [`core::error`] - Error taxonomy
//! - [`core::time`] - Clock abstraction
//!
//! ## State
//! - [`store`] - Document store trait with file and memory backends
//! - [`lock`] - Namespace lock manager with background renewal
//! - [`remote`] - Remote configuration model, migrations, store and validator
//!
//! ## Lifecycle
//! - [`lifecycle::coordinator`] - Three-phase node add, update and delete
//! - [`lifecycle::artifacts`] - Handoff files between phases
//! - [`lifecycle::retry`] - Bounded retry policies
//!
//! ## Adapters
//! - [`adapters`] - Orchestration, ledger and key material interfaces
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - At most one live lock record exists per namespace
//! - Every remote config write holds a valid lock for its namespace and is
//!   a single compare-and-replace on the version that was read
//! - Documents are never written below the current schema version
//! - A component's phase only moves forward, except `Started → Configured`

// Core infrastructure
pub mod core;

// Document store
pub mod store;

// Namespace locking
pub mod lock;

// Remote configuration
pub mod remote;

// Node lifecycle
pub mod lifecycle;

// External interfaces
pub mod adapters;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, context, error, time};
pub use self::core::error::{DeployError, DeployResult};
pub use lifecycle::{NodeChange, NodeChangeRequest, NodeLifecycleCoordinator};
pub use lock::{LockGuard, LockManager};
pub use remote::{RemoteConfigDocument, RemoteConfigStore, RemoteConfigValidator};
