//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`context`] - Per-invocation wiring of store, clock and lock holder
//! - [`error`] - Error types
//! - [`time`] - Clock abstraction

pub mod config;
pub mod context;
pub mod error;
pub mod time;
