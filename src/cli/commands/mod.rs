//! CLI command implementations.

mod config;
mod deployment;
mod lock;

pub use config::{run_config, ConfigArgs};
pub use deployment::{run_deployment, DeploymentArgs};
pub use lock::{run_lock, LockArgs};
