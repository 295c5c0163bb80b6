//! Command-line interface.
//!
//! Operator CLI for inspecting and maintaining deployment state in the
//! file-backed document store.

pub mod commands;

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::Path;

/// Default configuration file, used when present and `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "ledgerdeck.toml";

/// Ledgerdeck - coordination core for ledger network deployments.
#[derive(Parser, Debug)]
#[command(name = "ledgerdeck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Document store root directory.
    #[arg(long, global = true)]
    pub store_root: Option<String>,

    /// Handoff directory for lifecycle phase artifacts.
    #[arg(long, global = true)]
    pub handoff_dir: Option<String>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remote configuration document operations.
    Deployment(commands::DeploymentArgs),
    /// Namespace lock operations.
    Lock(commands::LockArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}

impl GlobalArgs {
    /// Overrides taken from global flags.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level.clone(),
            store_root: self.store_root.clone(),
            handoff_dir: self.handoff_dir.clone(),
            lock_duration_seconds: None,
        }
    }

    /// Load the configuration file (or defaults) with CLI overrides applied.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(Path::new(path))?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Config::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::from_toml("")?,
        };
        config.apply_overrides(&self.overrides());
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` takes precedence over the configured level.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second initialization (e.g. from tests) is not an error.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}
