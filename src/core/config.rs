//! Configuration parsing and validation.
//!
//! Ledgerdeck configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the coordination components: document store, namespace
//! lock, remote configuration and node lifecycle.

use crate::lifecycle::retry::RetryPolicy;
use crate::lock::LockSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `lock.duration_seconds`.
pub const LOCK_DURATION_ENV: &str = "LEDGERDECK_LOCK_DURATION";

/// Longest lock duration accepted from configuration (one day).
pub const MAX_LOCK_DURATION_SECONDS: u64 = 86_400;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Document store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Namespace lock timing.
    #[serde(default)]
    pub lock: LockConfig,

    /// Remote configuration document settings.
    #[serde(default)]
    pub remote_config: RemoteConfigConfig,

    /// Node lifecycle retry budgets and handoff location.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: "file" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Root directory for the file backend.
    #[serde(default = "default_store_root")]
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            root: default_store_root(),
        }
    }
}

/// Namespace lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Seconds a lock stays valid without renewal.
    #[serde(default = "default_lock_duration_seconds")]
    pub duration_seconds: u64,

    /// Acquisition attempts made by commands before giving up.
    #[serde(default = "default_lock_acquire_attempts")]
    pub acquire_attempts: u32,

    /// Delay between acquisition attempts in milliseconds.
    #[serde(default = "default_lock_acquire_delay_ms")]
    pub acquire_delay_ms: u64,

    /// Renew the lock in the background while held.
    #[serde(default = "default_true")]
    pub auto_renew: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_lock_duration_seconds(),
            acquire_attempts: default_lock_acquire_attempts(),
            acquire_delay_ms: default_lock_acquire_delay_ms(),
            auto_renew: true,
        }
    }
}

/// Remote configuration document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfigConfig {
    /// Maximum number of commands kept in the document history.
    #[serde(default = "default_max_command_history")]
    pub max_command_history: usize,
}

impl Default for RemoteConfigConfig {
    fn default() -> Self {
        Self {
            max_command_history: default_max_command_history(),
        }
    }
}

/// Node lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Default handoff directory for phase artifacts.
    #[serde(default = "default_handoff_dir")]
    pub handoff_dir: String,

    /// Attempts while waiting for a transaction receipt.
    #[serde(default = "default_receipt_attempts")]
    pub receipt_attempts: u32,

    /// Delay between receipt attempts in milliseconds.
    #[serde(default = "default_receipt_delay_ms")]
    pub receipt_delay_ms: u64,

    /// Attempts while waiting for pods or nodes to become ready.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    /// Delay between readiness attempts in milliseconds.
    #[serde(default = "default_ready_delay_ms")]
    pub ready_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            handoff_dir: default_handoff_dir(),
            receipt_attempts: default_receipt_attempts(),
            receipt_delay_ms: default_receipt_delay_ms(),
            ready_attempts: default_ready_attempts(),
            ready_delay_ms: default_ready_delay_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_store_backend() -> String {
    "file".to_string()
}

fn default_store_root() -> String {
    "state".to_string()
}

fn default_lock_duration_seconds() -> u64 {
    20
}

fn default_lock_acquire_attempts() -> u32 {
    10
}

fn default_lock_acquire_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_max_command_history() -> usize {
    50
}

fn default_handoff_dir() -> String {
    "handoff".to_string()
}

fn default_receipt_attempts() -> u32 {
    600
}

fn default_receipt_delay_ms() -> u64 {
    1_000
}

fn default_ready_attempts() -> u32 {
    300
}

fn default_ready_delay_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "failed to parse config")?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(LOCK_DURATION_ENV) {
            self.lock.duration_seconds = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got: {}", LOCK_DURATION_ENV, raw))?;
        }
        Ok(())
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref store_root) = overrides.store_root {
            self.store.root = store_root.clone();
        }
        if let Some(ref handoff_dir) = overrides.handoff_dir {
            self.lifecycle.handoff_dir = handoff_dir.clone();
        }
        if let Some(duration) = overrides.lock_duration_seconds {
            self.lock.duration_seconds = duration;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_store()?;
        self.validate_lock()?;
        self.validate_remote_config()?;
        self.validate_lifecycle()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_store(&self) -> Result<()> {
        if self.store.backend != "file" && self.store.backend != "memory" {
            anyhow::bail!(
                "store.backend must be 'file' or 'memory', got: {}",
                self.store.backend
            );
        }
        if self.store.backend == "file" && self.store.root.trim().is_empty() {
            anyhow::bail!("store.root required for the file backend");
        }
        Ok(())
    }

    fn validate_lock(&self) -> Result<()> {
        // Renewal fires at half the duration and must stay at or above one second.
        if self.lock.duration_seconds < 2 {
            anyhow::bail!(
                "lock.duration_seconds must be >= 2, got: {}",
                self.lock.duration_seconds
            );
        }
        if self.lock.duration_seconds > MAX_LOCK_DURATION_SECONDS {
            anyhow::bail!(
                "lock.duration_seconds must be <= {}, got: {}",
                MAX_LOCK_DURATION_SECONDS,
                self.lock.duration_seconds
            );
        }
        if self.lock.acquire_attempts == 0 {
            anyhow::bail!("lock.acquire_attempts must be > 0");
        }
        Ok(())
    }

    fn validate_remote_config(&self) -> Result<()> {
        if self.remote_config.max_command_history == 0 {
            anyhow::bail!("remote_config.max_command_history must be > 0");
        }
        Ok(())
    }

    fn validate_lifecycle(&self) -> Result<()> {
        if self.lifecycle.receipt_attempts == 0 {
            anyhow::bail!("lifecycle.receipt_attempts must be > 0");
        }
        if self.lifecycle.ready_attempts == 0 {
            anyhow::bail!("lifecycle.ready_attempts must be > 0");
        }
        if self.lifecycle.handoff_dir.trim().is_empty() {
            anyhow::bail!("lifecycle.handoff_dir must not be empty");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    /// Lock manager settings derived from this configuration.
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            duration_seconds: self.lock.duration_seconds,
            auto_renew: self.lock.auto_renew,
        }
    }

    /// Retry policy for lock acquisition by commands.
    pub fn lock_acquire_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock.acquire_attempts,
            Duration::from_millis(self.lock.acquire_delay_ms),
        )
    }

    /// Retry policy for transaction receipts.
    pub fn receipt_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lifecycle.receipt_attempts,
            Duration::from_millis(self.lifecycle.receipt_delay_ms),
        )
    }

    /// Retry policy for pod and node readiness.
    pub fn ready_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lifecycle.ready_attempts,
            Duration::from_millis(self.lifecycle.ready_delay_ms),
        )
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override file store root.
    pub store_root: Option<String>,
    /// Override handoff directory.
    pub handoff_dir: Option<String>,
    /// Override lock duration.
    pub lock_duration_seconds: Option<u64>,
}
