//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(default_value = "ledgerdeck.toml")]
        path: PathBuf,
    },
    /// Print configuration with defaults filled in.
    Show {
        /// Config file path; defaults only when omitted.
        path: Option<PathBuf>,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { path } => validate_config(&path),
        ConfigCommand::Show { path, format } => show_config(path.as_deref(), &format),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  store:     {} ({})", config.store.backend, config.store.root);
    println!(
        "  lock:      {}s, renewed every {}s",
        config.lock.duration_seconds,
        config.lock_settings().renewal_interval().as_secs()
    );
    println!("  handoff:   {}", config.lifecycle.handoff_dir);
    if config.store.backend == "memory" {
        println!("  ⚠ Warning: memory backend keeps no state between invocations");
    }
    Ok(())
}

fn show_config(path: Option<&Path>, format: &str) -> Result<()> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_toml("")?,
    };
    print!("{}", render_config(&config, format)?);
    Ok(())
}

fn render_config(config: &Config, format: &str) -> Result<String> {
    Ok(match format {
        "json" => format!("{}\n", serde_json::to_string_pretty(config)?),
        _ => toml::to_string_pretty(config)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_defaults_as_toml() {
        let rendered = render_config(&Config::default(), "toml").unwrap();
        assert!(rendered.contains("[lock]"));
        assert!(rendered.contains("duration_seconds = 20"));
        assert!(rendered.contains("handoff_dir = \"handoff\""));
    }

    #[test]
    fn validate_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_config(&dir.path().join("missing.toml")).is_err());
    }
}
