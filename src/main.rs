//! Ledgerdeck - operator CLI entrypoint.
//!
//! Usage:
//!   ledgerdeck deployment create --namespace ns1 --deployment d1 --cluster cluster-a
//!   ledgerdeck deployment show --namespace ns1 [--format json]
//!   ledgerdeck deployment history --namespace ns1
//!   ledgerdeck deployment migrate --namespace ns1
//!   ledgerdeck deployment validate-file remote-config.yaml
//!   ledgerdeck lock status --namespace ns1
//!   ledgerdeck lock release --namespace ns1
//!   ledgerdeck config validate ledgerdeck.toml

use anyhow::Result;
use clap::Parser;
use ledgerdeck::cli::commands::{run_config, run_deployment, run_lock};
use ledgerdeck::cli::{init_tracing, Cli, Commands};
use ledgerdeck::core::context::DeploymentContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Config commands work on files directly and need no store.
        Commands::Config(args) => {
            init_tracing(cli.global.log_level.as_deref().unwrap_or("info"));
            run_config(args)
        }
        command => {
            let config = cli.global.load_config()?;
            init_tracing(&config.telemetry.log_level);
            let ctx = DeploymentContext::new(config)?;
            match command {
                Commands::Deployment(args) => run_deployment(args, &ctx).await,
                Commands::Lock(args) => run_lock(args, &ctx).await,
                Commands::Config(args) => run_config(args),
            }
        }
    }
}
