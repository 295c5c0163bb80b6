//! Lock command implementation.

use crate::core::context::DeploymentContext;
use anyhow::Result;
use clap::{Args, Subcommand};

/// Namespace lock operations.
#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommand,
}

/// Lock subcommands.
#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Show the lock record for a namespace.
    Status {
        #[arg(short, long)]
        namespace: String,
    },
    /// Remove a stale lock record or one left by an exited process on this host.
    Release {
        #[arg(short, long)]
        namespace: String,
    },
}

/// Run the lock command.
pub async fn run_lock(args: LockArgs, ctx: &DeploymentContext) -> Result<()> {
    match args.command {
        LockCommand::Status { namespace } => status(ctx, &namespace).await,
        LockCommand::Release { namespace } => release(ctx, &namespace).await,
    }
}

async fn status(ctx: &DeploymentContext, namespace: &str) -> Result<()> {
    let Some(record) = ctx.lock_manager().status(namespace).await? else {
        println!("Namespace '{}' is not locked", namespace);
        return Ok(());
    };

    let now = ctx.clock().now();
    let state = if record.is_stale_at(now) { "stale" } else { "held" };
    println!("Namespace:   {}", record.namespace);
    println!("State:       {}", state);
    println!("Holder:      {}", record.holder);
    println!("Acquired at: {}", record.acquired_at.to_rfc3339());
    println!("Renewed at:  {}", record.renewed_at.to_rfc3339());
    match record.expires_at() {
        Some(expires) => println!("Expires at:  {}", expires.to_rfc3339()),
        None => println!("Expires at:  never"),
    }
    println!("Generation:  {}", record.generation);
    Ok(())
}

async fn release(ctx: &DeploymentContext, namespace: &str) -> Result<()> {
    if ctx.lock_manager().clear(namespace).await? {
        println!("Released lock on namespace '{}'", namespace);
    } else {
        println!("Namespace '{}' is not locked", namespace);
    }
    Ok(())
}
