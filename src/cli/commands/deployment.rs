//! Deployment command implementation.

use crate::core::context::DeploymentContext;
use crate::lock::LockGuard;
use crate::remote::migration::{migrate_document, MigrationContext};
use crate::remote::model::{ClusterRef, RemoteConfigDocument, CURRENT_SCHEMA_VERSION};
use crate::remote::RemoteConfigStore;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Remote configuration document operations.
#[derive(Args, Debug)]
pub struct DeploymentArgs {
    #[command(subcommand)]
    pub command: DeploymentCommand,
}

/// Deployment subcommands.
#[derive(Subcommand, Debug)]
pub enum DeploymentCommand {
    /// Create the remote configuration for a new deployment.
    Create {
        /// Namespace the deployment lives in.
        #[arg(short, long)]
        namespace: String,
        /// Deployment name.
        #[arg(short, long)]
        deployment: String,
        /// Cluster reference to register (repeatable).
        #[arg(long = "cluster")]
        clusters: Vec<String>,
        /// DNS base domain for registered clusters.
        #[arg(long, default_value = "cluster.local")]
        dns_base_domain: String,
        /// Owner contact recorded in the metadata.
        #[arg(long)]
        owner_email: Option<String>,
    },
    /// Print the remote configuration.
    Show {
        #[arg(short, long)]
        namespace: String,
        /// Output format (yaml, json).
        #[arg(long, default_value = "yaml")]
        format: String,
    },
    /// Print the command history.
    History {
        #[arg(short, long)]
        namespace: String,
    },
    /// Migrate the stored document to the current schema version.
    Migrate {
        #[arg(short, long)]
        namespace: String,
    },
    /// Migrate a document file offline and print the result.
    ValidateFile {
        /// Document file path.
        path: PathBuf,
        /// Output format (yaml, json).
        #[arg(long, default_value = "yaml")]
        format: String,
    },
}

/// Run the deployment command.
pub async fn run_deployment(args: DeploymentArgs, ctx: &DeploymentContext) -> Result<()> {
    match args.command {
        DeploymentCommand::Create {
            namespace,
            deployment,
            clusters,
            dns_base_domain,
            owner_email,
        } => {
            create(
                ctx,
                &namespace,
                &deployment,
                &clusters,
                &dns_base_domain,
                owner_email,
            )
            .await
        }
        DeploymentCommand::Show { namespace, format } => show(ctx, &namespace, &format).await,
        DeploymentCommand::History { namespace } => history(ctx, &namespace).await,
        DeploymentCommand::Migrate { namespace } => migrate(ctx, &namespace).await,
        DeploymentCommand::ValidateFile { path, format } => validate_file(ctx, &path, &format),
    }
}

async fn create(
    ctx: &DeploymentContext,
    namespace: &str,
    deployment: &str,
    clusters: &[String],
    dns_base_domain: &str,
    owner_email: Option<String>,
) -> Result<()> {
    let mut document = RemoteConfigDocument::new(
        namespace,
        deployment,
        ctx.holder().updated_by(),
        ctx.clock().now(),
        env!("CARGO_PKG_VERSION"),
    );
    document.metadata.owner_email = owner_email;
    for name in clusters {
        let mut cluster = ClusterRef::new(name, namespace, deployment);
        cluster.dns_base_domain = dns_base_domain.to_string();
        document.add_cluster(cluster)?;
    }

    ctx.remote_store()
        .create(&document)
        .await
        .with_context(|| format!("failed to create deployment in namespace '{}'", namespace))?;
    println!("Created deployment '{}' in namespace '{}'", deployment, namespace);
    Ok(())
}

async fn show(ctx: &DeploymentContext, namespace: &str, format: &str) -> Result<()> {
    let document = ctx.remote_store().load(namespace).await?;
    print_document(&document, format)
}

async fn history(ctx: &DeploymentContext, namespace: &str) -> Result<()> {
    let document = ctx.remote_store().load(namespace).await?;
    if document.history.commands.is_empty() {
        println!("No commands recorded");
        return Ok(());
    }
    for (index, command) in document.history.commands.iter().enumerate() {
        println!("{:>4}  {}", index + 1, command);
    }
    Ok(())
}

async fn migrate(ctx: &DeploymentContext, namespace: &str) -> Result<()> {
    let remote = ctx.remote_store();
    let locks = ctx.lock_manager();
    let guard = locks
        .acquire_with_retry(namespace, &ctx.config().lock_acquire_policy())
        .await?;
    let result = migrate_locked(&remote, &guard, namespace).await;
    if let Err(e) = locks.release(&guard).await {
        tracing::warn!(namespace, error = %e, "failed to release lock");
    }

    match result? {
        Some(from) => println!(
            "Migrated namespace '{}' from schema version {} to {}",
            namespace, from, CURRENT_SCHEMA_VERSION
        ),
        None => println!(
            "Namespace '{}' already at schema version {}",
            namespace, CURRENT_SCHEMA_VERSION
        ),
    }
    Ok(())
}

/// Rewrite the document at the current schema, returning the schema it was
/// stored at if a migration happened.
async fn migrate_locked(
    remote: &RemoteConfigStore,
    guard: &LockGuard,
    namespace: &str,
) -> Result<Option<u32>> {
    let loaded = remote.load_versioned(namespace).await?;
    if loaded.stored_schema_version >= CURRENT_SCHEMA_VERSION {
        return Ok(None);
    }
    remote
        .modify(guard, "deployment migrate", |_| Ok(()))
        .await?;
    Ok(Some(loaded.stored_schema_version))
}

fn validate_file(ctx: &DeploymentContext, path: &PathBuf, format: &str) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let migrated = migrate_document(&bytes, &MigrationContext::new(ctx.clock().now()))
        .with_context(|| format!("failed to migrate {}", path.display()))?;
    eprintln!(
        "Document is valid (schema version {} -> {})",
        migrated.from_version, CURRENT_SCHEMA_VERSION
    );
    print_document(&migrated.document, format)
}

fn print_document(document: &RemoteConfigDocument, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(document)?),
        _ => print!("{}", serde_yaml::to_string(document)?),
    }
    Ok(())
}
