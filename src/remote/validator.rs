//! Liveness validation of recorded components.
//!
//! Every component the document records as live (Requested through Started)
//! must have at least one pod in its cluster. Frozen and stopped components
//! are not expected to run and are skipped. All checks run concurrently and
//! the first missing component in document order is reported.

use super::model::{ComponentKind, RemoteConfigDocument};
use crate::adapters::OrchestrationClient;
use crate::core::error::{DeployError, DeployResult};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which components a validation run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Run validation at all.
    pub enabled: bool,
    /// Kinds excluded from validation.
    pub skip_kinds: BTreeSet<ComponentKind>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl ValidationPolicy {
    /// Validate every kind.
    pub fn strict() -> Self {
        Self {
            enabled: true,
            skip_kinds: BTreeSet::new(),
        }
    }

    /// Skip validation entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            skip_kinds: BTreeSet::new(),
        }
    }

    /// Validate everything except `kinds`.
    pub fn skipping(kinds: impl IntoIterator<Item = ComponentKind>) -> Self {
        Self {
            enabled: true,
            skip_kinds: kinds.into_iter().collect(),
        }
    }

    /// Check whether components of `kind` are validated.
    pub fn covers(&self, kind: ComponentKind) -> bool {
        self.enabled && !self.skip_kinds.contains(&kind)
    }
}

/// Cross-checks the document against the orchestration layer.
#[derive(Clone)]
pub struct RemoteConfigValidator {
    orchestration: Arc<dyn OrchestrationClient>,
}

struct Check {
    kind: ComponentKind,
    id: u32,
    name: String,
    cluster: String,
    namespace: String,
    selector: String,
}

impl RemoteConfigValidator {
    pub fn new(orchestration: Arc<dyn OrchestrationClient>) -> Self {
        Self { orchestration }
    }

    /// Validate `document` under `policy`.
    pub async fn validate(
        &self,
        document: &RemoteConfigDocument,
        policy: &ValidationPolicy,
    ) -> DeployResult<()> {
        if !policy.enabled {
            tracing::debug!(namespace = %document.namespace(), "remote config validation disabled");
            return Ok(());
        }

        let components = &document.components;
        let mut checks = Vec::new();
        for (kind, metadata) in components.all() {
            if !policy.covers(kind) || !metadata.phase.is_live() {
                continue;
            }
            let name = components.display_name(kind, metadata.id);
            if document.cluster(&metadata.cluster).is_none() {
                return Err(DeployError::Validation {
                    kind,
                    id: metadata.id,
                    name,
                    reason: format!("references unknown cluster '{}'", metadata.cluster),
                });
            }
            checks.push(Check {
                kind,
                id: metadata.id,
                selector: kind.label_selector(metadata.id, &name),
                name,
                cluster: metadata.cluster.clone(),
                namespace: metadata.namespace.clone(),
            });
        }

        let results = join_all(checks.iter().map(|check| {
            self.orchestration
                .list_pods(&check.cluster, &check.namespace, &check.selector)
        }))
        .await;

        for (check, result) in checks.into_iter().zip(results) {
            let reason = match result {
                Ok(pods) if !pods.is_empty() => continue,
                Ok(_) => format!(
                    "not found: no pods match '{}' in cluster '{}' namespace '{}'",
                    check.selector, check.cluster, check.namespace
                ),
                Err(e) => format!("could not be checked: {}", e),
            };
            tracing::warn!(
                kind = %check.kind,
                id = check.id,
                name = %check.name,
                %reason,
                "remote config validation failed"
            );
            return Err(DeployError::Validation {
                kind: check.kind,
                id: check.id,
                name: check.name,
                reason,
            });
        }

        tracing::debug!(namespace = %document.namespace(), "remote config validated");
        Ok(())
    }
}
