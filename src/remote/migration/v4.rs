//! Schema version 4: block node assignments on consensus nodes.
//!
//! Upgrading from 4 produces the current layout: the ledger phase moves
//! into the metadata block, versions become a map keyed by component kind
//! and the components block gains the TSS flag.

use super::v1::{MetadataV1, VersionsV1};
use super::MigrationContext;
use crate::remote::model::{
    BasicComponentState, ClusterRef, ComponentIds, ComponentKind, ComponentsState,
    ConsensusNodeState, DeploymentHistory, DeploymentMetadata, LedgerPhase, RelayNodeState,
    RemoteConfigDocument,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentV4 {
    pub schema_version: u32,
    pub metadata: MetadataV1,
    #[serde(default)]
    pub versions: VersionsV1,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    #[serde(default)]
    pub state: StateV4,
    #[serde(default)]
    pub history: DeploymentHistory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateV4 {
    #[serde(default)]
    pub ledger_phase: LedgerPhase,
    #[serde(default)]
    pub consensus_nodes: Vec<ConsensusNodeState>,
    #[serde(default)]
    pub block_nodes: Vec<BasicComponentState>,
    #[serde(default)]
    pub mirror_nodes: Vec<BasicComponentState>,
    #[serde(default)]
    pub relay_nodes: Vec<RelayNodeState>,
    #[serde(default)]
    pub explorers: Vec<BasicComponentState>,
    #[serde(default)]
    pub ha_proxies: Vec<BasicComponentState>,
    #[serde(default)]
    pub envoy_proxies: Vec<BasicComponentState>,
    #[serde(default)]
    pub component_ids: ComponentIds,
}

/// Parse a recorded version string, tolerating a `v` prefix and missing
/// minor/patch components. Unset (`0.0.0`) and unparseable values yield `None`.
pub(crate) fn parse_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let parsed = semver::Version::parse(trimmed)
        .or_else(|_| semver::Version::parse(&format!("{}.0", trimmed)))
        .or_else(|_| semver::Version::parse(&format!("{}.0.0", trimmed)))
        .ok()?;
    if parsed == semver::Version::new(0, 0, 0) {
        return None;
    }
    Some(parsed)
}

impl DocumentV4 {
    /// Restructure into the current document layout with TSS disabled.
    pub fn upgrade(self, ctx: &MigrationContext) -> RemoteConfigDocument {
        let versions = self.versions;
        let per_kind = [
            (ComponentKind::ConsensusNode, &versions.consensus_node),
            (ComponentKind::MirrorNode, &versions.mirror_node_chart),
            (ComponentKind::Explorer, &versions.explorer_chart),
            (ComponentKind::RelayNode, &versions.json_rpc_relay_chart),
            (ComponentKind::BlockNode, &versions.block_node_chart),
        ];
        let mut by_kind = BTreeMap::new();
        for (kind, raw) in per_kind {
            if let Some(version) = parse_version(raw) {
                by_kind.insert(kind, version);
            }
        }

        let tool_version = parse_version(&versions.cli)
            .map(|v| v.to_string())
            .unwrap_or_else(|| ctx.tool_version.clone());

        let state = self.state;
        RemoteConfigDocument {
            schema_version: 5,
            clusters: self.clusters,
            metadata: DeploymentMetadata {
                namespace: self.metadata.namespace,
                deployment_name: self.metadata.deployment_name,
                ledger_phase: state.ledger_phase,
                last_updated_at: self.metadata.last_updated_at,
                last_updated_by: self.metadata.last_updated_by,
                owner_email: self.metadata.owner_email,
                tool_version,
            },
            versions: by_kind,
            components: ComponentsState {
                consensus_nodes: state.consensus_nodes,
                block_nodes: state.block_nodes,
                mirror_nodes: state.mirror_nodes,
                relay_nodes: state.relay_nodes,
                explorers: state.explorers,
                ha_proxies: state.ha_proxies,
                envoy_proxies: state.envoy_proxies,
                component_ids: state.component_ids,
                tss_enabled: false,
            },
            history: self.history,
        }
    }
}
