//! Schema version 1: list-based clusters and per-kind component state.

use super::v2::{DocumentV2, NodeV2, RelayV2, StateV2};
use super::MigrationContext;
use crate::remote::model::{
    BasicComponentState, ClusterRef, ComponentMetadata, DeploymentHistory, DeploymentPhase,
    LedgerPhase, UpdatedBy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentV1 {
    pub schema_version: u32,
    pub metadata: MetadataV1,
    #[serde(default)]
    pub versions: VersionsV1,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    #[serde(default)]
    pub state: StateV1,
    #[serde(default)]
    pub history: DeploymentHistory,
}

/// Metadata layout shared by schema versions 1 through 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataV1 {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub deployment_name: String,
    pub last_updated_at: DateTime<Utc>,
    pub last_updated_by: UpdatedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

/// Version block shared by schema versions 1 through 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsV1 {
    pub cli: String,
    pub chart: String,
    pub consensus_node: String,
    pub mirror_node_chart: String,
    pub explorer_chart: String,
    pub json_rpc_relay_chart: String,
    pub block_node_chart: String,
}

impl Default for VersionsV1 {
    fn default() -> Self {
        let unset = || "0.0.0".to_string();
        Self {
            cli: unset(),
            chart: unset(),
            consensus_node: unset(),
            mirror_node_chart: unset(),
            explorer_chart: unset(),
            json_rpc_relay_chart: unset(),
            block_node_chart: unset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentV1 {
    pub id: u32,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
    pub phase: DeploymentPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeV1 {
    pub metadata: ComponentV1,
    pub name: String,
}

/// Relay reference to a consensus node, by alias or by zero-based node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Id(u32),
    Alias(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayV1 {
    pub metadata: ComponentV1,
    #[serde(default)]
    pub consensus_nodes: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicV1 {
    pub metadata: ComponentV1,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateV1 {
    #[serde(default)]
    pub ledger_phase: LedgerPhase,
    #[serde(default)]
    pub consensus_nodes: Vec<NodeV1>,
    #[serde(default)]
    pub block_nodes: Vec<BasicV1>,
    #[serde(default)]
    pub mirror_nodes: Vec<BasicV1>,
    #[serde(default)]
    pub relay_nodes: Vec<RelayV1>,
    #[serde(default)]
    pub explorers: Vec<BasicV1>,
    #[serde(default)]
    pub ha_proxies: Vec<BasicV1>,
    #[serde(default)]
    pub envoy_proxies: Vec<BasicV1>,
}

fn with_port_forwards(c: ComponentV1) -> ComponentMetadata {
    ComponentMetadata {
        id: c.id,
        namespace: c.namespace,
        cluster: c.cluster,
        phase: c.phase,
        port_forward_configs: Vec::new(),
    }
}

fn basic(list: Vec<BasicV1>) -> Vec<BasicComponentState> {
    list.into_iter()
        .map(|c| BasicComponentState {
            metadata: with_port_forwards(c.metadata),
        })
        .collect()
}

impl DocumentV1 {
    /// Add empty port forward lists to every component.
    pub fn upgrade(self, ctx: &MigrationContext) -> DocumentV2 {
        let state = self.state;
        DocumentV2 {
            schema_version: 2,
            metadata: MetadataV1 {
                last_updated_at: ctx.now,
                last_updated_by: UpdatedBy::migration(),
                ..self.metadata
            },
            versions: self.versions,
            clusters: self.clusters,
            state: StateV2 {
                ledger_phase: state.ledger_phase,
                consensus_nodes: state
                    .consensus_nodes
                    .into_iter()
                    .map(|n| NodeV2 {
                        metadata: with_port_forwards(n.metadata),
                        name: n.name,
                    })
                    .collect(),
                block_nodes: basic(state.block_nodes),
                mirror_nodes: basic(state.mirror_nodes),
                relay_nodes: state
                    .relay_nodes
                    .into_iter()
                    .map(|r| RelayV2 {
                        metadata: with_port_forwards(r.metadata),
                        consensus_nodes: r.consensus_nodes,
                    })
                    .collect(),
                explorers: basic(state.explorers),
                ha_proxies: basic(state.ha_proxies),
                envoy_proxies: basic(state.envoy_proxies),
            },
            history: self.history,
        }
    }
}
