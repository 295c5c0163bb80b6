//! Schema version 3: one-based ids and per-kind id counters.

use super::v1::{MetadataV1, VersionsV1};
use super::v2::NodeV2;
use super::v4::{DocumentV4, StateV4};
use super::MigrationContext;
use crate::remote::model::{
    BasicComponentState, ClusterRef, ComponentIds, ConsensusNodeState, DeploymentHistory,
    LedgerPhase, RelayNodeState,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentV3 {
    pub schema_version: u32,
    pub metadata: MetadataV1,
    #[serde(default)]
    pub versions: VersionsV1,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    #[serde(default)]
    pub state: StateV3,
    #[serde(default)]
    pub history: DeploymentHistory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateV3 {
    #[serde(default)]
    pub ledger_phase: LedgerPhase,
    #[serde(default)]
    pub consensus_nodes: Vec<NodeV2>,
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

impl DocumentV3 {
    /// Attach every existing block node to every consensus node.
    pub fn upgrade(self, _ctx: &MigrationContext) -> DocumentV4 {
        let state = self.state;
        let block_node_ids: Vec<u32> = state.block_nodes.iter().map(|b| b.metadata.id).collect();

        DocumentV4 {
            schema_version: 4,
            metadata: self.metadata,
            versions: self.versions,
            clusters: self.clusters,
            state: StateV4 {
                ledger_phase: state.ledger_phase,
                consensus_nodes: state
                    .consensus_nodes
                    .into_iter()
                    .map(|n| ConsensusNodeState {
                        metadata: n.metadata,
                        name: n.name,
                        block_node_ids: block_node_ids.clone(),
                    })
                    .collect(),
                block_nodes: state.block_nodes,
                mirror_nodes: state.mirror_nodes,
                relay_nodes: state.relay_nodes,
                explorers: state.explorers,
                ha_proxies: state.ha_proxies,
                envoy_proxies: state.envoy_proxies,
                component_ids: state.component_ids,
            },
            history: self.history,
        }
    }
}
