//! Schema version 2: port forward configuration on every component.

use super::v1::{MetadataV1, NodeRef, VersionsV1};
use super::v3::{DocumentV3, StateV3};
use super::MigrationContext;
use crate::remote::model::{
    node_id_from_alias, BasicComponentState, ClusterRef, ComponentIds, ComponentKind,
    ComponentMetadata, DeploymentHistory, LedgerPhase, RelayNodeState,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentV2 {
    pub schema_version: u32,
    pub metadata: MetadataV1,
    #[serde(default)]
    pub versions: VersionsV1,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    #[serde(default)]
    pub state: StateV2,
    #[serde(default)]
    pub history: DeploymentHistory,
}

/// Consensus node record without block node assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeV2 {
    pub metadata: ComponentMetadata,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayV2 {
    pub metadata: ComponentMetadata,
    #[serde(default)]
    pub consensus_nodes: Vec<NodeRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateV2 {
    #[serde(default)]
    pub ledger_phase: LedgerPhase,
    #[serde(default)]
    pub consensus_nodes: Vec<NodeV2>,
    #[serde(default)]
    pub block_nodes: Vec<BasicComponentState>,
    #[serde(default)]
    pub mirror_nodes: Vec<BasicComponentState>,
    #[serde(default)]
    pub relay_nodes: Vec<RelayV2>,
    #[serde(default)]
    pub explorers: Vec<BasicComponentState>,
    #[serde(default)]
    pub ha_proxies: Vec<BasicComponentState>,
    #[serde(default)]
    pub envoy_proxies: Vec<BasicComponentState>,
}

fn one_based(mut metadata: ComponentMetadata) -> ComponentMetadata {
    metadata.id += 1;
    metadata
}

fn one_based_basic(list: Vec<BasicComponentState>) -> Vec<BasicComponentState> {
    list.into_iter()
        .map(|c| BasicComponentState {
            metadata: one_based(c.metadata),
        })
        .collect()
}

/// Resolve a relay's node reference to a one-based consensus node id.
fn consensus_id(node: NodeRef) -> Option<u32> {
    match node {
        NodeRef::Id(zero_based) => Some(zero_based + 1),
        NodeRef::Alias(alias) => node_id_from_alias(&alias),
    }
}

impl DocumentV2 {
    /// Switch to one-based ids, seed the per-kind id counters and resolve
    /// relay node references to numeric ids.
    pub fn upgrade(self, _ctx: &MigrationContext) -> DocumentV3 {
        let state = self.state;

        let mut component_ids = ComponentIds::new();
        let counts = [
            (ComponentKind::ConsensusNode, state.consensus_nodes.len()),
            (ComponentKind::BlockNode, state.block_nodes.len()),
            (ComponentKind::MirrorNode, state.mirror_nodes.len()),
            (ComponentKind::RelayNode, state.relay_nodes.len()),
            (ComponentKind::Explorer, state.explorers.len()),
            (ComponentKind::HaProxy, state.ha_proxies.len()),
            (ComponentKind::EnvoyProxy, state.envoy_proxies.len()),
        ];
        for (kind, count) in counts {
            component_ids.insert(kind, count as u32 + 1);
        }

        DocumentV3 {
            schema_version: 3,
            metadata: self.metadata,
            versions: self.versions,
            clusters: self.clusters,
            state: StateV3 {
                ledger_phase: state.ledger_phase,
                consensus_nodes: state
                    .consensus_nodes
                    .into_iter()
                    .map(|n| NodeV2 {
                        metadata: one_based(n.metadata),
                        name: n.name,
                    })
                    .collect(),
                block_nodes: one_based_basic(state.block_nodes),
                mirror_nodes: one_based_basic(state.mirror_nodes),
                relay_nodes: state
                    .relay_nodes
                    .into_iter()
                    .map(|r| RelayNodeState {
                        metadata: one_based(r.metadata),
                        consensus_node_ids: r
                            .consensus_nodes
                            .into_iter()
                            .filter_map(consensus_id)
                            .collect(),
                    })
                    .collect(),
                explorers: one_based_basic(state.explorers),
                ha_proxies: one_based_basic(state.ha_proxies),
                envoy_proxies: one_based_basic(state.envoy_proxies),
                component_ids,
            },
            history: self.history,
        }
    }
}
