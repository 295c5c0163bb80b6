//! Legacy unversioned documents.
//!
//! Before schema versioning, clusters and components were keyed maps, tool
//! and chart versions lived in the metadata block, and the command history
//! was either a list or a map keyed by command.

use super::v1::{
    BasicV1, ComponentV1, DocumentV1, MetadataV1, NodeRef, NodeV1, RelayV1, StateV1, VersionsV1,
};
use super::MigrationContext;
use crate::remote::model::{
    default_dns_base_domain, default_dns_node_pattern, ClusterRef, DeploymentHistory,
    DeploymentPhase, LedgerPhase, UpdatedBy,
};
use serde::Deserialize;
use std::collections::BTreeMap;

const UNSET_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentV0 {
    #[serde(default)]
    pub metadata: MetadataV0,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterV0>,
    #[serde(default)]
    pub components: ComponentsV0,
    #[serde(default)]
    pub command_history: CommandHistoryV0,
    #[serde(default)]
    pub last_executed_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataV0 {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub deployment_name: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    pub tool_version: Option<String>,
    pub chart_version: Option<String>,
    pub platform_version: Option<String>,
    pub mirror_node_chart_version: Option<String>,
    pub explorer_chart_version: Option<String>,
    pub relay_chart_version: Option<String>,
    pub block_node_chart_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterV0 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub deployment: String,
    pub dns_base_domain: Option<String>,
    pub dns_consensus_node_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsV0 {
    #[serde(default)]
    pub consensus_nodes: BTreeMap<String, ConsensusNodeV0>,
    #[serde(default)]
    pub block_nodes: BTreeMap<String, ComponentV0>,
    #[serde(default)]
    pub mirror_nodes: BTreeMap<String, ComponentV0>,
    #[serde(default)]
    pub relay_nodes: BTreeMap<String, RelayV0>,
    #[serde(default)]
    pub explorers: BTreeMap<String, ComponentV0>,
    #[serde(default)]
    pub ha_proxies: BTreeMap<String, ComponentV0>,
    #[serde(default)]
    pub envoy_proxies: BTreeMap<String, ComponentV0>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusNodeV0 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_id: u32,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentV0 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayV0 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub consensus_node_aliases: Vec<String>,
}

/// Command history as a plain list or as a map keyed by command.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandHistoryV0 {
    List(Vec<String>),
    Keyed(serde_yaml::Mapping),
}

impl Default for CommandHistoryV0 {
    fn default() -> Self {
        CommandHistoryV0::List(Vec::new())
    }
}

impl CommandHistoryV0 {
    fn into_commands(self) -> Vec<String> {
        match self {
            CommandHistoryV0::List(commands) => commands,
            CommandHistoryV0::Keyed(map) => map
                .into_iter()
                .filter_map(|(key, _)| key.as_str().map(str::to_string))
                .collect(),
        }
    }
}

fn version_or_unset(version: Option<String>) -> String {
    version.unwrap_or_else(|| UNSET_VERSION.to_string())
}

fn started(id: u32, namespace: String, cluster: String) -> ComponentV1 {
    ComponentV1 {
        id,
        namespace,
        cluster,
        phase: DeploymentPhase::Started,
    }
}

fn basic_components(map: BTreeMap<String, ComponentV0>) -> Vec<BasicV1> {
    map.into_values()
        .enumerate()
        .map(|(index, c)| BasicV1 {
            metadata: started(index as u32, c.namespace, c.cluster),
        })
        .collect()
}

impl DocumentV0 {
    /// Restructure a legacy document into schema version 1.
    ///
    /// Every legacy component was running, so all records start out in the
    /// `started` phase. Ids are zero-based at this version.
    pub fn upgrade(self, ctx: &MigrationContext) -> DocumentV1 {
        let meta = self.metadata;

        let versions = VersionsV1 {
            cli: meta
                .tool_version
                .unwrap_or_else(|| ctx.tool_version.clone()),
            chart: version_or_unset(meta.chart_version),
            consensus_node: version_or_unset(meta.platform_version),
            mirror_node_chart: version_or_unset(meta.mirror_node_chart_version),
            explorer_chart: version_or_unset(meta.explorer_chart_version),
            json_rpc_relay_chart: version_or_unset(meta.relay_chart_version),
            block_node_chart: version_or_unset(meta.block_node_chart_version),
        };

        let clusters = self
            .clusters
            .into_iter()
            .map(|(key, c)| ClusterRef {
                name: if c.name.is_empty() { key } else { c.name },
                namespace: c.namespace,
                deployment: c.deployment,
                dns_base_domain: c.dns_base_domain.unwrap_or_else(default_dns_base_domain),
                dns_node_pattern: c
                    .dns_consensus_node_pattern
                    .unwrap_or_else(default_dns_node_pattern),
            })
            .collect();

        let components = self.components;
        let state = StateV1 {
            ledger_phase: LedgerPhase::Initialized,
            consensus_nodes: components
                .consensus_nodes
                .into_iter()
                .map(|(key, n)| NodeV1 {
                    metadata: started(n.node_id, n.namespace, n.cluster),
                    name: if n.name.is_empty() { key } else { n.name },
                })
                .collect(),
            block_nodes: basic_components(components.block_nodes),
            mirror_nodes: basic_components(components.mirror_nodes),
            relay_nodes: components
                .relay_nodes
                .into_values()
                .enumerate()
                .map(|(index, r)| RelayV1 {
                    metadata: started(index as u32, r.namespace, r.cluster),
                    consensus_nodes: r
                        .consensus_node_aliases
                        .into_iter()
                        .map(NodeRef::Alias)
                        .collect(),
                })
                .collect(),
            explorers: basic_components(components.explorers),
            ha_proxies: basic_components(components.ha_proxies),
            envoy_proxies: basic_components(components.envoy_proxies),
        };

        let commands = self.command_history.into_commands();
        let last_executed_command = self
            .last_executed_command
            .or_else(|| commands.last().cloned());

        DocumentV1 {
            schema_version: 1,
            metadata: MetadataV1 {
                namespace: meta.namespace,
                deployment_name: meta.deployment_name,
                last_updated_at: ctx.now,
                last_updated_by: UpdatedBy::migration(),
                owner_email: meta.owner_email,
            },
            versions,
            clusters,
            state,
            history: DeploymentHistory {
                commands: commands.into(),
                last_executed_command,
            },
        }
    }
}
