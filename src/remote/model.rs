//! Remote configuration document model.
//!
//! The document is the shared source of truth for a deployment: which
//! clusters it spans, which components live where and in what lifecycle
//! phase, which software versions are installed and which commands touched
//! it. Field names serialize in camelCase so documents stay readable by
//! operators inspecting the store directly.

use crate::core::error::{DeployError, DeployResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 5;

/// Default bound on the command history.
pub const DEFAULT_MAX_COMMAND_HISTORY: usize = 50;

// ============================================================================
// Component kinds and phases
// ============================================================================

/// Closed set of component kinds tracked by the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    ConsensusNode,
    BlockNode,
    MirrorNode,
    RelayNode,
    Explorer,
    HaProxy,
    EnvoyProxy,
}

impl ComponentKind {
    /// All kinds in document order.
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::ConsensusNode,
        ComponentKind::BlockNode,
        ComponentKind::MirrorNode,
        ComponentKind::RelayNode,
        ComponentKind::Explorer,
        ComponentKind::HaProxy,
        ComponentKind::EnvoyProxy,
    ];

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::ConsensusNode => "consensus-node",
            ComponentKind::BlockNode => "block-node",
            ComponentKind::MirrorNode => "mirror-node",
            ComponentKind::RelayNode => "relay-node",
            ComponentKind::Explorer => "explorer",
            ComponentKind::HaProxy => "haproxy",
            ComponentKind::EnvoyProxy => "envoy-proxy",
        }
    }

    /// Pod label selector identifying a component's workload.
    pub fn label_selector(&self, id: u32, name: &str) -> String {
        match self {
            ComponentKind::ConsensusNode => format!("app=network-{}", name),
            ComponentKind::BlockNode => format!("app.kubernetes.io/instance=block-node-{}", id),
            ComponentKind::MirrorNode => format!(
                "app.kubernetes.io/component=importer,app.kubernetes.io/instance=mirror-{}",
                id
            ),
            ComponentKind::RelayNode => format!("app.kubernetes.io/instance=relay-{}", id),
            ComponentKind::Explorer => format!("app.kubernetes.io/instance=explorer-{}", id),
            ComponentKind::HaProxy => format!("app=haproxy-{}", id),
            ComponentKind::EnvoyProxy => format!("app=envoy-proxy-{}", id),
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a single component.
///
/// Ordered: Requested < Deployed < Configured < Started < Frozen < Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentPhase {
    Requested,
    Deployed,
    Configured,
    Started,
    Frozen,
    Stopped,
}

impl DeploymentPhase {
    /// Check whether moving from `self` to `next` is permitted.
    ///
    /// Phases only move forward, except `Started -> Configured` which an
    /// update uses to revisit configuration.
    pub fn can_transition_to(&self, next: DeploymentPhase) -> bool {
        next > *self || (*self == DeploymentPhase::Started && next == DeploymentPhase::Configured)
    }

    /// Phases whose components are expected to be running in the cluster.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            DeploymentPhase::Requested
                | DeploymentPhase::Deployed
                | DeploymentPhase::Configured
                | DeploymentPhase::Started
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::Requested => "requested",
            DeploymentPhase::Deployed => "deployed",
            DeploymentPhase::Configured => "configured",
            DeploymentPhase::Started => "started",
            DeploymentPhase::Frozen => "frozen",
            DeploymentPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the ledger as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerPhase {
    #[default]
    Uninitialized,
    Initialized,
}

// ============================================================================
// Clusters and metadata
// ============================================================================

/// A cluster participating in the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    /// Cluster reference name, unique within the document.
    pub name: String,
    /// Namespace the deployment uses in this cluster.
    pub namespace: String,
    /// Deployment name.
    pub deployment: String,
    #[serde(default = "default_dns_base_domain")]
    pub dns_base_domain: String,
    #[serde(default = "default_dns_node_pattern", alias = "dnsConsensusNodePattern")]
    pub dns_node_pattern: String,
}

impl ClusterRef {
    /// Create a cluster reference with default DNS settings.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            deployment: deployment.into(),
            dns_base_domain: default_dns_base_domain(),
            dns_node_pattern: default_dns_node_pattern(),
        }
    }

    /// Fully-qualified service address for a consensus node in this cluster.
    pub fn node_address(&self, node_name: &str) -> String {
        let host = self
            .dns_node_pattern
            .replace("{nodeAlias}", node_name)
            .replace("{namespace}", &self.namespace);
        format!("{}.{}", host, self.dns_base_domain)
    }
}

pub(crate) fn default_dns_base_domain() -> String {
    "cluster.local".to_string()
}

pub(crate) fn default_dns_node_pattern() -> String {
    "network-{nodeAlias}-svc.{namespace}.svc".to_string()
}

/// Identity stamped on every document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedBy {
    pub name: String,
    pub hostname: String,
}

impl UpdatedBy {
    /// Identity used for writes performed by schema migration.
    pub fn migration() -> Self {
        Self {
            name: "system".to_string(),
            hostname: "migration".to_string(),
        }
    }
}

/// Deployment-wide metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub namespace: String,
    pub deployment_name: String,
    #[serde(default)]
    pub ledger_phase: LedgerPhase,
    pub last_updated_at: DateTime<Utc>,
    pub last_updated_by: UpdatedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    pub tool_version: String,
}

// ============================================================================
// Component records
// ============================================================================

/// Local port forward recorded for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardConfig {
    pub local_port: u16,
    pub pod_port: u16,
}

/// Fields shared by every component record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetadata {
    /// Component id, unique within kind and cluster. Ids start at 1.
    pub id: u32,
    pub namespace: String,
    pub cluster: String,
    pub phase: DeploymentPhase,
    #[serde(default)]
    pub port_forward_configs: Vec<PortForwardConfig>,
}

impl ComponentMetadata {
    pub fn new(
        id: u32,
        namespace: impl Into<String>,
        cluster: impl Into<String>,
        phase: DeploymentPhase,
    ) -> Self {
        Self {
            id,
            namespace: namespace.into(),
            cluster: cluster.into(),
            phase,
            port_forward_configs: Vec::new(),
        }
    }
}

/// Consensus node record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusNodeState {
    pub metadata: ComponentMetadata,
    /// Node alias, e.g. `node1`.
    pub name: String,
    #[serde(default)]
    pub block_node_ids: Vec<u32>,
}

/// Relay record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayNodeState {
    pub metadata: ComponentMetadata,
    /// Consensus node ids served by this relay.
    #[serde(default)]
    pub consensus_node_ids: Vec<u32>,
}

/// Record for kinds without kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicComponentState {
    pub metadata: ComponentMetadata,
}

/// Render the alias of a consensus node from its id.
pub fn node_alias(id: u32) -> String {
    format!("node{}", id)
}

/// Parse a `nodeN` alias back into its id.
pub fn node_id_from_alias(alias: &str) -> Option<u32> {
    let digits_at = alias
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    alias[digits_at..].parse().ok()
}

/// Next id to hand out per kind.
pub type ComponentIds = BTreeMap<ComponentKind, u32>;

/// All component records in a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsState {
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
    #[serde(default)]
    pub tss_enabled: bool,
}

impl ComponentsState {
    fn basic(&self, kind: ComponentKind) -> Option<&Vec<BasicComponentState>> {
        match kind {
            ComponentKind::BlockNode => Some(&self.block_nodes),
            ComponentKind::MirrorNode => Some(&self.mirror_nodes),
            ComponentKind::Explorer => Some(&self.explorers),
            ComponentKind::HaProxy => Some(&self.ha_proxies),
            ComponentKind::EnvoyProxy => Some(&self.envoy_proxies),
            ComponentKind::ConsensusNode | ComponentKind::RelayNode => None,
        }
    }

    fn basic_mut(&mut self, kind: ComponentKind) -> Option<&mut Vec<BasicComponentState>> {
        match kind {
            ComponentKind::BlockNode => Some(&mut self.block_nodes),
            ComponentKind::MirrorNode => Some(&mut self.mirror_nodes),
            ComponentKind::Explorer => Some(&mut self.explorers),
            ComponentKind::HaProxy => Some(&mut self.ha_proxies),
            ComponentKind::EnvoyProxy => Some(&mut self.envoy_proxies),
            ComponentKind::ConsensusNode | ComponentKind::RelayNode => None,
        }
    }

    /// Metadata of every component of a kind, in document order.
    pub fn metadata_of(&self, kind: ComponentKind) -> Vec<&ComponentMetadata> {
        match kind {
            ComponentKind::ConsensusNode => {
                self.consensus_nodes.iter().map(|n| &n.metadata).collect()
            }
            ComponentKind::RelayNode => self.relay_nodes.iter().map(|r| &r.metadata).collect(),
            other => self
                .basic(other)
                .map(|list| list.iter().map(|c| &c.metadata).collect())
                .unwrap_or_default(),
        }
    }

    /// Find a component's metadata by kind and id.
    pub fn find(&self, kind: ComponentKind, id: u32) -> Option<&ComponentMetadata> {
        self.metadata_of(kind).into_iter().find(|m| m.id == id)
    }

    /// Find a component's metadata mutably by kind and id.
    pub fn find_mut(&mut self, kind: ComponentKind, id: u32) -> Option<&mut ComponentMetadata> {
        match kind {
            ComponentKind::ConsensusNode => self
                .consensus_nodes
                .iter_mut()
                .map(|n| &mut n.metadata)
                .find(|m| m.id == id),
            ComponentKind::RelayNode => self
                .relay_nodes
                .iter_mut()
                .map(|r| &mut r.metadata)
                .find(|m| m.id == id),
            other => self
                .basic_mut(other)?
                .iter_mut()
                .map(|c| &mut c.metadata)
                .find(|m| m.id == id),
        }
    }

    /// Find a consensus node by id.
    pub fn consensus_node(&self, id: u32) -> Option<&ConsensusNodeState> {
        self.consensus_nodes.iter().find(|n| n.metadata.id == id)
    }

    /// Find a consensus node by alias.
    pub fn consensus_node_by_name(&self, name: &str) -> Option<&ConsensusNodeState> {
        self.consensus_nodes.iter().find(|n| n.name == name)
    }

    /// Display name of a component: the alias for consensus nodes,
    /// `<kind>-<id>` for everything else.
    pub fn display_name(&self, kind: ComponentKind, id: u32) -> String {
        if kind == ComponentKind::ConsensusNode {
            if let Some(node) = self.consensus_node(id) {
                return node.name.clone();
            }
        }
        format!("{}-{}", kind, id)
    }

    /// Next id that [`allocate_id`](Self::allocate_id) would return.
    pub fn peek_next_id(&self, kind: ComponentKind) -> u32 {
        let counter = self.component_ids.get(&kind).copied().unwrap_or(1);
        let past_max = self
            .metadata_of(kind)
            .iter()
            .map(|m| m.id + 1)
            .max()
            .unwrap_or(1);
        counter.max(past_max)
    }

    /// Reserve the next id for a kind.
    pub fn allocate_id(&mut self, kind: ComponentKind) -> u32 {
        let id = self.peek_next_id(kind);
        self.component_ids.insert(kind, id + 1);
        id
    }

    fn ensure_unique(&self, kind: ComponentKind, metadata: &ComponentMetadata) -> DeployResult<()> {
        let duplicate = self
            .metadata_of(kind)
            .iter()
            .any(|m| m.id == metadata.id && m.cluster == metadata.cluster);
        if duplicate {
            return Err(DeployError::DuplicateComponent {
                kind,
                id: metadata.id,
                cluster: metadata.cluster.clone(),
            });
        }
        Ok(())
    }

    fn bump_counter(&mut self, kind: ComponentKind, id: u32) {
        let next = self.component_ids.entry(kind).or_insert(1);
        if *next <= id {
            *next = id + 1;
        }
    }

    /// Insert a consensus node record.
    pub fn insert_consensus_node(&mut self, node: ConsensusNodeState) -> DeployResult<()> {
        self.ensure_unique(ComponentKind::ConsensusNode, &node.metadata)?;
        self.bump_counter(ComponentKind::ConsensusNode, node.metadata.id);
        self.consensus_nodes.push(node);
        Ok(())
    }

    /// Insert a relay record.
    pub fn insert_relay_node(&mut self, relay: RelayNodeState) -> DeployResult<()> {
        self.ensure_unique(ComponentKind::RelayNode, &relay.metadata)?;
        self.bump_counter(ComponentKind::RelayNode, relay.metadata.id);
        self.relay_nodes.push(relay);
        Ok(())
    }

    /// Insert a component with default kind-specific fields.
    pub fn insert_component(
        &mut self,
        kind: ComponentKind,
        metadata: ComponentMetadata,
    ) -> DeployResult<()> {
        match kind {
            ComponentKind::ConsensusNode => self.insert_consensus_node(ConsensusNodeState {
                name: node_alias(metadata.id),
                metadata,
                block_node_ids: Vec::new(),
            }),
            ComponentKind::RelayNode => self.insert_relay_node(RelayNodeState {
                metadata,
                consensus_node_ids: Vec::new(),
            }),
            other => {
                self.ensure_unique(other, &metadata)?;
                self.bump_counter(other, metadata.id);
                if let Some(list) = self.basic_mut(other) {
                    list.push(BasicComponentState { metadata });
                }
                Ok(())
            }
        }
    }

    /// Remove a component record, returning whether it existed.
    pub fn remove(&mut self, kind: ComponentKind, id: u32) -> bool {
        let before = self.metadata_of(kind).len();
        match kind {
            ComponentKind::ConsensusNode => self.consensus_nodes.retain(|n| n.metadata.id != id),
            ComponentKind::RelayNode => self.relay_nodes.retain(|r| r.metadata.id != id),
            other => {
                if let Some(list) = self.basic_mut(other) {
                    list.retain(|c| c.metadata.id != id);
                }
            }
        }
        self.metadata_of(kind).len() != before
    }

    /// Move a component to a new phase, returning the previous phase.
    pub fn transition(
        &mut self,
        namespace: &str,
        kind: ComponentKind,
        id: u32,
        to: DeploymentPhase,
    ) -> DeployResult<DeploymentPhase> {
        let metadata = self
            .find_mut(kind, id)
            .ok_or_else(|| DeployError::ComponentNotFound {
                kind,
                id: id.to_string(),
                namespace: namespace.to_string(),
            })?;
        let from = metadata.phase;
        if !from.can_transition_to(to) {
            return Err(DeployError::InvalidPhaseTransition { kind, id, from, to });
        }
        metadata.phase = to;
        Ok(from)
    }

    /// Every component as `(kind, metadata)`, kinds in document order.
    pub fn all(&self) -> Vec<(ComponentKind, &ComponentMetadata)> {
        ComponentKind::ALL
            .iter()
            .flat_map(|kind| self.metadata_of(*kind).into_iter().map(move |m| (*kind, m)))
            .collect()
    }
}

// ============================================================================
// History
// ============================================================================

/// Bounded audit trail of commands applied to the deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHistory {
    #[serde(default)]
    pub commands: VecDeque<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_command: Option<String>,
}

impl DeploymentHistory {
    /// Append a command, evicting the oldest entries past `bound`.
    pub fn push(&mut self, command: impl Into<String>, bound: usize) {
        let command = command.into();
        self.last_executed_command = Some(command.clone());
        self.commands.push_back(command);
        while self.commands.len() > bound {
            self.commands.pop_front();
        }
    }
}

// ============================================================================
// Document
// ============================================================================

/// Remote configuration document at the current schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    pub metadata: DeploymentMetadata,
    #[serde(default)]
    pub versions: BTreeMap<ComponentKind, semver::Version>,
    #[serde(default)]
    pub components: ComponentsState,
    #[serde(default)]
    pub history: DeploymentHistory,
}

impl RemoteConfigDocument {
    /// Create an empty document at the current schema version.
    pub fn new(
        namespace: impl Into<String>,
        deployment_name: impl Into<String>,
        updated_by: UpdatedBy,
        now: DateTime<Utc>,
        tool_version: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            clusters: Vec::new(),
            metadata: DeploymentMetadata {
                namespace: namespace.into(),
                deployment_name: deployment_name.into(),
                ledger_phase: LedgerPhase::Uninitialized,
                last_updated_at: now,
                last_updated_by: updated_by,
                owner_email: None,
                tool_version: tool_version.into(),
            },
            versions: BTreeMap::new(),
            components: ComponentsState::default(),
            history: DeploymentHistory::default(),
        }
    }

    /// Namespace the document describes.
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Register a cluster; names must be unique.
    pub fn add_cluster(&mut self, cluster: ClusterRef) -> DeployResult<()> {
        if self.cluster(&cluster.name).is_some() {
            return Err(DeployError::Cluster {
                name: cluster.name,
                reason: "already registered".to_string(),
            });
        }
        self.clusters.push(cluster);
        Ok(())
    }

    /// Look up a cluster by name.
    pub fn cluster(&self, name: &str) -> Option<&ClusterRef> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Look up a cluster, failing if it is not registered.
    pub fn require_cluster(&self, name: &str) -> DeployResult<&ClusterRef> {
        self.cluster(name).ok_or_else(|| DeployError::Cluster {
            name: name.to_string(),
            reason: format!("not registered in namespace '{}'", self.namespace()),
        })
    }

    /// Stamp the last-updated fields.
    pub fn stamp(&mut self, updated_by: UpdatedBy, now: DateTime<Utc>) {
        self.metadata.last_updated_by = updated_by;
        self.metadata.last_updated_at = now;
    }

    /// Record the installed version for a component kind.
    pub fn set_version(&mut self, kind: ComponentKind, version: semver::Version) {
        self.versions.insert(kind, version);
    }
}
