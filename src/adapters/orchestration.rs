//! Container orchestration client interface.

use super::keys::NodeKeys;
use crate::core::error::DeployResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A pod matched by a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub ready: bool,
}

/// Workload description for one consensus node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_id: u32,
    pub node_name: String,
    pub cluster: String,
    pub namespace: String,
    pub gossip_endpoint: String,
    pub grpc_endpoint: String,
    /// Key material to install; `None` keeps the keys already on the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<NodeKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<semver::Version>,
}

/// Operations against the clusters hosting a deployment.
///
/// Every call names the cluster and namespace explicitly; implementations
/// must not fall back to an ambient context.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Pods in `namespace` matching `selector`.
    async fn list_pods(
        &self,
        cluster: &str,
        namespace: &str,
        selector: &str,
    ) -> DeployResult<Vec<PodInfo>>;

    /// Create or update the node's workload.
    async fn apply_node(&self, cluster: &str, namespace: &str, spec: &NodeSpec) -> DeployResult<()>;

    /// Push keys and configuration onto the node's pod.
    async fn configure_node(
        &self,
        cluster: &str,
        namespace: &str,
        spec: &NodeSpec,
    ) -> DeployResult<()>;

    /// Start the node process.
    async fn start_node(&self, cluster: &str, namespace: &str, node_name: &str)
        -> DeployResult<()>;

    /// Remove the node's workload.
    async fn remove_node(
        &self,
        cluster: &str,
        namespace: &str,
        node_name: &str,
    ) -> DeployResult<()>;

    /// Check whether every pod matching `selector` is ready.
    async fn pod_ready(&self, cluster: &str, namespace: &str, selector: &str)
        -> DeployResult<bool>;

    /// Check whether the node reports itself active.
    async fn node_active(&self, cluster: &str, namespace: &str, node_name: &str)
        -> DeployResult<bool>;

    /// Check whether the node reports itself frozen.
    async fn node_frozen(&self, cluster: &str, namespace: &str, node_name: &str)
        -> DeployResult<bool>;
}
