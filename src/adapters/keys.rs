//! Node key material.

use crate::core::error::DeployResult;
use serde::{Deserialize, Serialize};

/// Key material generated for one consensus node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKeys {
    pub node_name: String,
    /// PEM-encoded signing public key.
    pub signing_public_key: String,
    /// PEM-encoded gossip CA certificate.
    pub gossip_ca_certificate: String,
    /// Hash of the gRPC TLS certificate.
    pub tls_certificate_hash: String,
}

/// Generates key material locally, without network access.
pub trait KeyMaterialProvider: Send + Sync {
    fn generate(&self, node_name: &str) -> DeployResult<NodeKeys>;
}
