//! Remote configuration: the shared, versioned deployment document.
//!
//! - [`model`] - Document types at the current schema version
//! - [`migration`] - Schema migration chain
//! - [`store`] - Load, create, modify and save through the document store
//! - [`validator`] - Cross-check live components against the clusters

pub mod migration;
pub mod model;
pub mod store;
pub mod validator;

pub use model::{
    ClusterRef, ComponentKind, ComponentMetadata, DeploymentPhase, RemoteConfigDocument,
    CURRENT_SCHEMA_VERSION,
};
pub use store::{remote_config_document_name, LoadedDocument, RemoteConfigStore};
pub use validator::{RemoteConfigValidator, ValidationPolicy};
