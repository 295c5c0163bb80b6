//! Schema migration chain for remote configuration documents.
//!
//! Each stored version has its own typed layout ([`v0`] through [`v4`]) and a
//! pure `upgrade` to the next version. Decoding reads `schemaVersion`,
//! parses the matching layout and steps it forward until it reaches
//! [`CURRENT_SCHEMA_VERSION`]. Transforms never touch the network, and a
//! document already at the current version passes through unchanged.

pub mod v0;
pub mod v1;
pub mod v2;
pub mod v3;
pub mod v4;

use crate::core::error::{DeployError, DeployResult};
use crate::remote::model::{RemoteConfigDocument, CURRENT_SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Inputs a migration step may consult. Steps are otherwise pure.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    /// Timestamp recorded by steps that stamp `lastUpdatedAt`.
    pub now: DateTime<Utc>,
    /// Tool version recorded when a legacy document carries none.
    pub tool_version: String,
}

impl MigrationContext {
    /// Context stamped with this build's version.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outcome of decoding and migrating a stored document.
#[derive(Debug, Clone)]
pub struct Migrated {
    /// Document at the current schema version.
    pub document: RemoteConfigDocument,
    /// Schema version the bytes were stored at.
    pub from_version: u32,
}

impl Migrated {
    /// Check if any migration step ran.
    pub fn was_migrated(&self) -> bool {
        self.from_version < CURRENT_SCHEMA_VERSION
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHeader {
    #[serde(default)]
    schema_version: u32,
}

/// A document at one of the known schema versions.
#[derive(Debug, Clone)]
pub enum Versioned {
    V0(v0::DocumentV0),
    V1(v1::DocumentV1),
    V2(v2::DocumentV2),
    V3(v3::DocumentV3),
    V4(v4::DocumentV4),
    Current(RemoteConfigDocument),
}

impl Versioned {
    /// Parse bytes into the layout matching their `schemaVersion`.
    pub fn decode(bytes: &[u8]) -> DeployResult<Self> {
        let header: VersionHeader = serde_yaml::from_slice(bytes)?;
        let versioned = match header.schema_version {
            0 => Versioned::V0(serde_yaml::from_slice(bytes)?),
            1 => Versioned::V1(serde_yaml::from_slice(bytes)?),
            2 => Versioned::V2(serde_yaml::from_slice(bytes)?),
            3 => Versioned::V3(serde_yaml::from_slice(bytes)?),
            4 => Versioned::V4(serde_yaml::from_slice(bytes)?),
            CURRENT_SCHEMA_VERSION => Versioned::Current(serde_yaml::from_slice(bytes)?),
            found => {
                return Err(DeployError::UnsupportedSchemaVersion {
                    found,
                    supported: CURRENT_SCHEMA_VERSION,
                })
            }
        };
        Ok(versioned)
    }

    /// Schema version of the held document.
    pub fn schema_version(&self) -> u32 {
        match self {
            Versioned::V0(_) => 0,
            Versioned::V1(_) => 1,
            Versioned::V2(_) => 2,
            Versioned::V3(_) => 3,
            Versioned::V4(_) => 4,
            Versioned::Current(_) => CURRENT_SCHEMA_VERSION,
        }
    }

    /// Apply one N -> N+1 step. Current documents are returned unchanged.
    pub fn step(self, ctx: &MigrationContext) -> Self {
        match self {
            Versioned::V0(doc) => Versioned::V1(doc.upgrade(ctx)),
            Versioned::V1(doc) => Versioned::V2(doc.upgrade(ctx)),
            Versioned::V2(doc) => Versioned::V3(doc.upgrade(ctx)),
            Versioned::V3(doc) => Versioned::V4(doc.upgrade(ctx)),
            Versioned::V4(doc) => Versioned::Current(doc.upgrade(ctx)),
            current @ Versioned::Current(_) => current,
        }
    }

    /// Step forward until the document is at the current version.
    pub fn into_current(self, ctx: &MigrationContext) -> RemoteConfigDocument {
        let mut versioned = self;
        loop {
            match versioned {
                Versioned::Current(doc) => return doc,
                other => {
                    let from = other.schema_version();
                    versioned = other.step(ctx);
                    tracing::debug!(from, to = versioned.schema_version(), "migrated remote config");
                }
            }
        }
    }
}

/// Decode stored bytes and migrate them to the current schema version.
pub fn migrate_document(bytes: &[u8], ctx: &MigrationContext) -> DeployResult<Migrated> {
    let versioned = Versioned::decode(bytes)?;
    let from_version = versioned.schema_version();
    let document = versioned.into_current(ctx);
    Ok(Migrated {
        document,
        from_version,
    })
}

/// Encode a current document for storage.
pub fn encode(document: &RemoteConfigDocument) -> DeployResult<Vec<u8>> {
    Ok(serde_yaml::to_string(document)?.into_bytes())
}
