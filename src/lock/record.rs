//! Lock record and holder identity.

use crate::core::error::{DeployError, DeployResult};
use crate::remote::model::UpdatedBy;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Document name holding the lock record for a namespace.
pub fn lock_document_name(namespace: &str) -> String {
    format!("lock/{}", namespace)
}

/// Identity of a lock holder.
///
/// The session id distinguishes two invocations by the same user on the
/// same host; only an identical identity counts as the same holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub username: String,
    pub hostname: String,
    pub process_id: u32,
    pub session_id: Uuid,
}

impl LockHolder {
    /// Identity of the current process with a fresh session.
    pub fn current() -> Self {
        Self::new(
            whoami::username(),
            whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into()),
            std::process::id(),
        )
    }

    /// Identity with the given user, host and process and a fresh session.
    pub fn new(username: impl Into<String>, hostname: impl Into<String>, process_id: u32) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
            process_id,
            session_id: Uuid::new_v4(),
        }
    }

    /// Check if `other` is this exact holder session.
    pub fn same_session(&self, other: &LockHolder) -> bool {
        self == other
    }

    /// Check if `other` ran as the same user on the same host.
    pub fn same_machine(&self, other: &LockHolder) -> bool {
        self.username == other.username && self.hostname == other.hostname
    }

    /// Identity stamped into documents written under this holder's lock.
    pub fn updated_by(&self) -> UpdatedBy {
        UpdatedBy {
            name: self.username.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (pid {}, session {})",
            self.username, self.hostname, self.process_id, self.session_id
        )
    }
}

/// Persisted lock state for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub namespace: String,
    pub holder: LockHolder,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub duration_seconds: u64,
    /// Bumped on every takeover so fenced writers can tell owners apart.
    pub generation: u64,
}

impl LockRecord {
    /// Fresh record acquired at `now`.
    pub fn new(
        namespace: impl Into<String>,
        holder: LockHolder,
        now: DateTime<Utc>,
        duration_seconds: u64,
        generation: u64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            holder,
            acquired_at: now,
            renewed_at: now,
            duration_seconds,
            generation,
        }
    }

    /// Instant after which the record is stale.
    ///
    /// `None` when the duration reaches past the representable calendar;
    /// such a record never goes stale.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.duration_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|duration| self.renewed_at.checked_add_signed(duration))
    }

    /// Check if the record went unrenewed for longer than its duration.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now > expires)
    }

    pub fn encode(&self) -> DeployResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> DeployResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DeployError::serialization(format!("corrupt lock record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_only_after_duration() {
        let now = Utc::now();
        let record = LockRecord::new("ns1", LockHolder::new("alice", "host", 1), now, 10, 1);
        assert!(!record.is_stale_at(now + chrono::Duration::seconds(10)));
        assert!(record.is_stale_at(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn oversized_duration_never_expires() {
        let now = Utc::now();
        let holder = LockHolder::new("alice", "host", 1);
        let record = LockRecord::new("ns1", holder.clone(), now, 10_000_000_000_000_000, 1);
        assert_eq!(record.expires_at(), None);
        assert!(!record.is_stale_at(now + chrono::Duration::days(365)));

        let record = LockRecord::new("ns1", holder, now, u64::MAX, 1);
        assert!(!record.is_stale_at(now));
    }

    #[test]
    fn sessions_are_distinct() {
        let a = LockHolder::new("alice", "host", 1);
        let b = LockHolder::new("alice", "host", 1);
        assert!(a.same_session(&a.clone()));
        assert!(!a.same_session(&b));
    }
}
