//! Namespace lock manager.
//!
//! A namespace is locked by writing a [`LockRecord`] to the document store
//! under `lock/<namespace>`. Acquisition creates the record if absent,
//! renews it if this session already owns it, and takes over a stale record,
//! or one left by an exited process of the same user on this host, with a
//! compare-and-swap on the store version. Anything else fails fast with the
//! current holder; callers decide whether to retry.
//!
//! While a [`LockGuard`] is alive a background task renews the record every
//! half duration. Any renewal failure marks the guard invalid and stops the
//! task, and every mutating call checks [`LockGuard::ensure_valid`] first.

use super::process::{LocalProcesses, ProcessLiveness};
use super::record::{lock_document_name, LockHolder, LockRecord};
use crate::core::error::{DeployError, DeployResult};
use crate::core::time::Clock;
use crate::lifecycle::retry::RetryPolicy;
use crate::store::{DocumentStore, StoreError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lock timing settings.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    /// Seconds a record stays valid without renewal.
    pub duration_seconds: u64,
    /// Renew in the background while the guard is held.
    pub auto_renew: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            duration_seconds: 20,
            auto_renew: true,
        }
    }
}

impl LockSettings {
    /// Interval between background renewals.
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.duration_seconds.saturating_mul(1000) / 2).max(Duration::from_secs(1))
    }
}

/// Why a guard stopped being valid.
#[derive(Debug, Clone)]
enum LockFailure {
    Expired,
    Lost { holder: String },
    Released,
}

/// State shared between a guard and its renewal task.
struct LockState {
    namespace: String,
    document: String,
    holder: LockHolder,
    clock: Arc<dyn Clock>,
    /// Last record written by this session and its store version.
    current: Mutex<(LockRecord, u64)>,
    valid: AtomicBool,
    failure: Mutex<Option<LockFailure>>,
    released: AtomicBool,
    cancel: CancellationToken,
}

impl LockState {
    fn snapshot(&self) -> (LockRecord, u64) {
        self.current.lock().clone()
    }

    fn invalidate(&self, failure: LockFailure) {
        self.valid.store(false, Ordering::Release);
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    fn failure_error(&self) -> DeployError {
        match self.failure.lock().clone() {
            Some(LockFailure::Lost { holder }) => DeployError::lock_lost(&self.namespace, holder),
            Some(LockFailure::Released) => DeployError::lock_lost(&self.namespace, "released"),
            Some(LockFailure::Expired) | None => DeployError::LockExpired {
                namespace: self.namespace.clone(),
            },
        }
    }

    fn ensure_valid(&self) -> DeployResult<()> {
        if !self.valid.load(Ordering::Acquire) {
            return Err(self.failure_error());
        }
        let (record, _) = self.snapshot();
        if record.is_stale_at(self.clock.now()) {
            self.invalidate(LockFailure::Expired);
            return Err(self.failure_error());
        }
        Ok(())
    }
}

/// Proof of holding a namespace lock.
///
/// Dropping the guard stops background renewal; the record itself is left
/// to expire unless [`LockManager::release`] is called.
pub struct LockGuard {
    state: Arc<LockState>,
    renewal: Option<JoinHandle<()>>,
}

impl LockGuard {
    /// Namespace this guard locks.
    pub fn namespace(&self) -> &str {
        &self.state.namespace
    }

    /// Holder identity that owns the lock.
    pub fn holder(&self) -> &LockHolder {
        &self.state.holder
    }

    /// Last record written by this session.
    pub fn record(&self) -> LockRecord {
        self.state.snapshot().0
    }

    /// Check whether the lock is still trusted.
    pub fn is_valid(&self) -> bool {
        self.state.ensure_valid().is_ok()
    }

    /// Fail if the lock expired, was lost or was released.
    pub fn ensure_valid(&self) -> DeployResult<()> {
        self.state.ensure_valid()
    }

    /// Check whether background renewal is running.
    pub fn is_renewing(&self) -> bool {
        self.renewal.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("namespace", &self.state.namespace)
            .field("holder", &self.state.holder)
            .field("valid", &self.state.valid.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.state.cancel.cancel();
        if let Some(handle) = self.renewal.take() {
            handle.abort();
        }
    }
}

/// Acquires, renews and releases namespace locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    holder: LockHolder,
    settings: LockSettings,
    processes: Arc<dyn ProcessLiveness>,
}

impl LockManager {
    /// Create a lock manager acting as `holder`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        holder: LockHolder,
        settings: LockSettings,
    ) -> Self {
        Self {
            store,
            clock,
            holder,
            settings,
            processes: Arc::new(LocalProcesses),
        }
    }

    /// Use `processes` to decide whether a same-host holder has exited.
    pub fn with_process_liveness(mut self, processes: Arc<dyn ProcessLiveness>) -> Self {
        self.processes = processes;
        self
    }

    /// Identity this manager acquires locks as.
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Timing this manager acquires and renews with.
    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    async fn read_record(&self, document: &str) -> DeployResult<Option<(LockRecord, u64)>> {
        match self.store.get(document).await? {
            Some(stored) => Ok(Some((LockRecord::decode(&stored.bytes)?, stored.version))),
            None => Ok(None),
        }
    }

    /// Check if `record` belongs to a process of this user on this host
    /// that is no longer running.
    fn held_by_exited_process(&self, record: &LockRecord) -> bool {
        record.holder.same_machine(&self.holder)
            && record.holder.process_id != self.holder.process_id
            && !self.processes.is_alive(record.holder.process_id)
    }

    /// Holder named in a `LockHeld` error after losing a race.
    async fn current_holder(&self, document: &str) -> String {
        match self.read_record(document).await {
            Ok(Some((record, _))) => record.holder.to_string(),
            Ok(None) => "unknown".to_string(),
            Err(e) => format!("unknown ({})", e),
        }
    }

    /// Acquire the lock on `namespace`.
    ///
    /// Fails with `LockHeld` naming the holder if another session owns a
    /// live record or wins a takeover race.
    pub async fn acquire(&self, namespace: &str) -> DeployResult<LockGuard> {
        let document = lock_document_name(namespace);
        let now = self.clock.now();

        let (record, version) = match self.read_record(&document).await? {
            None => {
                let record = LockRecord::new(
                    namespace,
                    self.holder.clone(),
                    now,
                    self.settings.duration_seconds,
                    1,
                );
                match self.store.create(&document, record.encode()?).await {
                    Ok(version) => (record, version),
                    Err(StoreError::AlreadyExists { .. }) => {
                        let holder = self.current_holder(&document).await;
                        return Err(DeployError::lock_held(namespace, holder));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some((existing, version)) => {
                let record = if existing.holder.same_session(&self.holder) {
                    tracing::debug!(namespace, "re-acquiring own lock");
                    LockRecord {
                        renewed_at: now,
                        duration_seconds: self.settings.duration_seconds,
                        ..existing.clone()
                    }
                } else if existing.is_stale_at(now) || self.held_by_exited_process(&existing) {
                    tracing::info!(
                        namespace,
                        previous_holder = %existing.holder,
                        renewed_at = %existing.renewed_at,
                        stale = existing.is_stale_at(now),
                        "taking over abandoned lock"
                    );
                    LockRecord::new(
                        namespace,
                        self.holder.clone(),
                        now,
                        self.settings.duration_seconds,
                        existing.generation + 1,
                    )
                } else {
                    return Err(DeployError::lock_held(namespace, &existing.holder));
                };

                match self
                    .store
                    .replace(&document, record.encode()?, Some(version))
                    .await
                {
                    Ok(new_version) => (record, new_version),
                    Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound { .. }) => {
                        let holder = self.current_holder(&document).await;
                        return Err(DeployError::lock_held(namespace, holder));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tracing::info!(
            namespace,
            holder = %self.holder,
            generation = record.generation,
            duration_seconds = record.duration_seconds,
            "acquired namespace lock"
        );

        let state = Arc::new(LockState {
            namespace: namespace.to_string(),
            document,
            holder: self.holder.clone(),
            clock: Arc::clone(&self.clock),
            current: Mutex::new((record, version)),
            valid: AtomicBool::new(true),
            failure: Mutex::new(None),
            released: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let renewal = if self.settings.auto_renew {
            Some(spawn_renewal(
                Arc::clone(&self.store),
                Arc::clone(&state),
                self.settings.renewal_interval(),
            ))
        } else {
            None
        };

        Ok(LockGuard { state, renewal })
    }

    /// Acquire, retrying only while the lock is held by someone else.
    ///
    /// Returns the last `LockHeld` error once attempts run out.
    pub async fn acquire_with_retry(
        &self,
        namespace: &str,
        policy: &RetryPolicy,
    ) -> DeployResult<LockGuard> {
        let mut attempt = 1;
        loop {
            match self.acquire(namespace).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_retriable() && attempt < policy.attempts => {
                    tracing::debug!(namespace, attempt, error = %e, "lock busy, retrying");
                    attempt += 1;
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Renew the guard's record now.
    ///
    /// Fails with `LockExpired` if the local deadline already passed, or
    /// `LockLost` if the record is gone or owned by someone else. Either
    /// failure invalidates the guard.
    pub async fn renew(&self, guard: &LockGuard) -> DeployResult<()> {
        guard.ensure_valid()?;
        renew_state(self.store.as_ref(), &guard.state).await
    }

    /// Release the lock.
    ///
    /// Stops renewal first, then deletes the record only if this session
    /// still owns it or it has gone stale. Releasing twice is a no-op.
    pub async fn release(&self, guard: &LockGuard) -> DeployResult<()> {
        let state = &guard.state;
        if state.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        state.cancel.cancel();
        state.invalidate(LockFailure::Released);

        let Some((record, version)) = self.read_record(&state.document).await? else {
            tracing::debug!(namespace = %state.namespace, "lock record already gone");
            return Ok(());
        };

        let ours = record.holder.same_session(&state.holder);
        if !ours && !record.is_stale_at(self.clock.now()) {
            tracing::warn!(
                namespace = %state.namespace,
                holder = %record.holder,
                "lock now owned by another holder, leaving it in place"
            );
            return Ok(());
        }

        match self.store.delete(&state.document, Some(version)).await {
            Ok(()) => {
                tracing::info!(namespace = %state.namespace, "released namespace lock");
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::warn!(
                    namespace = %state.namespace,
                    "lock record changed during release, leaving it in place"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a live, non-stale lock exists on `namespace`.
    pub async fn is_held(&self, namespace: &str) -> DeployResult<bool> {
        let document = lock_document_name(namespace);
        Ok(self
            .read_record(&document)
            .await?
            .is_some_and(|(record, _)| !record.is_stale_at(self.clock.now())))
    }

    /// Current lock record for `namespace`, if any.
    pub async fn status(&self, namespace: &str) -> DeployResult<Option<LockRecord>> {
        let document = lock_document_name(namespace);
        Ok(self.read_record(&document).await?.map(|(record, _)| record))
    }

    /// Remove a lock record without holding a guard.
    ///
    /// Only stale records, records owned by this session and records left
    /// by an exited process of this user on this host are removed; a live
    /// lock held by someone else fails with `LockHeld`. Returns
    /// whether a record was deleted.
    pub async fn clear(&self, namespace: &str) -> DeployResult<bool> {
        let document = lock_document_name(namespace);
        let Some((record, version)) = self.read_record(&document).await? else {
            return Ok(false);
        };
        let removable = record.holder.same_session(&self.holder)
            || record.is_stale_at(self.clock.now())
            || self.held_by_exited_process(&record);
        if !removable {
            return Err(DeployError::lock_held(namespace, &record.holder));
        }
        match self.store.delete(&document, Some(version)).await {
            Ok(()) => {
                tracing::info!(namespace, previous_holder = %record.holder, "cleared lock record");
                Ok(true)
            }
            Err(StoreError::Conflict { .. }) => {
                let holder = self.current_holder(&document).await;
                Err(DeployError::lock_held(namespace, holder))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write a renewed record for the guard's session.
async fn renew_state(store: &dyn DocumentStore, state: &LockState) -> DeployResult<()> {
    let now = state.clock.now();
    let (record, _) = state.snapshot();

    if record.is_stale_at(now) {
        state.invalidate(LockFailure::Expired);
        return Err(state.failure_error());
    }

    let stored = match store.get(&state.document).await? {
        Some(stored) => stored,
        None => {
            state.invalidate(LockFailure::Lost {
                holder: "none".to_string(),
            });
            return Err(state.failure_error());
        }
    };
    let existing = LockRecord::decode(&stored.bytes)?;
    if !existing.holder.same_session(&state.holder) {
        state.invalidate(LockFailure::Lost {
            holder: existing.holder.to_string(),
        });
        return Err(state.failure_error());
    }

    let renewed = LockRecord {
        renewed_at: now,
        ..existing
    };
    match store
        .replace(&state.document, renewed.encode()?, Some(stored.version))
        .await
    {
        Ok(version) => {
            *state.current.lock() = (renewed, version);
            tracing::debug!(namespace = %state.namespace, "renewed namespace lock");
            Ok(())
        }
        Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound { .. }) => {
            state.invalidate(LockFailure::Lost {
                holder: "unknown".to_string(),
            });
            Err(state.failure_error())
        }
        Err(e) => Err(e.into()),
    }
}

fn spawn_renewal(
    store: Arc<dyn DocumentStore>,
    state: Arc<LockState>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => {
                    tracing::debug!(namespace = %state.namespace, "lock renewal stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = renew_state(store.as_ref(), &state).await {
                        // Store errors leave no failure recorded yet.
                        state.invalidate(LockFailure::Expired);
                        tracing::warn!(
                            namespace = %state.namespace,
                            error = %e,
                            "lock renewal failed, lock is no longer valid"
                        );
                        break;
                    }
                }
            }
        }
    })
}
