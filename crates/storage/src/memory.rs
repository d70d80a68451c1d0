//! In-memory backend implementation.
//!
//! This module provides [`MemoryBackend`], a local simulation of a remote
//! record store for development and testing.
//!
//! # Features
//!
//! - **Single-key atomicity**: every operation runs its body under one
//!   [`parking_lot::RwLock`] acquisition; the lock is never held across an await
//! - **Simulated latency**: each call first waits a randomized delay around the
//!   configured average, so independent calls interleave the way remote calls do
//! - **Lazy expiry**: expired records read as absent and are replaced on the
//!   next write; there is no background sweep
//! - **Change notification**: [`subscribe`](MemoryBackend::subscribe) exposes a
//!   generation counter bumped after every mutation
//!
//! # Example
//!
//! ```
//! use kvstash_storage::{MemoryBackend, StoreBackend};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!     let value = json!({"greeting": "hello"}).as_object().cloned().unwrap();
//!
//!     backend.put("k", value.clone(), Some(60), None).await.unwrap();
//!     let entry = backend.get("k").await.unwrap();
//!
//!     assert_eq!(entry.value, value);
//!     assert_eq!(entry.ttl, Some(60));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; use [`snapshot`](MemoryBackend::snapshot) together
//!   with [`subscribe`](MemoryBackend::subscribe) to write it out yourself
//! - Expiry has one-second resolution

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::watch;

use crate::{
    backend::{AtomicUpdater, StoreBackend},
    clock::{Clock, SystemClock},
    error::{StoreError, StoreResult},
    types::{KvHash, RowOptions, StoredEntry, VersionedRecord},
};

/// In-memory record store keyed by string.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same records, clock and change channel.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    records: Arc<RwLock<HashMap<String, VersionedRecord>>>,
    clock: Arc<dyn Clock>,
    avg_delay: Duration,
    changes: Arc<watch::Sender<u64>>,
}

impl MemoryBackend {
    /// Creates an empty backend with no simulated latency.
    #[must_use]
    pub fn new() -> Self {
        Self::with_records(HashMap::new())
    }

    /// Creates a backend seeded with previously captured records.
    ///
    /// Records are taken as-is, including expired ones, which read as absent.
    #[must_use]
    pub fn with_records(records: HashMap<String, VersionedRecord>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            records: Arc::new(RwLock::new(records)),
            clock: Arc::new(SystemClock),
            avg_delay: Duration::ZERO,
            changes: Arc::new(changes),
        }
    }

    /// Replaces the time source used for expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets the average delay simulated per call.
    ///
    /// Each call waits between half and one and a half times this value.
    #[must_use]
    pub fn with_latency(mut self, avg_delay: Duration) -> Self {
        self.avg_delay = avg_delay;
        self
    }

    /// Returns a deep copy of every stored record, expired ones included.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, VersionedRecord> {
        self.records.read().clone()
    }

    /// Subscribes to change notifications.
    ///
    /// The received value is a generation counter bumped after every call
    /// that modified the store. Rejected writes and no-op patches do not
    /// bump it.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Returns the raw record at `key`, ignoring expiry.
    #[must_use]
    pub fn record(&self, key: &str) -> Option<VersionedRecord> {
        self.records.read().get(key).cloned()
    }

    /// Waits out the simulated network delay.
    ///
    /// With no latency configured this still yields once, so concurrent
    /// calls interleave at the same points they would against a remote store.
    async fn simulate_latency(&self) {
        if self.avg_delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        tokio::time::sleep(self.avg_delay.mul_f64(factor)).await;
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<StoredEntry> {
        self.simulate_latency().await;
        let now = self.clock.now();
        let records = self.records.read();
        match records.get(key) {
            Some(record) if !record.is_expired(now) => Ok(record.entry(now)),
            Some(_) => {
                tracing::trace!("record expired");
                Ok(StoredEntry::empty())
            },
            None => Ok(StoredEntry::empty()),
        }
    }

    #[tracing::instrument(skip(self, value))]
    async fn put(
        &self,
        key: &str,
        value: KvHash,
        ttl: Option<u64>,
        expected_version: Option<u64>,
    ) -> StoreResult<KvHash> {
        self.simulate_latency().await;
        let now = self.clock.now();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl));
        let mut records = self.records.write();

        if let Some(record) = records.get_mut(key).filter(|record| !record.is_expired(now)) {
            if expected_version.is_some_and(|expected| expected != record.version) {
                tracing::debug!(
                    expected = expected_version,
                    actual = record.version,
                    "version mismatch"
                );
                return Err(StoreError::conflict(key));
            }
            record.version += 1;
            record.expires_at = expires_at;
            let previous = std::mem::replace(&mut record.value, value);
            drop(records);
            self.notify();
            return Ok(previous);
        }

        records.insert(
            key.to_owned(),
            VersionedRecord::new(value, expected_version.unwrap_or(0), expires_at),
        );
        drop(records);
        self.notify();
        Ok(KvHash::new())
    }

    #[tracing::instrument(skip(self, updater))]
    async fn atomic_patch(&self, key: &str, updater: AtomicUpdater) -> StoreResult<StoredEntry> {
        self.simulate_latency().await;
        let now = self.clock.now();
        let mut records = self.records.write();

        let (mut value, mut options, next_version) =
            match records.get(key).filter(|record| !record.is_expired(now)) {
                Some(record) => (
                    record.value.clone(),
                    RowOptions { ttl: record.ttl_remaining(now) },
                    record.version + 1,
                ),
                None => (KvHash::new(), RowOptions::default(), 0),
            };

        if !updater(&mut value, &mut options)? {
            let entry = records
                .get(key)
                .filter(|record| !record.is_expired(now))
                .map_or_else(StoredEntry::empty, |record| record.entry(now));
            return Ok(entry);
        }

        let expires_at = options.ttl.map(|ttl| now.saturating_add(ttl));
        let record = VersionedRecord::new(value, next_version, expires_at);
        let entry = record.entry(now);
        records.insert(key.to_owned(), record);
        drop(records);
        self.notify();
        Ok(entry)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<KvHash> {
        self.simulate_latency().await;
        let now = self.clock.now();
        let removed = self.records.write().remove(key);
        self.notify();
        Ok(removed
            .filter(|record| !record.is_expired(now))
            .map(|record| record.value)
            .unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.simulate_latency().await;
        let now = self.clock.now();
        Ok(self.records.read().get(key).is_some_and(|record| !record.is_expired(now)))
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn reset(&self) -> StoreResult<()> {
        self.records.write().clear();
        self.notify();
        Ok(())
    }
}
