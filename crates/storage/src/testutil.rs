//! Shared test utilities for store testing.
//!
//! This module provides a contention injector, store constructors with a
//! controllable clock, and assertion macros for [`StoreResult`] values. It is
//! feature-gated behind `testutil` to keep it out of production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! kvstash-storage = { path = ".", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use kvstash_storage::testutil::{ContendedBackend, manual_store};
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    backend::{AtomicUpdater, StoreBackend},
    clock::ManualClock,
    error::{StoreError, StoreResult},
    memory::MemoryBackend,
    store::KvStore,
    types::{KvHash, StoredEntry},
};

/// Fixed start time for clock-driven tests (2020-03-27T01:36:40Z).
pub const TEST_EPOCH: u64 = 1_585_273_000;

/// Builds a [`KvHash`] from a JSON object literal.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use kvstash_storage::hash;
///
/// let value = hash!({"bar": 1, "tags": ["a", "b"]});
/// assert_eq!(value.len(), 2);
/// ```
#[macro_export]
macro_rules! hash {
    ($($json:tt)+) => {
        $crate::testutil::into_hash(::serde_json::json!($($json)+))
    };
}

/// Unwraps a JSON object into a [`KvHash`].
///
/// # Panics
///
/// Panics if `value` is not an object.
#[allow(clippy::panic)]
#[must_use]
pub fn into_hash(value: Value) -> KvHash {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got: {other}"),
    }
}

/// A [`KvStore`] over a fresh memory backend.
#[must_use]
pub fn local_store() -> KvStore {
    KvStore::local()
}

/// A [`KvStore`] whose backend reads time from a [`ManualClock`] starting at
/// [`TEST_EPOCH`].
///
/// The backend is returned as well for direct inspection of versions and TTLs.
#[must_use]
pub fn manual_store() -> (KvStore, MemoryBackend, ManualClock) {
    let clock = ManualClock::new(TEST_EPOCH);
    let backend = MemoryBackend::new().with_clock(clock.clone());
    (KvStore::new(Arc::new(backend.clone())), backend, clock)
}

type Interference = Arc<dyn Fn(&mut KvHash) + Send + Sync>;

/// Simulates competing writers for the patch engine.
///
/// For the first `conflicts` versioned puts, the wrapper lets a rival writer
/// update the record first (through the inner backend, so the write is real
/// and bumps the version) and then rejects the put with
/// [`StoreError::ConcurrencyConflict`], exactly as a store would after losing
/// the race. Unversioned puts and every other call go straight through.
///
/// By default the rival rewrites the record unchanged; use
/// [`with_interference`](Self::with_interference) to have it edit the value.
pub struct ContendedBackend {
    inner: MemoryBackend,
    remaining: AtomicU32,
    injected: AtomicU32,
    interference: Interference,
}

impl ContendedBackend {
    /// Wraps `inner`, losing the next `conflicts` versioned puts.
    #[must_use]
    pub fn new(inner: MemoryBackend, conflicts: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(conflicts),
            injected: AtomicU32::new(0),
            interference: Arc::new(|_| {}),
        }
    }

    /// Sets the edit the rival writer makes to the record.
    #[must_use]
    pub fn with_interference(mut self, edit: impl Fn(&mut KvHash) + Send + Sync + 'static) -> Self {
        self.interference = Arc::new(edit);
        self
    }

    /// The wrapped backend.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Number of conflicts injected so far.
    #[must_use]
    pub fn conflicts_injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StoreBackend for ContendedBackend {
    async fn get(&self, key: &str) -> StoreResult<StoredEntry> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        value: KvHash,
        ttl: Option<u64>,
        expected_version: Option<u64>,
    ) -> StoreResult<KvHash> {
        if expected_version.is_some() && self.take_conflict() {
            let edit = Arc::clone(&self.interference);
            self.inner
                .atomic_patch(
                    key,
                    Box::new(move |current, _| {
                        edit(current);
                        Ok(true)
                    }),
                )
                .await?;
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::conflict(key));
        }
        self.inner.put(key, value, ttl, expected_version).await
    }

    async fn atomic_patch(&self, key: &str, updater: AtomicUpdater) -> StoreResult<StoredEntry> {
        self.inner.atomic_patch(key, updater).await
    }

    async fn delete(&self, key: &str) -> StoreResult<KvHash> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    async fn reset(&self) -> StoreResult<()> {
        self.inner.reset().await
    }
}

/// Assert that a [`StoreResult`] is a [`StoreError::ConcurrencyConflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::StoreError::ConcurrencyConflict { .. })),
            "expected StoreError::ConcurrencyConflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::StoreError::ConcurrencyConflict { .. })),
            "{}: expected StoreError::ConcurrencyConflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is a [`StoreError::PatchRetriesExhausted`],
/// optionally after a given number of attempts.
#[macro_export]
macro_rules! assert_retries_exhausted {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::StoreError::PatchRetriesExhausted { .. })),
            "expected StoreError::PatchRetriesExhausted, got: {:?}",
            $result,
        );
    };
    ($result:expr, attempts = $attempts:expr) => {
        assert!(
            matches!(
                $result,
                Err($crate::StoreError::PatchRetriesExhausted { attempts, .. }) if attempts == $attempts
            ),
            "expected StoreError::PatchRetriesExhausted after {} attempts, got: {:?}",
            $attempts,
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is a [`StoreError::TypeMismatch`] on the
/// given field.
#[macro_export]
macro_rules! assert_type_mismatch {
    ($result:expr, $field:expr) => {
        assert!(
            matches!(
                $result,
                Err($crate::StoreError::TypeMismatch { ref field, .. }) if field == $field
            ),
            "expected StoreError::TypeMismatch on field {:?}, got: {:?}",
            $field,
            $result,
        );
    };
}

/// Assert that a [`StoreResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StoreError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StoreError: {e:?}", $msg),
        }
    };
}
