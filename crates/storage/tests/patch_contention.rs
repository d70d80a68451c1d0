//! Patch engine behavior under competing writers.
//!
//! `ContendedBackend` lets a rival writer win the race before each of the
//! first N versioned puts, which is how these tests drive the CAS retry loop
//! deterministically.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use kvstash_storage::{
    AtomicUpdater, KvHash, KvStore, MemoryBackend, Patch, PatchConfig, StoreBackend, StoreConfig,
    StoreError, StoreResult, StoredEntry, assert_retries_exhausted, hash, patch_with_retry,
    testutil::ContendedBackend,
};
use serde_json::json;

fn increment(value: &mut KvHash, field: &str) {
    let current = value.get(field).and_then(serde_json::Value::as_i64).unwrap_or(0);
    value.insert(field.to_owned(), json!(current + 1));
}

fn counter_patch() -> Patch {
    Patch::transform(|mut value, _| {
        increment(&mut value, "count");
        value
    })
}

fn contended_store(conflicts: u32, max_retries: u32) -> (KvStore, Arc<ContendedBackend>) {
    let backend = Arc::new(
        ContendedBackend::new(MemoryBackend::new(), conflicts)
            .with_interference(|value| increment(value, "count")),
    );
    let config = StoreConfig::builder()
        .patch(PatchConfig::builder().max_retries(max_retries).build())
        .build()
        .expect("valid config");
    (KvStore::with_config(Arc::clone(&backend) as Arc<dyn StoreBackend>, config), backend)
}

// ============================================================================
// Versioning
// ============================================================================

#[tokio::test]
async fn test_version_counts_successful_writes() {
    let store = KvStore::local();
    store.put("k", hash!({"count": 0})).await.expect("put");
    for _ in 0..4 {
        store.patch("k", counter_patch()).await.expect("patch");
    }
    store.put("k", hash!({"count": 100})).await.expect("put");

    let entry = store.backend().get("k").await.expect("get");
    assert_eq!(entry.version, 5);
}

// ============================================================================
// Contention
// ============================================================================

#[tokio::test]
async fn test_rival_increment_is_not_lost() {
    let (store, backend) = contended_store(1, 5);
    store.put("k", hash!({"count": 0})).await.expect("put");

    let previous = store.patch("k", counter_patch()).await.expect("patch");

    assert_eq!(previous, hash!({"count": 1}), "retry should observe the rival's write");
    assert_eq!(store.get("k").await.expect("get"), hash!({"count": 2}));
    assert_eq!(backend.conflicts_injected(), 1);
}

#[tokio::test]
async fn test_retry_budget_is_exact() {
    let (store, backend) = contended_store(5, 5);
    store.put("k", hash!({"count": 0})).await.expect("put");

    store.patch("k", counter_patch()).await.expect("sixth attempt should succeed");

    assert_eq!(backend.conflicts_injected(), 5);
    assert_eq!(store.get("k").await.expect("get"), hash!({"count": 6}));
}

#[tokio::test]
async fn test_exhaustion_after_budget_leaves_no_trace_of_patch() {
    let (store, backend) = contended_store(6, 5);
    store.put("k", hash!({"count": 0})).await.expect("put");

    let result = store.patch("k", counter_patch()).await;

    assert_retries_exhausted!(result, attempts = 6);
    assert_eq!(backend.conflicts_injected(), 6);
    // Only the six rival increments landed.
    assert_eq!(store.get("k").await.expect("get"), hash!({"count": 6}));
}

#[tokio::test]
async fn test_exhaustion_message_names_key() {
    let (store, _backend) = contended_store(u32::MAX, 0);
    store.put("orders:7", hash!({"count": 0})).await.expect("put");

    let err = store.patch("orders:7", counter_patch()).await.expect_err("should exhaust");

    assert_eq!(
        err.to_string(),
        "Failed to update key orders:7: CAS retries exhausted after 1 attempts"
    );
}

#[tokio::test]
async fn test_updater_runs_once_per_attempt() {
    let (store, _backend) = contended_store(3, 5);
    store.put("k", hash!({"count": 0})).await.expect("put");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    store
        .patch(
            "k",
            Patch::transform(move |value, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                value
            }),
        )
        .await
        .expect("patch");

    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_updater_error_stops_retrying() {
    let (store, backend) = contended_store(1, 5);
    store.put("k", hash!({"count": 0})).await.expect("put");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result = store
        .patch(
            "k",
            Patch::try_transform(move |value, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(value)
                } else {
                    Err(StoreError::updater("second look rejected"))
                }
            }),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Updater { .. })), "got: {result:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.conflicts_injected(), 1);
}

#[tokio::test]
async fn test_collection_operators_bypass_cas() {
    let (store, backend) = contended_store(u32::MAX, 0);

    store.increment("k", "hits", 1.0).await.expect("increment");
    store.append("k", "log", json!("a")).await.expect("append");

    assert_eq!(backend.conflicts_injected(), 0);
    assert_eq!(store.get("k").await.expect("get"), hash!({"hits": 1, "log": ["a"]}));
}

// ============================================================================
// Real interleaving
// ============================================================================

#[tokio::test]
async fn test_two_concurrent_patches_both_apply() {
    let store = KvStore::local();
    store.put("k", hash!({"count": 10})).await.expect("put");

    let (a, b) = tokio::join!(store.patch("k", counter_patch()), store.patch("k", counter_patch()));
    a.expect("first patch");
    b.expect("second patch");

    assert_eq!(store.get("k").await.expect("get"), hash!({"count": 12}));
}

#[tokio::test]
async fn test_concurrent_patches_creating_a_key_both_apply() {
    let store = KvStore::local();

    let (a, b) = tokio::join!(store.patch("k", counter_patch()), store.patch("k", counter_patch()));
    let mut previous = [a.expect("first patch"), b.expect("second patch")];
    previous.sort_by_key(KvHash::len);

    assert_eq!(previous, [KvHash::new(), hash!({"count": 1})], "one patch must see the other");
    let entry = store.backend().get("k").await.expect("get");
    assert_eq!(entry.value, hash!({"count": 2}));
    assert_eq!(entry.version, 1);
}

/// Creates the record through the inner backend just before the first
/// `atomic_patch`, as a rival writer would after the patch read an empty key.
struct RacingCreate {
    inner: MemoryBackend,
    raced: AtomicBool,
}

#[async_trait]
impl StoreBackend for RacingCreate {
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
        self.inner.put(key, value, ttl, expected_version).await
    }

    async fn atomic_patch(&self, key: &str, updater: AtomicUpdater) -> StoreResult<StoredEntry> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner.put(key, hash!({"count": 10}), None, None).await?;
        }
        self.inner.atomic_patch(key, updater).await
    }

    async fn delete(&self, key: &str) -> StoreResult<KvHash> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }
}

#[tokio::test]
async fn test_patch_on_missing_key_retries_when_rival_creates_it() {
    let backend = RacingCreate { inner: MemoryBackend::new(), raced: AtomicBool::new(false) };

    let previous =
        patch_with_retry(&backend, "k", &mut counter_patch(), None, &PatchConfig::default())
            .await
            .expect("patch");

    assert_eq!(previous, hash!({"count": 10}), "retry should observe the rival's record");
    let entry = backend.inner.get("k").await.expect("get");
    assert_eq!(entry.value, hash!({"count": 11}));
    assert_eq!(entry.version, 1);
}
