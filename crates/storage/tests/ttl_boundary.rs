//! TTL boundary condition tests for `MemoryBackend` and `KvStore`.
//!
//! Time is driven by a `ManualClock`, so every boundary is exact: a record
//! written with a TTL of `T` seconds is live through second `T` and gone at
//! `T + 1`.

#![allow(clippy::expect_used, clippy::panic)]

use kvstash_storage::{
    Patch, RowOptions, StoreBackend, StoredEntry, hash,
    testutil::{TEST_EPOCH, manual_store},
};

// ============================================================================
// Expiry boundary
// ============================================================================

#[tokio::test]
async fn test_record_is_live_through_its_last_second() {
    let (store, backend, clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(10)).await.expect("put");

    clock.set(TEST_EPOCH + 9);
    assert_eq!(backend.get("k").await.expect("get").ttl, Some(1));

    clock.set(TEST_EPOCH + 10);
    let entry = backend.get("k").await.expect("get");
    assert_eq!(entry.ttl, Some(0), "record should still be live with zero seconds left");
    assert_eq!(entry.value, hash!({"v": 1}));
    assert!(store.exists("k").await.expect("exists"));

    clock.set(TEST_EPOCH + 11);
    assert_eq!(backend.get("k").await.expect("get"), StoredEntry::empty());
    assert!(!store.exists("k").await.expect("exists"));
}

#[tokio::test]
async fn test_zero_ttl_lives_for_the_current_second() {
    let (store, _backend, clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(0)).await.expect("put");

    assert!(store.exists("k").await.expect("exists"));
    clock.advance(1);
    assert!(!store.exists("k").await.expect("exists"));
}

#[tokio::test]
async fn test_missing_and_expired_read_identically() {
    let (store, backend, clock) = manual_store();
    store.put_with("lapsed", hash!({"v": 1}), RowOptions::ttl(5)).await.expect("put");
    clock.advance(6);

    assert_eq!(backend.get("lapsed").await.expect("get"), backend.get("never").await.expect("get"));
    assert!(store.get("lapsed").await.expect("get").is_empty());
    // The raw record is still held until it is overwritten or deleted.
    assert!(backend.record("lapsed").is_some());
}

// ============================================================================
// Writes over expired records
// ============================================================================

#[tokio::test]
async fn test_put_over_expired_record_ignores_expected_version() {
    let (_store, backend, clock) = manual_store();
    backend.put("k", hash!({"v": 1}), Some(5), None).await.expect("put");
    backend.put("k", hash!({"v": 2}), Some(5), None).await.expect("put");
    assert_eq!(backend.get("k").await.expect("get").version, 1);

    clock.advance(6);
    let previous =
        backend.put("k", hash!({"v": 3}), None, Some(42)).await.expect("put over expired");

    assert!(previous.is_empty(), "expired value must not be returned as previous");
    let entry = backend.get("k").await.expect("get");
    assert_eq!(entry.version, 42);
    assert_eq!(entry.ttl, None);
}

#[tokio::test]
async fn test_delete_of_expired_record_returns_empty() {
    let (store, backend, clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(5)).await.expect("put");
    clock.advance(6);

    assert!(store.delete("k").await.expect("delete").is_empty());
    assert!(backend.record("k").is_none());
}

// ============================================================================
// TTL through updates
// ============================================================================

#[tokio::test]
async fn test_put_without_ttl_clears_expiry() {
    let (store, backend, _clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(60)).await.expect("put");
    store.put("k", hash!({"v": 2})).await.expect("put");

    assert_eq!(backend.get("k").await.expect("get").ttl, None);
}

#[tokio::test]
async fn test_patch_keeps_remaining_ttl() {
    let (store, backend, clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(60)).await.expect("put");
    clock.advance(20);

    store.patch("k", Patch::merge(hash!({"w": 2}))).await.expect("patch");

    let entry = backend.get("k").await.expect("get");
    assert_eq!(entry.ttl, Some(40));
    assert_eq!(entry.value, hash!({"v": 1, "w": 2}));
}

#[tokio::test]
async fn test_patch_with_replaces_ttl() {
    let (store, backend, _clock) = manual_store();
    store.put_with("k", hash!({"v": 1}), RowOptions::ttl(60)).await.expect("put");

    store.patch_with("k", Patch::merge(hash!({"w": 2})), RowOptions::ttl(5)).await.expect("patch");

    assert_eq!(backend.get("k").await.expect("get").ttl, Some(5));
}

#[tokio::test]
async fn test_collection_operators_keep_remaining_ttl() {
    let (store, backend, clock) = manual_store();
    store.put_with("k", hash!({"n": 1}), RowOptions::ttl(30)).await.expect("put");
    clock.advance(10);

    store.increment("k", "n", 1.0).await.expect("increment");
    store.append("k", "log", serde_json::json!("x")).await.expect("append");

    let entry = backend.get("k").await.expect("get");
    assert_eq!(entry.ttl, Some(20));
    assert_eq!(entry.value, hash!({"n": 2, "log": ["x"]}));
}

#[tokio::test]
async fn test_collection_operator_on_expired_record_starts_fresh() {
    let (store, backend, clock) = manual_store();
    store.put_with("k", hash!({"n": 10}), RowOptions::ttl(5)).await.expect("put");
    clock.advance(6);

    assert_eq!(store.increment("k", "n", 1.0).await.expect("increment"), 1.0);
    let entry = backend.get("k").await.expect("get");
    assert_eq!(entry.version, 0);
    assert_eq!(entry.ttl, None);
}
