#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p kvstash-storage --features failpoints --test failpoint_tests
//! ```

use kvstash_storage::{KvStore, Patch, StoreBackend, assert_retries_exhausted, hash};

#[tokio::test]
async fn patch_before_put_conflicts_are_retried() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("patch-before-put", "2*return->off").expect("failed to configure fail point");

    let store = KvStore::local();
    store.put("k", hash!({"v": 1})).await.expect("put");
    let previous = store.patch("k", Patch::merge(hash!({"w": 2}))).await.expect("patch");

    assert_eq!(previous, hash!({"v": 1}));
    assert_eq!(store.get("k").await.expect("get"), hash!({"v": 1, "w": 2}));

    scenario.teardown();
}

#[tokio::test]
async fn patch_before_put_always_failing_exhausts_retries() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("patch-before-put", "return").expect("failed to configure fail point");

    let store = KvStore::local();
    store.put("k", hash!({"v": 1})).await.expect("put");
    let result = store.patch("k", Patch::merge(hash!({"w": 2}))).await;

    assert_retries_exhausted!(result, attempts = 6);
    let entry = store.backend().get("k").await.expect("get");
    assert_eq!(entry.value, hash!({"v": 1}), "exhausted patch must not change the record");
    assert_eq!(entry.version, 0);

    scenario.teardown();
}

#[tokio::test]
async fn patch_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    // No fail point configured; the patch should go straight through

    let store = KvStore::local();
    store.patch("k", Patch::merge(hash!({"w": 2}))).await.expect("patch");
    assert_eq!(store.get("k").await.expect("get"), hash!({"w": 2}));

    scenario.teardown();
}
