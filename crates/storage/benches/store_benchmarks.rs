#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kvstash_storage::{KvHash, KvStore, MultiValue, Patch, RowOptions};
use serde_json::json;
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime")
}

/// A record with `fields` numeric fields named `f0000..`.
fn make_record(fields: usize) -> KvHash {
    (0..fields).map(|i| (format!("f{i:04}"), json!(i))).collect()
}

fn populated_store(rt: &Runtime, key: &str, fields: usize) -> KvStore {
    let store = KvStore::local();
    rt.block_on(async {
        store.put(key, make_record(fields)).await.expect("populate put failed");
    });
    store
}

// ---------------------------------------------------------------------------
// 1. record operations
// ---------------------------------------------------------------------------

fn record_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_operations");
    let rt = rt();

    for &fields in &[4, 64, 1024] {
        let store = populated_store(&rt, "rec", fields);
        group.throughput(Throughput::Elements(fields as u64));

        group.bench_with_input(BenchmarkId::new("get", fields), &fields, |b, _| {
            b.to_async(&rt).iter(|| async { store.get("rec").await.expect("get failed") });
        });

        let record = make_record(fields);
        group.bench_with_input(BenchmarkId::new("put", fields), &fields, |b, _| {
            b.to_async(&rt).iter(|| async {
                store.put_with("rec", record.clone(), RowOptions::ttl(60)).await.expect("put failed")
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. patch engine
// ---------------------------------------------------------------------------

fn patch_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_operations");
    let rt = rt();

    for &fields in &[4, 64, 1024] {
        let store = populated_store(&rt, "patch", fields);

        group.bench_with_input(BenchmarkId::new("merge", fields), &fields, |b, _| {
            b.to_async(&rt).iter(|| async {
                let merge = json!({"f0000": 1}).as_object().cloned().unwrap_or_default();
                store.patch("patch", Patch::merge(merge)).await.expect("patch failed")
            });
        });

        group.bench_with_input(BenchmarkId::new("transform", fields), &fields, |b, _| {
            b.to_async(&rt).iter(|| async {
                let patch = Patch::transform(|mut value, _| {
                    let n = value.get("f0000").and_then(serde_json::Value::as_i64).unwrap_or(0);
                    value.insert("f0000".into(), json!(n + 1));
                    value
                });
                store.patch("patch", patch).await.expect("patch failed")
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. collection operators
// ---------------------------------------------------------------------------

fn collection_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_operations");
    let rt = rt();
    let store = KvStore::local();

    group.bench_function("increment", |b| {
        b.to_async(&rt).iter(|| async { store.increment("c", "n", 1.0).await.expect("increment failed") });
    });

    group.bench_function("append_shift", |b| {
        b.to_async(&rt).iter(|| async {
            store.append("q", "jobs", json!(1)).await.expect("append failed");
            store.shift("q", "jobs").await.expect("shift failed")
        });
    });

    for &members in &[16, 256] {
        let values: MultiValue<Vec<f64>> =
            [("set".to_owned(), (0..members).map(f64::from).collect())].into();
        rt.block_on(async {
            store.add_number_multi("s", values.clone()).await.expect("populate failed");
        });

        group.bench_with_input(BenchmarkId::new("has_number_multi", members), &members, |b, _| {
            b.to_async(&rt).iter(|| async {
                store.has_number_multi("s", values.clone()).await.expect("has failed")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, record_operations, patch_operations, collection_operations);
criterion_main!(benches);
