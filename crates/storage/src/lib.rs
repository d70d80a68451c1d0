//! Versioned key-value record store with optimistic patching.
//!
//! This crate provides the [`StoreBackend`] trait, an in-memory
//! [`MemoryBackend`], and the [`KvStore`] facade that applications use to
//! read and write JSON-shaped records with TTLs, CAS-checked patches, and
//! atomic list, set and counter operators.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StoreRegistry                           │
//! │        settings │ secrets │ kv │ shared_kv                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │          KvStore                 │      SettingsStore       │
//! │  get/put/delete, collections     │  get/put/patch/delete    │
//! ├──────────────────────────────────┴──────────────────────────┤
//! │   patch engine (CAS retry)  │  collections (atomic_patch)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   StoreBackend trait                        │
//! │        (get, put, atomic_patch, delete, exists)             │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│       remote adapters (out of tree)          │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use kvstash_storage::{KvStore, Patch, RowOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = KvStore::local();
//!
//!     // Write a record that expires in an hour
//!     let record = json!({"visits": 1}).as_object().cloned().unwrap_or_default();
//!     store.put_with("user:123", record, RowOptions::ttl(3600)).await?;
//!
//!     // Merge a field in, retrying if another writer gets there first
//!     let merge = json!({"name": "Alice"}).as_object().cloned().unwrap_or_default();
//!     store.patch("user:123", Patch::merge(merge)).await?;
//!
//!     // Atomic collection operators
//!     store.increment("user:123", "visits", 1.0).await?;
//!     store.add_string("user:123", "tags", "beta").await?;
//!
//!     let user = store.get("user:123").await?;
//!     assert_eq!(user["visits"], 2);
//!     assert_eq!(user["tags"], json!(["beta"]));
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Every backend call is atomic for one key, but two calls may interleave.
//! [`KvStore::patch`] therefore reads, transforms and writes back with the
//! version it read, starting over on a
//! [`ConcurrencyConflict`](StoreError::ConcurrencyConflict) until its retry
//! budget runs out. Collection operators run inside a single
//! [`atomic_patch`](StoreBackend::atomic_patch) call and never conflict.
//!
//! # Expiry
//!
//! A record written with a TTL of `T` seconds is live through second `T`
//! and reads as absent afterwards. Missing and expired records are
//! indistinguishable to callers: both read back as an empty map.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (contention injector,
//!   clock-driven stores, assertion macros). Enable this in `[dev-dependencies]` for integration
//!   tests.
//! - **`failpoints`**: Compiles the `patch-before-put` fail point into the patch engine.

#![deny(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod collections;
pub mod config;
pub mod error;
pub mod memory;
pub mod patch;
pub mod registry;
pub mod settings;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{AtomicUpdater, StoreBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collections::FieldChanges;
pub use config::{PatchConfig, StoreConfig};
pub use error::{BoxError, ConfigError, StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use patch::{Patch, patch_with_retry};
pub use registry::StoreRegistry;
pub use settings::SettingsStore;
pub use store::KvStore;
pub use types::{
    KvHash, KvValue, MultiValue, NumberSet, RowOptions, StoredEntry, StringSet, VersionedRecord,
};
