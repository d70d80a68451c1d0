//! Backend store trait definition.
//!
//! [`StoreBackend`] is the seam between the store facade and whatever holds
//! the records. Every method is one atomic, single-key operation; nothing
//! above this layer may assume two calls happen without interleaving.
//!
//! # Implementing a Backend
//!
//! 1. Store one [`VersionedRecord`](crate::VersionedRecord) per key.
//! 2. Treat expired records as absent for reads and for versioned writes.
//! 3. Report a stale `expected_version` as
//!    [`StoreError::ConcurrencyConflict`](crate::StoreError::ConcurrencyConflict).
//! 4. Run [`atomic_patch`](StoreBackend::atomic_patch) updaters without letting any other
//!    write to the same key interleave.
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for the reference implementation.

use async_trait::async_trait;

use crate::{
    error::{StoreError, StoreResult},
    types::{KvHash, RowOptions, StoredEntry},
};

/// A single-step read-transform-write run inside the backend.
///
/// The updater edits the current value (an empty map for an absent record)
/// and may change the TTL through the [`RowOptions`] it is handed. It returns
/// `Ok(true)` if the record should be written back, or `Ok(false)` to leave
/// the record exactly as it was (no version bump, no record creation).
/// An error aborts the patch with no change.
pub type AtomicUpdater = Box<dyn FnOnce(&mut KvHash, &mut RowOptions) -> StoreResult<bool> + Send>;

/// Abstract single-key atomic record storage.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StoreBackend::get) | Read a record with its version and remaining TTL |
/// | [`put`](StoreBackend::put) | Overwrite a record, optionally checking its version |
/// | [`atomic_patch`](StoreBackend::atomic_patch) | Read-transform-write as one atomic unit |
/// | [`delete`](StoreBackend::delete) | Remove a record |
/// | [`exists`](StoreBackend::exists) | Check for a live record |
/// | [`reset`](StoreBackend::reset) | Drop every record (local backends only) |
///
/// # Example
///
/// ```
/// use kvstash_storage::{MemoryBackend, StoreBackend};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// let value = json!({"bar": 1}).as_object().cloned().unwrap();
///
/// backend.put("foo", value.clone(), None, None).await.unwrap();
/// let entry = backend.get("foo").await.unwrap();
/// assert_eq!(entry.version, 0);
/// assert_eq!(entry.value, value);
/// # });
/// ```
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Reads the record at `key`.
    ///
    /// Returns [`StoredEntry::empty`] (version 0, empty value) when the key is
    /// missing or expired. Never fails for absence.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StoreResult<StoredEntry>;

    /// Writes `value` to `key`, returning the previous live value.
    ///
    /// - Absent or expired record: a new record is created at version
    ///   `expected_version.unwrap_or(0)` without any conflict check, and an
    ///   empty map is returned.
    /// - Live record: written only if `expected_version` is `None` or equals
    ///   the stored version. The version is bumped by one and the expiry is
    ///   recomputed from `ttl` (`None` clears it).
    ///
    /// # Errors
    ///
    /// [`StoreError::ConcurrencyConflict`] if `expected_version` does not match
    /// a live record's version. Nothing is changed in that case.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn put(
        &self,
        key: &str,
        value: KvHash,
        ttl: Option<u64>,
        expected_version: Option<u64>,
    ) -> StoreResult<KvHash>;

    /// Runs `updater` against the record at `key` as one atomic unit and
    /// returns the resulting read view.
    ///
    /// The updater sees the live value with `ttl` set to the remaining
    /// seconds, or an empty map with `ttl: None` for an absent record. The
    /// expiry is recomputed from whatever TTL the updater leaves behind.
    ///
    /// # Errors
    ///
    /// Propagates the updater's error, leaving the record untouched.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn atomic_patch(&self, key: &str, updater: AtomicUpdater) -> StoreResult<StoredEntry>;

    /// Removes the record at `key` (live or expired) and returns its previous
    /// live value, or an empty map if there was none.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StoreResult<KvHash>;

    /// Returns `true` only if a live record exists at `key`.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns `true` for backends that simulate storage in-process.
    fn is_local(&self) -> bool {
        false
    }

    /// Drops every record.
    ///
    /// Only local backends support this; remote backends keep the default,
    /// which refuses.
    async fn reset(&self) -> StoreResult<()> {
        Err(StoreError::internal("reset is only supported by local backends"))
    }
}
