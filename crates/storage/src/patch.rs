//! Optimistic read-modify-write with CAS retry.
//!
//! [`patch_with_retry`] reads a record, runs a [`Patch`] against a copy of
//! it and writes the result back with the version it read. If another writer
//! got in between, the backend rejects the write with
//! [`ConcurrencyConflict`](StoreError::ConcurrencyConflict) and the whole
//! sequence starts over, up to the configured retry budget.
//!
//! Because the updater may run more than once per call it must not have side
//! effects beyond computing the new value.

use std::time::Duration;

use fail::fail_point;
use rand::Rng;

use crate::{
    backend::StoreBackend,
    config::PatchConfig,
    error::{StoreError, StoreResult},
    types::{KvHash, RowOptions, StoredEntry},
};

/// Boxed transform run by [`Patch::Transform`].
pub type TransformFn = Box<dyn FnMut(KvHash, &mut RowOptions) -> StoreResult<KvHash> + Send>;

/// The change a patch applies to a record.
///
/// # Examples
///
/// ```
/// use kvstash_storage::Patch;
/// use serde_json::json;
///
/// // Shallow merge: listed fields are overwritten, others are kept.
/// let merge = Patch::merge(json!({"status": "done"}).as_object().cloned().unwrap());
///
/// // Arbitrary transform of the previous value.
/// let bump = Patch::transform(|mut previous, _options| {
///     let n = previous.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
///     previous.insert("n".into(), json!(n + 1));
///     previous
/// });
/// # let _ = (merge, bump);
/// ```
pub enum Patch {
    /// Overwrite the listed fields, leaving every other field as it was.
    Merge(KvHash),
    /// Compute the new value from the previous one. The transform may also
    /// change the row's TTL through the [`RowOptions`] it receives.
    Transform(TransformFn),
}

impl Patch {
    /// A shallow field-wise merge.
    #[must_use]
    pub fn merge(fields: KvHash) -> Self {
        Self::Merge(fields)
    }

    /// An infallible transform.
    pub fn transform<F>(mut transform: F) -> Self
    where
        F: FnMut(KvHash, &mut RowOptions) -> KvHash + Send + 'static,
    {
        Self::Transform(Box::new(move |previous, options| Ok(transform(previous, options))))
    }

    /// A transform that may fail. Its error is returned to the caller as-is
    /// and is never retried.
    pub fn try_transform<F>(transform: F) -> Self
    where
        F: FnMut(KvHash, &mut RowOptions) -> StoreResult<KvHash> + Send + 'static,
    {
        Self::Transform(Box::new(transform))
    }

    fn apply(&mut self, mut previous: KvHash, options: &mut RowOptions) -> StoreResult<KvHash> {
        match self {
            Self::Merge(fields) => {
                for (field, value) in fields.iter() {
                    previous.insert(field.clone(), value.clone());
                }
                Ok(previous)
            },
            Self::Transform(transform) => transform(previous, options),
        }
    }
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge(fields) => f.debug_tuple("Merge").field(&fields.len()).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Applies `patch` to the record at `key`, retrying on version conflicts.
///
/// Each attempt:
///
/// 1. reads the record with its version and remaining TTL;
/// 2. runs the patch on a copy, with the option bag's TTL starting at `ttl`
///    or, if that is `None`, the TTL the record already has;
/// 3. writes the result back, expecting the version read in step 1. A key
///    that read back empty is created instead, failing if another writer
///    created it first.
///
/// Returns the value observed in step 1 of the successful attempt.
///
/// # Errors
///
/// - [`StoreError::PatchRetriesExhausted`] once `config.max_retries` retries have all
///   conflicted. The stored record is left as the competing writers made it.
/// - Any error from the patch itself, immediately and without retry.
/// - Any non-conflict error from the backend.
#[tracing::instrument(skip(backend, patch, config), fields(max_retries = config.max_retries))]
pub async fn patch_with_retry(
    backend: &dyn StoreBackend,
    key: &str,
    patch: &mut Patch,
    ttl: Option<u64>,
    config: &PatchConfig,
) -> StoreResult<KvHash> {
    for attempt in 0..=config.max_retries {
        let stored = backend.get(key).await?;
        let previous = stored.value.clone();
        let vacant = is_vacant(&stored);
        let mut options = RowOptions { ttl: ttl.or(stored.ttl) };
        let update = patch.apply(stored.value, &mut options)?;

        let written = async {
            fail_point!("patch-before-put", |_| Err(StoreError::conflict(key)));
            if vacant {
                create(backend, key, update, options.ttl).await
            } else {
                backend.put(key, update, options.ttl, Some(stored.version)).await.map(drop)
            }
        }
        .await;

        match written {
            Ok(_) => {
                if attempt > 0 {
                    tracing::debug!(attempt = attempt + 1, "patch succeeded after retry");
                }
                return Ok(previous);
            },
            Err(err) if err.is_conflict() && attempt < config.max_retries => {
                let delay = retry_delay(config.base_delay);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "CAS conflict, retrying patch",
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            },
            Err(err) if err.is_conflict() => break,
            Err(err) => return Err(err),
        }
    }

    tracing::warn!(attempts = config.max_attempts(), "patch retries exhausted");
    Err(StoreError::retries_exhausted(key, config.max_attempts()))
}

fn is_vacant(stored: &StoredEntry) -> bool {
    stored.version == 0 && stored.value.is_empty()
}

/// Installs `value` at a key that read back empty.
///
/// A versioned put cannot tell the empty sentinel from a record another
/// writer created at version 0 in the meantime, so the write goes through
/// [`StoreBackend::atomic_patch`] and conflicts if a value has appeared.
async fn create(
    backend: &dyn StoreBackend,
    key: &str,
    value: KvHash,
    ttl: Option<u64>,
) -> StoreResult<()> {
    let conflict_key = key.to_owned();
    backend
        .atomic_patch(
            key,
            Box::new(move |current, options| {
                if !current.is_empty() {
                    return Err(StoreError::conflict(conflict_key));
                }
                *current = value;
                options.ttl = ttl;
                Ok(true)
            }),
        )
        .await
        .map(drop)
}

/// Base delay plus up to the same again in jitter.
fn retry_delay(base_delay: Duration) -> Duration {
    if base_delay.is_zero() {
        return Duration::ZERO;
    }
    let range = base_delay.as_millis() as u64;
    base_delay + Duration::from_millis(rand::rng().random_range(0..=range))
}
