//! The key-value store facade.
//!
//! [`KvStore`] is the single entry point applications use. It is handed its
//! [`StoreBackend`] at construction, so the same code runs against the
//! in-memory simulation in tests and a remote adapter in production.
//!
//! | Group | Methods | Mechanism |
//! |-------|---------|-----------|
//! | Records | `get`, `put`, `delete`, `exists` | one backend call |
//! | Patching | `patch`, `patch_with` | [`patch_with_retry`] (CAS loop) |
//! | Lists | `append`, `unshift`, `shift`, `peek` | [`StoreBackend::atomic_patch`] |
//! | Sets | `add_*`, `remove_*`, `has_*` | [`StoreBackend::atomic_patch`] |
//! | Counters | `increment` | [`StoreBackend::atomic_patch`] |
//!
//! Every collection method has a `_multi` form that touches many fields of
//! one record in a single atomic step.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    backend::StoreBackend,
    collections,
    config::StoreConfig,
    error::{StoreError, StoreResult},
    memory::MemoryBackend,
    patch::{Patch, patch_with_retry},
    types::{KvHash, KvValue, MultiValue, NumberSet, RowOptions, StringSet},
};

/// Key-value store with versioned patching and atomic collection operators.
///
/// Cloning is cheap and clones share the backend.
///
/// # Example
///
/// ```
/// use kvstash_storage::{KvStore, Patch};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = KvStore::local();
/// store.put("foo", json!({"bar": 1}).as_object().cloned().unwrap()).await?;
///
/// let previous = store
///     .patch("foo", Patch::transform(|mut value, _| {
///         let bar = value["bar"].as_i64().unwrap_or(0);
///         value.insert("bar".into(), json!(bar + 1));
///         value
///     }))
///     .await?;
///
/// assert_eq!(previous["bar"], 1);
/// assert_eq!(store.get("foo").await?["bar"], 2);
/// # Ok::<(), kvstash_storage::StoreError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn StoreBackend>,
    config: StoreConfig,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("local", &self.backend.is_local())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KvStore {
    /// Creates a store over `backend` with default configuration.
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Creates a store over `backend` with the given configuration.
    #[must_use]
    pub fn with_config(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    /// Creates a store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn local() -> Self {
        Self::local_with_config(StoreConfig::default())
    }

    /// Creates a store over a fresh [`MemoryBackend`] simulating the
    /// configured latency.
    #[must_use]
    pub fn local_with_config(config: StoreConfig) -> Self {
        let backend = MemoryBackend::new().with_latency(config.simulated_latency());
        Self::with_config(Arc::new(backend), config)
    }

    /// Returns the backend this store writes to.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns `true` if the backend is an in-process simulation.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.backend.is_local()
    }

    /// Drops every record.
    ///
    /// # Errors
    ///
    /// Fails if the backend does not support resetting.
    pub async fn reset(&self) -> StoreResult<()> {
        self.backend.reset().await
    }

    /// Returns the record at `key`, or an empty map if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, key: &str) -> StoreResult<KvHash> {
        Ok(self.backend.get(key).await?.value)
    }

    /// Returns only the requested fields of the record at `key`.
    ///
    /// Fields the record does not have are left out of the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get_fields<S: AsRef<str>>(&self, key: &str, fields: &[S]) -> StoreResult<KvHash> {
        let mut value = self.get(key).await?;
        Ok(fields
            .iter()
            .filter_map(|field| value.remove_entry(field.as_ref()))
            .collect())
    }

    /// Reads the record at `key` into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the record does not
    /// deserialize into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<T> {
        let value = self.get(key).await?;
        Ok(serde_json::from_value(Value::Object(value))?)
    }

    /// Overwrites the record at `key` with no TTL, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn put(&self, key: &str, value: KvHash) -> StoreResult<KvHash> {
        self.put_with(key, value, RowOptions::default()).await
    }

    /// Overwrites the record at `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn put_with(&self, key: &str, value: KvHash, options: RowOptions) -> StoreResult<KvHash> {
        self.backend.put(key, value, options.ttl, None).await
    }

    /// Serializes `value` and writes it to `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] unless `value` serializes to a
    /// JSON object.
    pub async fn put_as<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: RowOptions,
    ) -> StoreResult<KvHash> {
        match serde_json::to_value(value)? {
            Value::Object(hash) => self.put_with(key, hash, options).await,
            other => Err(StoreError::serialization(format!(
                "record values must serialize to an object, not {}",
                crate::types::type_name(&other)
            ))),
        }
    }

    /// Applies `patch` to the record at `key`, returning the previous value.
    ///
    /// The record keeps its remaining TTL unless a transform changes it.
    ///
    /// # Errors
    ///
    /// See [`patch_with_retry`].
    pub async fn patch(&self, key: &str, patch: Patch) -> StoreResult<KvHash> {
        self.patch_with(key, patch, RowOptions::default()).await
    }

    /// Applies `patch` to the record at `key` with a new TTL, returning the
    /// previous value.
    ///
    /// # Errors
    ///
    /// See [`patch_with_retry`].
    pub async fn patch_with(
        &self,
        key: &str,
        mut patch: Patch,
        options: RowOptions,
    ) -> StoreResult<KvHash> {
        patch_with_retry(self.backend.as_ref(), key, &mut patch, options.ttl, self.config.patch())
            .await
    }

    /// Removes the record at `key`, returning its previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, key: &str) -> StoreResult<KvHash> {
        self.backend.delete(key).await
    }

    /// Removes fields from the record at `key`, returning the remaining value.
    ///
    /// Nothing is written if none of the fields were present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete_fields<S: AsRef<str>>(&self, key: &str, fields: &[S]) -> StoreResult<KvHash> {
        let fields: Vec<String> = fields.iter().map(|f| f.as_ref().to_owned()).collect();
        let entry = self
            .backend
            .atomic_patch(
                key,
                Box::new(move |value, _| Ok(collections::delete_fields(value, fields.as_slice()))),
            )
            .await?;
        Ok(entry.value)
    }

    /// Returns `true` if a live record exists at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.backend.exists(key).await
    }

    /// Runs a collection operator inside one atomic patch and hands back its
    /// result. The operator reports whether it changed the record; unchanged
    /// records are not written.
    async fn apply<T, F>(&self, key: &str, operator: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&str, &mut KvHash) -> StoreResult<(T, bool)> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let owned_key = key.to_owned();
        self.backend
            .atomic_patch(
                key,
                Box::new(move |value, _| {
                    let (result, changed) = operator(&owned_key, value)?;
                    *out.lock() = Some(result);
                    Ok(changed)
                }),
            )
            .await?;
        let result = slot.lock().take();
        result.ok_or_else(|| StoreError::internal("backend did not run the atomic updater"))
    }

    /// Adds `amount` to a numeric field, returning the new value.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotANumber`] if the field holds a non-numeric value.
    pub async fn increment(&self, key: &str, field: &str, amount: f64) -> StoreResult<f64> {
        let mut totals = self.increment_multi(key, single(field, amount)).await?;
        Ok(totals.remove(field).unwrap_or_default())
    }

    /// Adds a signed amount to each field, returning the new values.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotANumber`] if any field holds a non-numeric value, in
    /// which case no field is changed.
    pub async fn increment_multi(
        &self,
        key: &str,
        amounts: MultiValue<f64>,
    ) -> StoreResult<MultiValue<f64>> {
        self.apply(key, move |key, value| {
            let totals = collections::increment_fields(key, value, &amounts)?;
            let changed = !totals.is_empty();
            Ok((totals, changed))
        })
        .await
    }

    /// Removes and returns the first element of a list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a list.
    pub async fn shift(&self, key: &str, field: &str) -> StoreResult<Option<KvValue>> {
        let mut shifted = self.shift_multi(key, single(field, 1)).await?;
        Ok(shifted.remove(field).and_then(|items| items.into_iter().next()))
    }

    /// Removes and returns up to the given number of elements from the front
    /// of each list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a list.
    pub async fn shift_multi(
        &self,
        key: &str,
        counts: MultiValue<usize>,
    ) -> StoreResult<MultiValue<Vec<KvValue>>> {
        self.apply(key, move |key, value| {
            let changes = collections::shift_fields(key, value, &counts)?;
            Ok((changes.results, changes.changed))
        })
        .await
    }

    /// Inserts a value at the front of a list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a list.
    pub async fn unshift(&self, key: &str, field: &str, value: KvValue) -> StoreResult<()> {
        self.unshift_multi(key, single(field, vec![value])).await
    }

    /// Inserts values at the front of each list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a list.
    pub async fn unshift_multi(&self, key: &str, values: MultiValue<Vec<KvValue>>) -> StoreResult<()> {
        self.apply(key, move |key, value| {
            collections::unshift_fields(key, value, &values)?;
            Ok(((), true))
        })
        .await
    }

    /// Returns the first element of a list field without removing it.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a list.
    pub async fn peek(&self, key: &str, field: &str) -> StoreResult<Option<KvValue>> {
        let mut peeked = self.peek_multi(key, single(field, 1)).await?;
        Ok(peeked.remove(field).and_then(|items| items.into_iter().next()))
    }

    /// Returns up to the given number of elements from the front of each
    /// list field without removing them.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a list.
    pub async fn peek_multi(
        &self,
        key: &str,
        counts: MultiValue<usize>,
    ) -> StoreResult<MultiValue<Vec<KvValue>>> {
        self.apply(key, move |key, value| {
            Ok((collections::peek_fields(key, value, &counts)?, false))
        })
        .await
    }

    /// Pushes a value onto the end of a list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a list.
    pub async fn append(&self, key: &str, field: &str, value: KvValue) -> StoreResult<()> {
        self.append_multi(key, single(field, vec![value])).await
    }

    /// Pushes values onto the end of each list field.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a list.
    pub async fn append_multi(&self, key: &str, values: MultiValue<Vec<KvValue>>) -> StoreResult<()> {
        self.apply(key, move |key, value| {
            collections::append_fields(key, value, &values)?;
            Ok(((), true))
        })
        .await
    }

    /// Adds a number to a set field, returning `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn add_number(&self, key: &str, field: &str, value: f64) -> StoreResult<bool> {
        let added = self.add_number_multi(key, single(field, vec![value])).await?;
        Ok(added.get(field).is_some_and(|set| set.has(value)))
    }

    /// Adds numbers to each set field, returning the newly added ones.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn add_number_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<f64>>,
    ) -> StoreResult<MultiValue<NumberSet>> {
        self.apply(key, move |key, value| {
            let changes = collections::add_numbers(key, value, &values)?;
            Ok((changes.results, changes.changed))
        })
        .await
    }

    /// Removes a number from a set field, returning `true` if it was present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn remove_number(&self, key: &str, field: &str, value: f64) -> StoreResult<bool> {
        let removed = self.remove_number_multi(key, single(field, vec![value])).await?;
        Ok(removed.get(field).is_some_and(|set| set.has(value)))
    }

    /// Removes numbers from each set field, returning the ones that were present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn remove_number_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<f64>>,
    ) -> StoreResult<MultiValue<NumberSet>> {
        self.apply(key, move |key, value| {
            let changes = collections::remove_numbers(key, value, &values)?;
            Ok((changes.results, changes.changed))
        })
        .await
    }

    /// Returns `true` if a set field contains the number.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn has_number(&self, key: &str, field: &str, value: f64) -> StoreResult<bool> {
        let present = self.has_number_multi(key, single(field, vec![value])).await?;
        Ok(present.get(field).is_some_and(|set| set.has(value)))
    }

    /// Returns, per field, which of the numbers are in the set.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn has_number_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<f64>>,
    ) -> StoreResult<MultiValue<NumberSet>> {
        self.apply(key, move |key, value| {
            Ok((collections::has_numbers(key, value, &values)?, false))
        })
        .await
    }

    /// Adds a string to a set field, returning `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn add_string(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let added = self.add_string_multi(key, single(field, vec![value.to_owned()])).await?;
        Ok(added.get(field).is_some_and(|set| set.has(value)))
    }

    /// Adds strings to each set field, returning the newly added ones.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn add_string_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<String>>,
    ) -> StoreResult<MultiValue<StringSet>> {
        self.apply(key, move |key, value| {
            let changes = collections::add_strings(key, value, &values)?;
            Ok((changes.results, changes.changed))
        })
        .await
    }

    /// Removes a string from a set field, returning `true` if it was present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn remove_string(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let removed = self.remove_string_multi(key, single(field, vec![value.to_owned()])).await?;
        Ok(removed.get(field).is_some_and(|set| set.has(value)))
    }

    /// Removes strings from each set field, returning the ones that were present.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn remove_string_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<String>>,
    ) -> StoreResult<MultiValue<StringSet>> {
        self.apply(key, move |key, value| {
            let changes = collections::remove_strings(key, value, &values)?;
            Ok((changes.results, changes.changed))
        })
        .await
    }

    /// Returns `true` if a set field contains the string.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if the field is not a set.
    pub async fn has_string(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let present = self.has_string_multi(key, single(field, vec![value.to_owned()])).await?;
        Ok(present.get(field).is_some_and(|set| set.has(value)))
    }

    /// Returns, per field, which of the strings are in the set.
    ///
    /// # Errors
    ///
    /// [`StoreError::TypeMismatch`] if any field is not a set.
    pub async fn has_string_multi(
        &self,
        key: &str,
        values: MultiValue<Vec<String>>,
    ) -> StoreResult<MultiValue<StringSet>> {
        self.apply(key, move |key, value| {
            Ok((collections::has_strings(key, value, &values)?, false))
        })
        .await
    }
}

fn single<T>(field: &str, value: T) -> MultiValue<T> {
    MultiValue::from([(field.to_owned(), value)])
}
