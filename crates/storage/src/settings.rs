//! Record store for app settings and secrets.
//!
//! [`SettingsStore`] offers the plain record operations without TTLs or
//! collection operators. Field deletes go through the retrying patch engine
//! rather than an atomic patch, so they behave like any other settings
//! update under contention.

use std::sync::Arc;

use crate::{
    backend::StoreBackend,
    config::PatchConfig,
    error::StoreResult,
    memory::MemoryBackend,
    patch::{Patch, patch_with_retry},
    types::KvHash,
};

/// Settings and secrets store.
#[derive(Clone)]
pub struct SettingsStore {
    backend: Arc<dyn StoreBackend>,
    patch: PatchConfig,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("local", &self.backend.is_local())
            .field("patch", &self.patch)
            .finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Creates a settings store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_patch_config(backend, PatchConfig::default())
    }

    /// Creates a settings store with a custom patch retry policy.
    #[must_use]
    pub fn with_patch_config(backend: Arc<dyn StoreBackend>, patch: PatchConfig) -> Self {
        Self { backend, patch }
    }

    /// Creates a settings store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
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

    /// Returns only the requested fields that the record has.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get_fields<S: AsRef<str>>(&self, key: &str, fields: &[S]) -> StoreResult<KvHash> {
        let mut value = self.get(key).await?;
        Ok(fields.iter().filter_map(|field| value.remove_entry(field.as_ref())).collect())
    }

    /// Writes the whole record at `key`. Writing `None` deletes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn put(&self, key: &str, value: Option<KvHash>) -> StoreResult<()> {
        match value {
            Some(value) => self.backend.put(key, value, None, None).await.map(drop),
            None => self.backend.delete(key).await.map(drop),
        }
    }

    /// Applies `patch` with CAS retries, returning the previous value.
    ///
    /// # Errors
    ///
    /// See [`patch_with_retry`].
    pub async fn patch(&self, key: &str, mut patch: Patch) -> StoreResult<KvHash> {
        patch_with_retry(self.backend.as_ref(), key, &mut patch, None, &self.patch).await
    }

    /// Removes the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(key).await.map(drop)
    }

    /// Removes fields from the record at `key`.
    ///
    /// # Errors
    ///
    /// See [`patch_with_retry`].
    pub async fn delete_fields<S: AsRef<str>>(&self, key: &str, fields: &[S]) -> StoreResult<()> {
        let fields: Vec<String> = fields.iter().map(|f| f.as_ref().to_owned()).collect();
        let patch = Patch::transform(move |mut value, _| {
            for field in &fields {
                value.remove(field);
            }
            value
        });
        self.patch(key, patch).await.map(drop)
    }

    /// Returns `true` if a record exists at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.backend.exists(key).await
    }
}
