//! The set of stores an application runs with.
//!
//! A [`StoreRegistry`] is built once at startup and passed to whatever needs
//! storage. Stores that are not supplied default to local in-memory ones,
//! which is what tests and local development want.
//!
//! ```
//! use std::sync::Arc;
//!
//! use kvstash_storage::{KvStore, MemoryBackend, StoreRegistry};
//!
//! let registry = StoreRegistry::builder()
//!     .kv(KvStore::new(Arc::new(MemoryBackend::new())))
//!     .build();
//! assert!(registry.shared_kv().is_local());
//! ```

use crate::{
    error::{StoreError, StoreResult},
    settings::SettingsStore,
    store::KvStore,
};

/// Settings, secrets and key-value stores for one application.
#[derive(Debug, Clone, bon::Builder)]
pub struct StoreRegistry {
    /// App settings.
    #[builder(default = SettingsStore::local())]
    settings: SettingsStore,

    /// App secrets.
    #[builder(default = SettingsStore::local())]
    secrets: SettingsStore,

    /// Key-value store private to the app instance.
    #[builder(default = KvStore::local())]
    kv: KvStore,

    /// Key-value store shared across instances of the app.
    #[builder(default = KvStore::local())]
    shared_kv: KvStore,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::local()
    }
}

impl StoreRegistry {
    /// A registry where every store is local.
    #[must_use]
    pub fn local() -> Self {
        Self::builder().build()
    }

    /// The app settings store.
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// The app secrets store.
    #[must_use]
    pub fn secrets(&self) -> &SettingsStore {
        &self.secrets
    }

    /// The key-value store private to this app instance.
    #[must_use]
    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// The key-value store shared across app instances.
    #[must_use]
    pub fn shared_kv(&self) -> &KvStore {
        &self.shared_kv
    }

    /// Clears every store.
    ///
    /// All four stores must be local. If any is not, nothing is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotLocal`] naming the first store that is backed
    /// by a remote backend.
    pub async fn reset_local(&self) -> StoreResult<()> {
        let local = [
            ("settings", self.settings.is_local()),
            ("secrets", self.secrets.is_local()),
            ("kv", self.kv.is_local()),
            ("shared_kv", self.shared_kv.is_local()),
        ];
        if let Some((name, _)) = local.iter().find(|(_, is_local)| !is_local) {
            tracing::warn!(store = *name, "refusing to reset non-local store");
            return Err(StoreError::not_local(*name));
        }

        self.settings.reset().await?;
        self.secrets.reset().await?;
        self.kv.reset().await?;
        self.shared_kv.reset().await?;
        tracing::debug!("local stores reset");
        Ok(())
    }
}
