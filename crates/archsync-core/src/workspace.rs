//! # Workspace
//!
//! Hands out one [`EnvironmentStore`] per environment key so every caller
//! editing the same environment shares one batch and one in-flight gate.
//! Stores for different environments are independent.

use crate::backend::{EnvironmentBackend, EnvironmentKey};
use crate::store::{EnvironmentStore, StoreOptions};
use crate::sync::SyncEngine;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of environment stores over a shared backend.
pub struct Workspace<B> {
    backend: Arc<B>,
    options: StoreOptions,
    stores: Mutex<BTreeMap<EnvironmentKey, Arc<EnvironmentStore<B>>>>,
}

impl<B: EnvironmentBackend> Workspace<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            stores: Mutex::new(BTreeMap::new()),
        }
    }

    /// The store for an environment, created on first use.
    pub fn store(&self, architecture_id: &str, environment_id: &str) -> Arc<EnvironmentStore<B>> {
        let key = EnvironmentKey::new(architecture_id, environment_id);
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(stores.entry(key).or_insert_with_key(|key| {
            tracing::debug!("Opening store for {}", key);
            Arc::new(EnvironmentStore::new(
                Arc::clone(&self.backend),
                key.clone(),
                self.options,
            ))
        }))
    }

    /// A sync engine over the same backend.
    #[must_use]
    pub fn sync(&self) -> SyncEngine<B> {
        SyncEngine::new(Arc::clone(&self.backend))
    }

    /// Keys of every store opened so far.
    #[must_use]
    pub fn environments(&self) -> Vec<EnvironmentKey> {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[test]
    fn same_key_shares_one_store() {
        let workspace = Workspace::new(Arc::new(InMemoryBackend::new()), StoreOptions::default());
        let a = workspace.store("arch", "dev");
        let b = workspace.store("arch", "dev");
        let c = workspace.store("arch", "prod");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(workspace.environments().len(), 2);
    }
}
