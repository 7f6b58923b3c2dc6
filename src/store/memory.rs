use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::provider::{ProviderId, ProviderMap};
use crate::store::DataKey;
use crate::{log, DataKeyStore, StoreSession};

/// An in-memory implementation of the data key store
///
/// Useful for tests and embedded deployments; records are lost when the
/// process terminates. Enforces id uniqueness and the at-most-one-active
/// record per name invariant.
#[derive(Debug, Default)]
pub struct InMemoryDataKeyStore {
    /// Records keyed by data key id
    keys: RwLock<HashMap<String, DataKey>>,
}

impl InMemoryDataKeyStore {
    /// Creates a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, dek: &DataKey) -> Result<()> {
        let mut keys = self.keys.write().unwrap();

        if keys.contains_key(&dek.id) {
            return Err(Error::Store(format!(
                "data key '{}' already exists",
                dek.id
            )));
        }

        if dek.active
            && keys
                .values()
                .any(|existing| existing.active && existing.name == dek.name)
        {
            return Err(Error::Store(format!(
                "an active data key already exists for '{}'",
                dek.name
            )));
        }

        // The raw key never enters the store
        let mut record = dek.clone();
        record.decrypted_data = Vec::new();

        keys.insert(record.id.clone(), record);
        Ok(())
    }

    async fn re_encrypt_one(
        &self,
        record: &DataKey,
        providers: &ProviderMap,
        current_provider_id: &ProviderId,
    ) -> Result<DataKey> {
        let provider_id = record.provider.normalize();
        let provider = providers
            .get(&provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(provider_id.clone()))?;

        let current = providers
            .get(current_provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(current_provider_id.clone()))?;

        let raw = provider
            .decrypt(&record.encrypted_data)
            .await
            .map_err(|e| Error::kms(&provider_id, e))?;

        let rewrapped = current
            .encrypt(&raw)
            .await
            .map_err(|e| Error::kms(current_provider_id, e))?;

        let mut updated = record.clone();
        updated.provider = current_provider_id.clone();
        updated.encrypted_data = rewrapped;
        updated.updated = Utc::now();

        Ok(updated)
    }
}

#[async_trait]
impl DataKeyStore for InMemoryDataKeyStore {
    async fn create_data_key(&self, dek: &DataKey) -> Result<()> {
        self.insert(dek)
    }

    async fn create_data_key_in_session(
        &self,
        dek: &DataKey,
        _session: &dyn StoreSession,
    ) -> Result<()> {
        // The in-memory store has no transactions to enlist in
        self.insert(dek)
    }

    async fn get_data_key(&self, id: &str) -> Result<DataKey> {
        let keys = self.keys.read().unwrap();
        keys.get(id).cloned().ok_or(Error::DataKeyNotFound)
    }

    async fn get_current_data_key(&self, name: &str) -> Result<DataKey> {
        let keys = self.keys.read().unwrap();
        keys.values()
            .find(|record| record.active && record.name == name)
            .cloned()
            .ok_or(Error::DataKeyNotFound)
    }

    async fn disable_data_keys(&self) -> Result<()> {
        let now = Utc::now();
        let mut keys = self.keys.write().unwrap();
        for record in keys.values_mut() {
            if record.active {
                record.active = false;
                record.updated = now;
            }
        }
        Ok(())
    }

    async fn re_encrypt_data_keys(
        &self,
        providers: &ProviderMap,
        current_provider_id: &ProviderId,
    ) -> Result<()> {
        let snapshot: Vec<DataKey> = self.keys.read().unwrap().values().cloned().collect();

        let mut failed = false;
        for record in snapshot {
            match self
                .re_encrypt_one(&record, providers, current_provider_id)
                .await
            {
                Ok(updated) => {
                    self.keys.write().unwrap().insert(updated.id.clone(), updated);
                }
                Err(err) => {
                    log::error(&format!(
                        "Failed to re-encrypt data key: {} id={} provider={}",
                        err, record.id, record.provider
                    ));
                    failed = true;
                }
            }
        }

        if failed {
            return Err(Error::Store(
                "failed to re-encrypt one or more data keys".into(),
            ));
        }
        Ok(())
    }
}
