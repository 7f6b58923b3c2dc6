//! Top-level envelope encryption orchestrator
//!
//! [`SecretsService`] ties the pieces together: it selects or creates the
//! current data key, runs payloads through the symmetric cipher, frames the
//! result, and maintains the data key cache. Rotation and re-encryption of
//! the key hierarchy live here as well, along with the background loop that
//! sweeps the cache and drives provider background tasks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::DataKeyCache;
use crate::config::{SecretsConfig, DEFAULT_PROVIDER_ID};
use crate::envelope::{self, Envelope};
use crate::error::{Error, Result};
use crate::provider::{key_name, ProviderId, ProviderMap};
use crate::store::DataKey;
use crate::{log, metrics, util};
use crate::{Aead, DataKeyStore, EncryptionOption, StoreSession, DATA_KEY_SIZE};

const OPS_COUNTER: &str = "secrets.ops";
const OP_ENCRYPT: &str = "encrypt";
const OP_DECRYPT: &str = "decrypt";

fn observe_op(operation: &str, success: bool) {
    metrics::increment_counter(
        &format!(
            "{}.operation={}.success={}",
            OPS_COUNTER, operation, success
        ),
        1,
    );
}

/// Envelope encryption core of the secrets management service
///
/// Payloads are encrypted with per-record data keys; data keys are wrapped
/// by the configured KMS provider and persisted through the
/// [`DataKeyStore`]. With envelope encryption disabled, all operations fall
/// back to the legacy cipher under the master secret key.
pub struct SecretsService {
    store: Arc<dyn DataKeyStore>,
    enc: Arc<dyn Aead>,
    config: SecretsConfig,

    providers: ProviderMap,
    current_provider_id: ProviderId,

    /// Active data key, initialized lazily on first encrypt and cleared by
    /// rotation
    current_data_key: Mutex<Option<DataKey>>,
    cache: DataKeyCache,
}

impl SecretsService {
    /// Creates the service from its collaborators and a config snapshot
    ///
    /// Fails with [`Error::ProviderNotConfigured`] when envelope encryption
    /// is enabled but the configured provider is not registered.
    pub fn new(
        store: Arc<dyn DataKeyStore>,
        enc: Arc<dyn Aead>,
        providers: ProviderMap,
        config: SecretsConfig,
    ) -> Result<Self> {
        let current_provider_id = config.encryption_provider.normalize();
        let enabled = config.envelope_encryption_enabled;

        if enabled && !providers.contains_key(&current_provider_id) {
            return Err(Error::ProviderNotConfigured(current_provider_id));
        }

        if !enabled && current_provider_id.as_str() != DEFAULT_PROVIDER_ID {
            log::warn("Changing the encryption provider requires enabling envelope encryption");
        }

        log::info(&format!(
            "Envelope encryption state: enabled={} provider={}",
            enabled, current_provider_id
        ));

        if metrics::metrics_enabled() {
            metrics::register_counter(OPS_COUNTER);
            metrics::register_timer("secrets.encrypt.time");
            metrics::register_timer("secrets.decrypt.time");
        }

        let cache = DataKeyCache::new(config.data_keys_cache_ttl);

        Ok(Self {
            store,
            enc,
            providers,
            current_provider_id,
            current_data_key: Mutex::new(None),
            cache,
            config,
        })
    }

    /// Returns the registered KMS providers
    pub fn providers(&self) -> &ProviderMap {
        &self.providers
    }

    /// Returns the normalized id of the provider wrapping new data keys
    pub fn current_provider_id(&self) -> &ProviderId {
        &self.current_provider_id
    }

    /// Encrypts a payload under the current data key for the given scope
    pub async fn encrypt(&self, payload: &[u8], opt: EncryptionOption) -> Result<Vec<u8>> {
        self.encrypt_in_session(payload, opt, None).await
    }

    /// Encrypts a payload, enlisting the data key write in a caller-supplied
    /// store session if one is given
    pub async fn encrypt_in_session(
        &self,
        payload: &[u8],
        opt: EncryptionOption,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<u8>> {
        if !self.config.envelope_encryption_enabled {
            return self.enc.encrypt(payload, self.config.secret_key.as_bytes());
        }

        let result = self.envelope_encrypt(payload, opt, session).await;
        observe_op(OP_ENCRYPT, result.is_ok());
        result
    }

    async fn envelope_encrypt(
        &self,
        payload: &[u8],
        opt: EncryptionOption,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<u8>> {
        let _timer = crate::timer!("secrets.encrypt.time");

        let scope = opt();
        let name = key_name(&scope, &self.current_provider_id);

        let data_key = {
            let mut current = self.current_data_key.lock().await;
            match current.as_ref() {
                Some(dek) => dek.clone(),
                None => {
                    let dek = match self.get_current_data_key(&name).await {
                        Ok(dek) => dek,
                        Err(Error::DataKeyNotFound) => self
                            .new_data_key(&name, &scope, session)
                            .await
                            .map_err(|err| {
                                log::error(&format!(
                                    "Failed to generate new data key: {} name={}",
                                    err, name
                                ));
                                err
                            })?,
                        Err(err) => {
                            log::error(&format!(
                                "Failed to get current data key: {} name={}",
                                err, name
                            ));
                            return Err(err);
                        }
                    };
                    *current = Some(dek.clone());
                    dek
                }
            }
        };

        let encrypted = self.enc.encrypt(payload, &data_key.decrypted_data)?;

        Ok(envelope::encode(&data_key.id, &encrypted))
    }

    /// Decrypts a payload produced by [`Self::encrypt`] or by the legacy
    /// cipher
    pub async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.config.envelope_encryption_enabled {
            return self.enc.decrypt(payload, self.config.secret_key.as_bytes());
        }

        let result = self.envelope_decrypt(payload).await;
        observe_op(OP_DECRYPT, result.is_ok());
        result
    }

    async fn envelope_decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let _timer = crate::timer!("secrets.decrypt.time");

        match envelope::decode(payload)? {
            // Legacy blobs lead with the cipher's random salt, never with
            // the frame sentinel
            Envelope::Legacy(blob) => self.enc.decrypt(blob, self.config.secret_key.as_bytes()),
            Envelope::Framed { key_id, ciphertext } => {
                let data_key = self.data_key_by_id(&key_id).await.map_err(|err| {
                    log::error(&format!(
                        "Failed to look up data key by id: {} id={}",
                        err, key_id
                    ));
                    err
                })?;

                self.enc.decrypt(ciphertext, &data_key)
            }
        }
    }

    /// Creates a new data key, wraps and persists it, and caches its raw
    /// value
    async fn new_data_key(
        &self,
        name: &str,
        scope: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<DataKey> {
        // 1. Create new data key
        let raw = util::get_rand_bytes(DATA_KEY_SIZE);

        let provider = self
            .providers
            .get(&self.current_provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(self.current_provider_id.clone()))?;

        // 2. Encrypt it
        let encrypted = provider
            .encrypt(&raw)
            .await
            .map_err(|e| Error::kms(&self.current_provider_id, e))?;

        // 3. Store its encrypted value
        let now = Utc::now();
        let dek = DataKey {
            id: util::generate_short_uid(),
            name: name.to_string(),
            provider: self.current_provider_id.clone(),
            encrypted_data: encrypted,
            decrypted_data: raw,
            active: true,
            scope: scope.to_string(),
            created: now,
            updated: now,
        };

        match session {
            Some(session) => self.store.create_data_key_in_session(&dek, session).await?,
            None => self.store.create_data_key(&dek).await?,
        }

        // 4. Cache its unencrypted value and return it
        self.cache.add(&dek.id, &dek.decrypted_data);

        Ok(dek)
    }

    /// Looks up a data key in the cache or the store, unwrapping it on a
    /// cache miss
    async fn data_key_by_id(&self, id: &str) -> Result<Vec<u8>> {
        if let Some(data_key) = self.cache.get(id) {
            return Ok(data_key);
        }

        // 1. Get encrypted data key from the store
        let record = self.store.get_data_key(id).await?;

        // 2. Decrypt data key
        let provider_id = record.provider.normalize();
        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(provider_id.clone()))?;

        let decrypted = provider
            .decrypt(&record.encrypted_data)
            .await
            .map_err(|e| Error::kms(&provider_id, e))?;

        // 3. Cache data key
        self.cache.add(id, &decrypted);

        Ok(decrypted)
    }

    /// Looks up the active data key for a name and unwraps it
    async fn get_current_data_key(&self, name: &str) -> Result<DataKey> {
        // 1. Get encrypted data key from the store
        let mut data_key = self.store.get_current_data_key(name).await?;

        // 2. Decrypt data key
        let provider_id = data_key.provider.normalize();
        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(provider_id.clone()))?;

        data_key.decrypted_data = provider
            .decrypt(&data_key.encrypted_data)
            .await
            .map_err(|e| Error::kms(&provider_id, e))?;

        // 3. Cache data key
        self.cache.add(&data_key.id, &data_key.decrypted_data);

        Ok(data_key)
    }

    /// Marks all data keys inactive; the next encrypt creates a fresh one
    ///
    /// The cache is not flushed: cached keys stay usable for decrypting
    /// historical ciphertexts, rotation only moves encryption forward.
    pub async fn rotate_data_keys(&self) -> Result<()> {
        // A single data key is active at a time for now; scopes may
        // eventually each hold their own
        let mut current = self.current_data_key.lock().await;

        self.store.disable_data_keys().await.map_err(|err| {
            log::error(&format!(
                "Failed to disable active data keys while rotating data key: {}",
                err
            ));
            err
        })?;

        *current = None;

        Ok(())
    }

    /// Rewraps every persisted data key under the current provider and
    /// flushes the cache
    pub async fn re_encrypt_data_keys(&self) -> Result<()> {
        self.store
            .re_encrypt_data_keys(&self.providers, &self.current_provider_id)
            .await
            .map_err(|err| {
                log::error(&format!("Failed to re-encrypt data keys: {}", err));
                err
            })?;

        self.cache.flush();

        Ok(())
    }

    /// Encrypts every value of the map, stopping at the first failure
    pub async fn encrypt_many(
        &self,
        values: &HashMap<String, String>,
        opt: EncryptionOption,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let mut encrypted = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let data = self.encrypt(value.as_bytes(), opt.clone()).await?;
            encrypted.insert(key.clone(), data);
        }
        Ok(encrypted)
    }

    /// Decrypts every value of the map, stopping at the first failure
    pub async fn decrypt_many(
        &self,
        values: &HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, String>> {
        let mut decrypted = HashMap::with_capacity(values.len());
        for (key, data) in values {
            let value = String::from_utf8(self.decrypt(data).await?).map_err(|_| {
                Error::Internal(format!("decrypted value for '{}' is not valid UTF-8", key))
            })?;
            decrypted.insert(key.clone(), value);
        }
        Ok(decrypted)
    }

    /// Returns the decrypted value under `key`, or `fallback` when the key
    /// is absent or fails to decrypt
    pub async fn get_value_or_default(
        &self,
        values: &HashMap<String, Vec<u8>>,
        key: &str,
        fallback: &str,
    ) -> String {
        if let Some(data) = values.get(key) {
            if let Ok(decrypted) = self.decrypt(data).await {
                if let Ok(value) = String::from_utf8(decrypted) {
                    return value;
                }
            }
        }

        fallback.to_string()
    }

    /// Computes the usage counters published by the hosting service
    pub fn usage_metrics(&self) -> Result<HashMap<String, i64>> {
        let mut usage = HashMap::new();

        // Enabled / disabled
        usage.insert(
            "stats.encryption.envelope_encryption_enabled.count".to_string(),
            i64::from(self.config.envelope_encryption_enabled),
        );

        // Current provider
        let kind = self.current_provider_id.kind()?;
        usage.insert(
            format!("stats.encryption.current_provider.{}.count", kind),
            1,
        );

        // Count by kind
        let mut count_by_kind: HashMap<&str, i64> = HashMap::new();
        for id in self.providers.keys() {
            *count_by_kind.entry(id.kind()?).or_default() += 1;
        }

        for (kind, count) in count_by_kind {
            usage.insert(format!("stats.encryption.providers.{}.count", kind), count);
        }

        Ok(usage)
    }

    /// Drives the background work: periodic cache eviction plus every
    /// provider background task, under a shared cancellation scope
    ///
    /// A failed provider task cancels its siblings and the failure is
    /// returned; cancellation of the supplied token shuts everything down
    /// cleanly.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let period = self.config.data_keys_cache_cleanup_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let group = token.child_token();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for provider in self.providers.values() {
            if let Some(background) = provider.background() {
                let child = group.clone();
                tasks.spawn(async move { background.run(child).await });
            }
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    log::debug("removing expired data encryption keys from cache");
                    self.cache.remove_expired();
                    log::debug("done removing expired data encryption keys from cache");
                }
                Some(outcome) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(err) = task_failure(outcome) {
                        // First failure takes the remaining tasks down
                        group.cancel();
                        while let Some(outcome) = tasks.join_next().await {
                            task_failure(outcome);
                        }
                        return Err(err);
                    }
                }
                _ = token.cancelled() => {
                    log::debug("secrets service is shutting down; stopping background tasks");
                    while let Some(outcome) = tasks.join_next().await {
                        if let Some(err) = task_failure(outcome) {
                            return Err(err);
                        }
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Maps a joined background task outcome to its propagatable failure, if
/// any; cancellation is not a failure
fn task_failure(outcome: std::result::Result<Result<()>, JoinError>) -> Option<Error> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(Error::Cancelled)) => None,
        Ok(Err(err)) => Some(err),
        Err(join_err) => Some(Error::Internal(format!(
            "background task failed: {}",
            join_err
        ))),
    }
}
