//! Configuration snapshot for the secrets service
//!
//! All settings are captured at construction time; the service never reads
//! process-wide state.

use std::time::Duration;

use crate::provider::ProviderId;

/// Id of the built-in master-key-derived provider
pub const DEFAULT_PROVIDER_ID: &str = "secretKey.v1";

/// Default time-to-live for cached data encryption keys
pub const DEFAULT_DATA_KEYS_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Default period of the cache eviction pass
pub const DEFAULT_DATA_KEYS_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Settings consumed by [`crate::service::SecretsService`]
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// Provider used to wrap newly created data keys
    pub encryption_provider: ProviderId,

    /// Master key for legacy payloads and the default provider
    pub secret_key: String,

    /// Whether envelope encryption is enabled; when off, all operations use
    /// the legacy cipher with the master key
    pub envelope_encryption_enabled: bool,

    /// How long decrypted data keys stay in the in-memory cache
    pub data_keys_cache_ttl: Duration,

    /// How often the background loop sweeps expired cache entries
    pub data_keys_cache_cleanup_interval: Duration,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            encryption_provider: ProviderId::from(DEFAULT_PROVIDER_ID),
            secret_key: String::new(),
            envelope_encryption_enabled: false,
            data_keys_cache_ttl: DEFAULT_DATA_KEYS_CACHE_TTL,
            data_keys_cache_cleanup_interval: DEFAULT_DATA_KEYS_CACHE_CLEANUP_INTERVAL,
        }
    }
}

impl SecretsConfig {
    /// Creates a config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the master secret key
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = secret_key.into();
        self
    }

    /// Sets the provider used to wrap new data keys
    pub fn with_encryption_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.encryption_provider = provider.into();
        self
    }

    /// Enables or disables envelope encryption
    pub fn with_envelope_encryption(mut self, enabled: bool) -> Self {
        self.envelope_encryption_enabled = enabled;
        self
    }

    /// Sets the data key cache time-to-live
    pub fn with_data_keys_cache_ttl(mut self, ttl: Duration) -> Self {
        self.data_keys_cache_ttl = ttl;
        self
    }

    /// Sets the cache eviction pass period
    pub fn with_data_keys_cache_cleanup_interval(mut self, interval: Duration) -> Self {
        self.data_keys_cache_cleanup_interval = interval;
        self
    }
}
