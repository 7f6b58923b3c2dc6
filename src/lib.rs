//! # Secrets Manager
//!
//! Envelope encryption core for a secrets management service.
//!
//! `secrets-manager` protects application secrets with a two-tier key
//! hierarchy: each payload is encrypted with a per-record data encryption
//! key (DEK), and DEKs are wrapped by a configurable key management
//! provider. The crate provides the encryption/decryption state machine,
//! the DEK lifecycle (lazy creation, caching, rotation, re-encryption), a
//! TTL-bounded DEK cache, and the pluggable provider abstraction. DEK
//! persistence and external KMS drivers plug in through the
//! [`DataKeyStore`] and [`KmsProvider`] traits.
//!
//! Encrypted payloads are framed with the id of the DEK that produced them;
//! unframed payloads are treated as legacy blobs encrypted directly under
//! the master secret key and remain decryptable indefinitely.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use secrets_manager::config::SecretsConfig;
//! use secrets_manager::crypto::Aes256GcmAead;
//! use secrets_manager::kms::default_providers;
//! use secrets_manager::store::InMemoryDataKeyStore;
//! use secrets_manager::{with_scope, SecretsService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create dependencies
//! let enc = Arc::new(Aes256GcmAead::new());
//! let providers = default_providers(enc.clone(), "master-key");
//! let store = Arc::new(InMemoryDataKeyStore::new());
//!
//! let config = SecretsConfig::new()
//!     .with_secret_key("master-key")
//!     .with_envelope_encryption(true);
//!
//! let service = SecretsService::new(store, enc, providers, config)?;
//!
//! // Encrypt data under a scope
//! let ciphertext = service
//!     .encrypt(b"db password", with_scope("datasources"))
//!     .await?;
//!
//! // Decrypt data
//! let plaintext = service.decrypt(&ciphertext).await?;
//! assert_eq!(plaintext, b"db password");
//! # Ok(())
//! # }
//! ```
//!
//! ## Key rotation
//!
//! [`SecretsService::rotate_data_keys`] deactivates every data key; the
//! next encrypt lazily creates a fresh one while old ciphertexts keep
//! decrypting. [`SecretsService::re_encrypt_data_keys`] rewraps all
//! persisted data keys under the currently configured provider, e.g. after
//! migrating from the built-in master-key provider to an external KMS.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod kms;
pub mod log;
pub mod metrics;
pub mod provider;
pub mod service;
pub mod store;
pub mod util;

// Re-export key types
pub use crate::cache::DataKeyCache;
pub use crate::config::SecretsConfig;
pub use crate::crypto::Aes256GcmAead;
pub use crate::error::{Error, Result};
pub use crate::kms::{default_providers, SecretKeyProvider};
pub use crate::log::{set_logger, Logger, NoopLogger, StdoutLogger};
pub use crate::metrics::{
    disable_metrics, metrics_enabled, set_metrics_provider, MetricsProvider,
};
pub use crate::provider::{key_name, ProviderId, ProviderMap};
pub use crate::service::SecretsService;
pub use crate::store::{DataKey, InMemoryDataKeyStore};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Size of a raw data encryption key in bytes
pub const DATA_KEY_SIZE: usize = 16;

/// Symmetric cipher contract for payload and data key encryption
///
/// Implementations accept key material of arbitrary length and return
/// self-contained authenticated blobs.
pub trait Aead: Send + Sync + fmt::Debug {
    /// Encrypts data using the provided key material
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data using the provided key material
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;
}

/// Key management provider: opaque wrap/unwrap of raw data key bytes
#[async_trait]
pub trait KmsProvider: Send + Sync + fmt::Debug {
    /// Wraps raw data key bytes under the provider's root key
    async fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Unwraps data key bytes; fails if the wrapping is not from this
    /// provider instance
    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>>;

    /// Returns the provider's long-running task, if it has one
    ///
    /// Providers needing periodic work (key-material refresh, token
    /// renewal) expose it here; the service schedules every returned task
    /// on its background loop.
    fn background(&self) -> Option<Arc<dyn BackgroundProvider>> {
        None
    }
}

/// Long-running task owned by a KMS provider
#[async_trait]
pub trait BackgroundProvider: Send + Sync + fmt::Debug {
    /// Runs until completion or cancellation of the token
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

/// Caller-supplied store transaction handle
///
/// Opaque to the core; store implementations that support transactional
/// enlistment downcast it to their own session type.
pub trait StoreSession: Send + Sync {
    /// Convert to Any for downcasting
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// Persistence contract for data key records
#[async_trait]
pub trait DataKeyStore: Send + Sync + fmt::Debug {
    /// Persists a new data key record
    ///
    /// Enforces id uniqueness and at most one active record per name.
    async fn create_data_key(&self, dek: &DataKey) -> Result<()>;

    /// Persists a new record, enlisted in the caller's transaction
    async fn create_data_key_in_session(
        &self,
        dek: &DataKey,
        session: &dyn StoreSession,
    ) -> Result<()>;

    /// Returns the record with the given id; `decrypted_data` is not
    /// populated
    async fn get_data_key(&self, id: &str) -> Result<DataKey>;

    /// Returns the active record for the given name
    async fn get_current_data_key(&self, name: &str) -> Result<DataKey>;

    /// Marks every data key inactive
    async fn disable_data_keys(&self) -> Result<()>;

    /// Rewraps every record under the current provider
    ///
    /// Records that fail are logged and skipped; the call fails if any
    /// record failed, retaining partial progress.
    async fn re_encrypt_data_keys(
        &self,
        providers: &ProviderMap,
        current_provider_id: &ProviderId,
    ) -> Result<()>;
}

/// Deferred scope selection for an encrypt operation
///
/// Invoked once per encrypt to name the data key partition.
pub type EncryptionOption = Arc<dyn Fn() -> String + Send + Sync>;

/// Scopes the operation to the given key partition
pub fn with_scope(scope: impl Into<String>) -> EncryptionOption {
    let scope = scope.into();
    Arc::new(move || scope.clone())
}

/// Uses the root scope shared by unscoped callers
pub fn without_scope() -> EncryptionOption {
    Arc::new(|| String::from("root"))
}
