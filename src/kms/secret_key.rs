use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::{Aead, KmsProvider};

/// KMS provider that wraps data keys under the master secret key
///
/// This is the embedded provider a deployment starts with before any
/// external KMS is configured: data keys are wrapped with the symmetric
/// cipher, keyed by the configured secret key.
pub struct SecretKeyProvider {
    secret_key: String,
    enc: Arc<dyn Aead>,
}

impl SecretKeyProvider {
    /// Creates a provider wrapping keys under the given secret key
    pub fn new(enc: Arc<dyn Aead>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            enc,
        }
    }
}

impl fmt::Debug for SecretKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl KmsProvider for SecretKeyProvider {
    async fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>> {
        self.enc.encrypt(raw, self.secret_key.as_bytes())
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.enc.decrypt(wrapped, self.secret_key.as_bytes())
    }
}
