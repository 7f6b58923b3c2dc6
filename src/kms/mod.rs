//! KMS provider implementations
//!
//! The built-in provider derives its wrapping key from the configured master
//! secret key. Cloud KMS drivers plug in through the
//! [`crate::KmsProvider`] trait and are registered in the provider map under
//! their normalized id.

mod secret_key;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DEFAULT_PROVIDER_ID;
use crate::provider::{ProviderId, ProviderMap};
use crate::Aead;

pub use secret_key::SecretKeyProvider;

/// Builds the default provider registry: a single master-key-derived
/// provider under [`DEFAULT_PROVIDER_ID`]
pub fn default_providers(enc: Arc<dyn Aead>, secret_key: impl Into<String>) -> ProviderMap {
    let mut providers: ProviderMap = HashMap::new();
    providers.insert(
        ProviderId::from(DEFAULT_PROVIDER_ID),
        Arc::new(SecretKeyProvider::new(enc, secret_key)),
    );
    providers
}
