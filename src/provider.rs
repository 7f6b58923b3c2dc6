//! KMS provider identity
//!
//! Providers are addressed by a canonical `<kind>.<version>` identifier,
//! e.g. `secretKey.v1` or `awsKms.v1`. The registry and all persisted
//! `DataKey` records use the normalized form.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::KmsProvider;

/// Identifier of a configured KMS provider instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Creates a provider id from its string form
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }

    /// Folds legacy aliases to canonical form
    ///
    /// An id without a version segment gets `.v1` appended, so `secretKey`
    /// normalizes to `secretKey.v1`. Canonical ids are returned unchanged.
    pub fn normalize(&self) -> ProviderId {
        if self.0.contains('.') {
            self.clone()
        } else {
            ProviderId(format!("{}.v1", self.0))
        }
    }

    /// Returns the provider kind, the segment before the first dot
    pub fn kind(&self) -> Result<&str> {
        match self.0.split_once('.') {
            Some((kind, _)) if !kind.is_empty() => Ok(kind),
            _ => Err(Error::InvalidProviderId(self.0.clone())),
        }
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        ProviderId(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        ProviderId(id)
    }
}

/// Registry of configured KMS providers, keyed by normalized id
pub type ProviderMap = HashMap<ProviderId, Arc<dyn KmsProvider>>;

/// Builds the logical data key name for a scope under the given provider
pub fn key_name(scope: &str, provider: &ProviderId) -> String {
    format!("{}/{}", scope, provider)
}
