use std::fmt;

use thiserror::Error;

use crate::provider::ProviderId;

/// Result type for secrets management operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the envelope encryption core
#[derive(Error, Debug)]
pub enum Error {
    /// Decrypt was called with a zero-length payload
    #[error("unable to decrypt empty payload")]
    EmptyPayload,

    /// The envelope frame is missing its closing delimiter or carries an
    /// undecodable key id
    #[error("could not find valid key id in encrypted payload")]
    MalformedFrame,

    /// No matching data key exists in the store
    #[error("data key not found")]
    DataKeyNotFound,

    /// A data key references a KMS provider that is not registered
    #[error("could not find encryption provider '{0}'")]
    ProviderNotConfigured(ProviderId),

    /// A provider identifier does not follow the `<kind>.<version>` form
    #[error("malformed provider identifier '{0}'")]
    InvalidProviderId(String),

    /// A KMS wrap or unwrap call failed
    #[error("key management service '{provider}' failed: {msg}")]
    Kms { provider: ProviderId, msg: String },

    /// The symmetric cipher failed (authentication tag mismatch, bad input)
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Errors related to data key persistence
    #[error("data key store error: {0}")]
    Store(String),

    /// The operation was interrupted by cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// General internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps a provider failure, tagging it with the provider id
    pub(crate) fn kms(provider: &ProviderId, err: impl fmt::Display) -> Self {
        Error::Kms {
            provider: provider.clone(),
            msg: err.to_string(),
        }
    }
}
