//! Data key records and store implementations
//!
//! A [`DataKey`] is the persistent record of one data encryption key: the
//! wrapped key bytes, the provider that wrapped them, and the logical name
//! the key serves. Stores implement the [`crate::DataKeyStore`] trait.

mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

pub use memory::InMemoryDataKeyStore;

/// Persistent record of a data encryption key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataKey {
    /// Short opaque identifier, unique across all data keys
    pub id: String,

    /// Logical key name, `<scope>/<provider-id>`
    pub name: String,

    /// Id of the KMS provider that wrapped this key
    pub provider: ProviderId,

    /// Wrapped key bytes
    pub encrypted_data: Vec<u8>,

    /// Raw key bytes; populated in memory only, never persisted
    #[serde(skip)]
    pub decrypted_data: Vec<u8>,

    /// Whether this key is the active one for its name
    pub active: bool,

    /// The encryption-option scope the key was created for
    pub scope: String,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Last update timestamp
    pub updated: DateTime<Utc>,
}
