use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit},
    Aes256Gcm, Key as AesKey, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::util::fill_random;
use crate::Aead;

// Constants for GCM mode
const GCM_BLOCK_SIZE: usize = 16;
pub(crate) const GCM_NONCE_SIZE: usize = 12;
pub(crate) const GCM_TAG_SIZE: usize = 16;

// Maximum message size supported by GCM
// ((1 << 32) - 2) * GCM_BLOCK_SIZE
pub(crate) const GCM_MAX_DATA_SIZE: usize = ((1 << 32) - 2) * GCM_BLOCK_SIZE;

/// Size of the per-blob key derivation salt
pub(crate) const SALT_SIZE: usize = 8;

/// Size of the derived AES-256 key
const DERIVED_KEY_SIZE: usize = 32;

/// AES-256-GCM implementation of the symmetric cipher contract
///
/// Key material of any length is accepted: each blob carries a random salt,
/// and the AES key is derived per blob with HKDF-SHA256. The same cipher
/// therefore serves 16-byte data keys, the master secret key, and legacy
/// payloads.
///
/// Blob layout: `salt (8) || nonce (12) || ciphertext + tag`.
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    /// Creates a new instance of the AES-256-GCM cipher
    pub fn new() -> Self {
        Self
    }
}

fn derive_key(key_material: &[u8], salt: &[u8]) -> Result<[u8; DERIVED_KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), key_material);

    let mut derived = [0_u8; DERIVED_KEY_SIZE];
    hkdf.expand(&[], &mut derived)
        .map_err(|e| Error::Cipher(format!("key derivation failed: {}", e)))?;

    Ok(derived)
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Cipher("data too large for GCM".into()));
        }

        // Calculate the output size
        let size = SALT_SIZE + GCM_NONCE_SIZE + data.len() + GCM_TAG_SIZE;

        // Create buffer for salt + nonce + encrypted data
        let mut blob = vec![0_u8; size];

        // Fill the salt and nonce areas with random bytes
        fill_random(&mut blob[..SALT_SIZE + GCM_NONCE_SIZE]);

        let derived = derive_key(key, &blob[..SALT_SIZE])?;
        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&derived));

        let nonce = Nonce::from_slice(&blob[SALT_SIZE..SALT_SIZE + GCM_NONCE_SIZE]);

        // Encrypt the data
        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|e| Error::Cipher(format!("encryption failed: {}", e)))?;

        // Copy the ciphertext (which includes the tag) after the nonce
        blob[SALT_SIZE + GCM_NONCE_SIZE..].copy_from_slice(&ciphertext);

        Ok(blob)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() < SALT_SIZE + GCM_NONCE_SIZE + GCM_TAG_SIZE {
            // Must have at least salt, nonce and tag
            return Err(Error::Cipher(
                "data length is too short for GCM (salt + nonce + tag)".into(),
            ));
        }

        let derived = derive_key(key, &data[..SALT_SIZE])?;
        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&derived));

        let nonce = Nonce::from_slice(&data[SALT_SIZE..SALT_SIZE + GCM_NONCE_SIZE]);

        // Decrypt the data; failure covers tag mismatch and wrong key alike
        let plaintext = cipher
            .decrypt(nonce, &data[SALT_SIZE + GCM_NONCE_SIZE..])
            .map_err(|_| Error::Cipher("decryption failed".into()))?;

        Ok(plaintext)
    }
}
