//! Cryptographic implementations for the secrets management core

mod aes256gcm;

pub use aes256gcm::Aes256GcmAead;
