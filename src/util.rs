//! Utility functions for the secrets management core

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Length of generated data key identifiers
const SHORT_UID_LENGTH: usize = 12;

/// Fills a buffer with cryptographically secure random bytes
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generates a random byte array of the specified size
pub fn get_rand_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0_u8; size];
    fill_random(&mut bytes);
    bytes
}

/// Generates a short random alphanumeric identifier for data key records
pub fn generate_short_uid() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SHORT_UID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_rand_bytes_len() {
        assert_eq!(get_rand_bytes(16).len(), 16);
    }

    #[test]
    fn test_short_uid_shape() {
        let uid = generate_short_uid();
        assert_eq!(uid.len(), SHORT_UID_LENGTH);
        assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(uid, generate_short_uid());
    }
}
