//! Time-bounded in-memory cache for decrypted data keys
//!
//! Maps data key ids to their raw key bytes so the decrypt path can skip the
//! store and KMS round-trip for recently used keys. Entries expire after a
//! fixed TTL; the background loop sweeps expired entries periodically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use zeroize::Zeroize;

struct CacheEntry {
    data_key: Vec<u8>,
    expires: Instant,
}

/// TTL-bounded map of data key id to raw key bytes
///
/// All operations take a single short-lived mutex; the cache never blocks
/// callers for the duration of a sweep beyond that critical section.
pub struct DataKeyCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DataKeyCache {
    /// Creates an empty cache with the given time-to-live
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Inserts or overwrites an entry, stamping its expiry
    pub fn add(&self, id: &str, data_key: &[u8]) {
        let entry = CacheEntry {
            data_key: data_key.to_vec(),
            expires: Instant::now() + self.ttl,
        };

        let mut entries = self.entries.lock().unwrap();
        if let Some(mut old) = entries.insert(id.to_string(), entry) {
            old.data_key.zeroize();
        }
    }

    /// Returns the raw key bytes iff the entry exists and is unexpired
    ///
    /// Expired entries are reported as absent; removal is left to the
    /// periodic sweep.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(id)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.data_key.clone())
    }

    /// Drops all expired entries, wiping their key bytes
    pub fn remove_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| {
            let keep = entry.expires > now;
            if !keep {
                entry.data_key.zeroize();
            }
            keep
        });
    }

    /// Drops all entries, wiping their key bytes
    pub fn flush(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            entry.data_key.zeroize();
        }
        entries.clear();
    }

    /// Number of resident entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns true if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
