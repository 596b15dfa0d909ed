//! Bounded, TTL-limited embedding cache.
//!
//! Keys are the SHA-256 of the sanitised input text. The cache is an
//! optimisation only: clearing it never changes results.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

struct Entry {
    vector: Vec<f32>,
    inserted: Instant,
}

pub struct EmbeddingCache {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl EmbeddingCache {
    /// A cache holding at most `max_entries` vectors for `ttl` each.
    /// `max_entries == 0` disables caching.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(text: &str) -> String {
        format!("{:x}", Sha256::digest(text.as_bytes()))
    }

    /// Returns the cached vector for `text`; an expired entry is removed.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        let mut entries = self.entries.lock();
        let fresh = entries.get(&key)?.inserted.elapsed() < self.ttl;
        if fresh {
            entries.get(&key).map(|e| e.vector.clone())
        } else {
            entries.remove(&key);
            None
        }
    }

    /// Stores `vector` for `text`. A full cache first drops expired entries,
    /// then the oldest entry if still full.
    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        let key = Self::key(text);
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                vector,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
