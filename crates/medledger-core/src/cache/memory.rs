use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::CacheStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache backed by a concurrent map.
///
/// Expired entries are dropped lazily on lookup; there is no size bound.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for InMemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        // The read guard is released above; removing under it would deadlock.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn flush(&self) {
        self.entries.clear();
    }
}
