//! Cache-aside layer for read aggregates.
//!
//! Values are stored as JSON so any [`CacheStore`] backend can hold them.
//! [`ReadCache`] guards population with an invalidation epoch: a load that
//! began before an invalidation is not written back after it.

mod memory;

pub use memory::InMemoryCache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Cache keys for the aggregates the engine caches.
pub mod keys {
    pub const FORMULARY: &str = "formulary";
    pub const INVENTORY: &str = "inventory:all";
    const MAR_ALL: &str = "mar:all";

    /// MAR key for a ward, or the hospital-wide MAR for `None`.
    pub fn mar(ward: Option<&str>) -> String {
        match ward {
            Some(ward) => format!("mar:ward:{}", ward),
            None => MAR_ALL.to_string(),
        }
    }
}

/// Pluggable key/value store with per-entry TTL.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String, ttl: Duration);
    fn invalidate(&self, key: &str);
    /// Drop every entry.
    fn flush(&self);
}

pub struct ReadCache {
    store: Arc<dyn CacheStore>,
    epoch: AtomicU64,
    // Serializes epoch checks on populate with epoch bumps on invalidate.
    gate: Mutex<()>,
}

impl ReadCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            epoch: AtomicU64::new(0),
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the cached value for `key`, or compute it with `load` and
    /// populate the cache.
    pub fn get_or_load<T, E, F>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(raw) = self.store.get(key) {
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::trace!(key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                    self.store.invalidate(key);
                }
            }
        }

        tracing::trace!(key, "cache miss");
        let started = self.epoch.load(Ordering::SeqCst);
        let value = load()?;
        self.populate(key, &value, ttl, started);
        Ok(value)
    }

    fn populate<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, started: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache value not serializable");
                return;
            }
        };

        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if self.epoch.load(Ordering::SeqCst) != started {
            tracing::debug!(key, "skipping populate after concurrent invalidation");
            return;
        }
        self.store.put(key, raw, ttl);
    }

    /// Drop `keys` and fence off any load already in flight.
    pub fn invalidate(&self, keys: &[&str]) {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for key in keys {
            self.store.invalidate(key);
        }
        tracing::debug!(?keys, "cache invalidated");
    }

    pub fn flush(&self) {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.flush();
    }
}
