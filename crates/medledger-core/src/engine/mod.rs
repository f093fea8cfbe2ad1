//! Transaction engine and read models.
//!
//! [`Engine`] owns the connection pool and the read cache. Write operations
//! live in `transactions`, read models in `read_model`; both authorize the
//! caller before touching the store.

mod read_model;
mod transactions;

use std::sync::Arc;

use crate::cache::{CacheStore, InMemoryCache, ReadCache};
use crate::config::EngineConfig;
use crate::db::{ConnectionPool, PooledConnection, StoreStats};
use crate::error::EngineResult;

pub struct Engine {
    pool: ConnectionPool,
    cache: ReadCache,
    config: EngineConfig,
}

impl Engine {
    /// Open an engine with the process-local cache.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        Self::with_cache_store(config, Arc::new(InMemoryCache::new()))
    }

    /// Open an engine backed by a caller-supplied cache store.
    pub fn with_cache_store(config: EngineConfig, store: Arc<dyn CacheStore>) -> EngineResult<Self> {
        let pool = ConnectionPool::open(&config.database.pool_options())?;
        tracing::info!(
            path = %config.database.path,
            pool_size = pool.size(),
            "engine opened"
        );
        Ok(Self {
            pool,
            cache: ReadCache::new(store),
            config,
        })
    }

    /// Throwaway engine over an in-memory store.
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::open(EngineConfig::in_memory())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statement counter shared by every pooled connection.
    pub fn stats(&self) -> &StoreStats {
        self.pool.stats()
    }

    /// Drop every cached aggregate.
    pub fn flush_cache(&self) {
        self.cache.flush();
    }

    fn connection(&self) -> EngineResult<PooledConnection<'_>> {
        Ok(self.pool.get()?)
    }
}

/// Log a failed operation at the level its error class calls for.
fn logged<T>(operation: &'static str, result: EngineResult<T>) -> EngineResult<T> {
    if let Err(err) = &result {
        err.log(operation);
    }
    result
}
