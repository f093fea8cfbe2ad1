//! Bounded connection pool.
//!
//! Idle connections sit in a bounded channel; checkout waits on the channel
//! up to the configured timeout and the guard returns the connection on drop.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::{Database, DbError, DbResult, StoreStats};

/// Where the pool's connections point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    /// `":memory:"` selects an in-memory store, anything else is a file path.
    pub fn parse(path: &str) -> Self {
        if path == ":memory:" {
            StoreLocation::InMemory
        } else {
            StoreLocation::File(PathBuf::from(path))
        }
    }
}

/// Settings for building a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub location: StoreLocation,
    pub size: usize,
    pub busy_timeout: Duration,
    pub checkout_timeout: Duration,
}

pub struct ConnectionPool {
    idle_tx: Sender<Database>,
    idle_rx: Receiver<Database>,
    size: usize,
    checkout_timeout: Duration,
    stats: StoreStats,
}

impl ConnectionPool {
    pub fn open(options: &PoolOptions) -> DbResult<Self> {
        // Every in-memory connection is its own database.
        let size = match options.location {
            StoreLocation::InMemory => 1,
            StoreLocation::File(_) => options.size.max(1),
        };
        if size != options.size {
            tracing::warn!(
                requested = options.size,
                effective = size,
                "connection pool size adjusted"
            );
        }

        let stats = StoreStats::default();
        let (idle_tx, idle_rx) = bounded(size);
        for _ in 0..size {
            let db = match &options.location {
                StoreLocation::File(path) => {
                    Database::open_with(path, options.busy_timeout, stats.clone())?
                }
                StoreLocation::InMemory => Database::open_in_memory_with(stats.clone())?,
            };
            // Capacity equals size, so this never blocks.
            let _ = idle_tx.send(db);
        }

        tracing::debug!(size, location = ?options.location, "connection pool opened");

        Ok(Self {
            idle_tx,
            idle_rx,
            size,
            checkout_timeout: options.checkout_timeout,
            stats,
        })
    }

    /// Check out a connection, waiting up to the checkout timeout.
    pub fn get(&self) -> DbResult<PooledConnection<'_>> {
        match self.idle_rx.recv_timeout(self.checkout_timeout) {
            Ok(db) => Ok(PooledConnection {
                db: Some(db),
                pool: self,
            }),
            Err(RecvTimeoutError::Timeout) => Err(DbError::PoolTimeout(self.checkout_timeout)),
            // The pool holds its own sender, so the channel cannot disconnect
            // while `self` is alive.
            Err(RecvTimeoutError::Disconnected) => Err(DbError::PoolTimeout(Duration::ZERO)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently idle.
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledConnection<'p> {
    db: Option<Database>,
    pool: &'p ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.db.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Database {
        self.db.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            let _ = self.pool.idle_tx.send(db);
        }
    }
}
