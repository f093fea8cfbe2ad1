//! Database layer for medledger.
//!
//! Reads go through [`Database`]; every mutation goes through a [`StoreTx`]
//! opened with [`Database::begin_write`], which takes the store's write lock
//! up front so that no read-then-write happens without it.

mod schema;
mod pool;
mod drugs;
mod orders;
mod administrations;
mod transfers;
mod idempotency;

pub use schema::*;
pub use pool::*;
#[allow(unused_imports)]
pub use drugs::*;
#[allow(unused_imports)]
pub use orders::*;
pub use idempotency::*;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Insufficient stock for drug {drug_id}: requested {requested}, available {available}")]
    InsufficientStock {
        drug_id: String,
        requested: u32,
        available: u32,
    },

    #[error("No connection available after {0:?}")]
    PoolTimeout(Duration),
}

impl DbError {
    /// The store gave up waiting for a lock held by another transaction.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// The underlying file or connection is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase)
        )
    }

    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e.code),
            _ => None,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Counts statements sent to the store.
///
/// Shared by every connection of a pool so that read-model query bounds can
/// be observed from outside.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    statements: Arc<AtomicU64>,
}

impl StoreStats {
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.statements.store(0, Ordering::SeqCst);
    }

    pub(crate) fn record(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    stats: StoreStats,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with(path, Duration::from_secs(5), StoreStats::default())
    }

    /// Open database at path with a lock-wait timeout and shared stats.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        busy_timeout: Duration,
        stats: StoreStats,
    ) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn, stats };
        db.initialize(busy_timeout)?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_in_memory_with(StoreStats::default())
    }

    pub fn open_in_memory_with(stats: StoreStats) -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, stats };
        db.initialize(Duration::from_secs(5))?;
        Ok(db)
    }

    /// Apply connection settings and initialize schema.
    fn initialize(&self, busy_timeout: Duration) -> DbResult<()> {
        self.conn.busy_timeout(busy_timeout)?;
        self.conn.pragma_update(None, "foreign_keys", true)?;
        // In-memory databases answer "memory"; either way the mode is settled.
        let _mode: String =
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Run several reads against one consistent snapshot.
    ///
    /// The snapshot bounds are not counted in [`StoreStats`].
    pub fn read_snapshot<T, E>(&self, read: impl FnOnce(&Database) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN DEFERRED")
            .map_err(DbError::from)?;
        match read(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback, "read snapshot rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Begin a write transaction holding the store's write lock.
    ///
    /// Blocks up to the busy timeout while another writer holds the lock.
    pub fn begin_write(&mut self) -> DbResult<StoreTx<'_>> {
        self.stats.record();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTx {
            tx,
            stats: self.stats.clone(),
        })
    }
}

/// An open write transaction.
///
/// Dropping it without calling [`StoreTx::commit`] rolls back.
pub struct StoreTx<'a> {
    tx: rusqlite::Transaction<'a>,
    stats: StoreStats,
}

impl StoreTx<'_> {
    pub fn commit(self) -> DbResult<()> {
        self.stats.record();
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> DbResult<()> {
        self.stats.record();
        self.tx.rollback()?;
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.tx
    }
}

/// Bind a set of ids as a single JSON array parameter for `json_each`.
pub(crate) fn id_set_param(ids: &[String]) -> DbResult<String> {
    Ok(serde_json::to_string(ids)?)
}
