//! Idempotency keys for retried writes.
//!
//! A key is recorded in the same transaction as the write it guards, so a
//! failed attempt never leaves a key behind.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{DbResult, StoreTx};
use crate::models::now_timestamp;

/// A previously recorded idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub fingerprint: String,
    pub result_id: String,
    pub created_at: String,
}

impl IdempotencyRecord {
    /// Whether a retry carrying `fingerprint` is the same request.
    pub fn matches(&self, operation: &str, fingerprint: &str) -> bool {
        self.operation == operation && self.fingerprint == fingerprint
    }
}

/// SHA-256 hex digest of the operation name and its canonical JSON request.
pub fn fingerprint<T: Serialize>(operation: &str, request: &T) -> DbResult<String> {
    let payload = serde_json::to_string(request)?;
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

impl StoreTx<'_> {
    pub fn find_idempotency_key(&self, key: &str) -> DbResult<Option<IdempotencyRecord>> {
        self.stats.record();
        self.conn()
            .query_row(
                r#"
                SELECT key, operation, fingerprint, result_id, created_at
                FROM idempotency_keys WHERE key = ?
                "#,
                [key],
                |row| {
                    Ok(IdempotencyRecord {
                        key: row.get(0)?,
                        operation: row.get(1)?,
                        fingerprint: row.get(2)?,
                        result_id: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn record_idempotency_key(
        &self,
        key: &str,
        operation: &str,
        fingerprint: &str,
        result_id: &str,
    ) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO idempotency_keys (key, operation, fingerprint, result_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![key, operation, fingerprint, result_id, now_timestamp()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("administer_dose", &("order-1", "nurse-1")).unwrap();
        let b = fingerprint("administer_dose", &("order-1", "nurse-1")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_operation_and_payload() {
        let base = fingerprint("administer_dose", &("order-1",)).unwrap();
        assert_ne!(base, fingerprint("transfer_stock", &("order-1",)).unwrap());
        assert_ne!(base, fingerprint("administer_dose", &("order-2",)).unwrap());
    }

    #[test]
    fn test_record_and_find() {
        let mut db = Database::open_in_memory().unwrap();
        let tx = db.begin_write().unwrap();
        assert!(tx.find_idempotency_key("k1").unwrap().is_none());
        tx.record_idempotency_key("k1", "administer_dose", "abc", "adm-1")
            .unwrap();
        tx.commit().unwrap();

        let tx = db.begin_write().unwrap();
        let found = tx.find_idempotency_key("k1").unwrap().unwrap();
        assert_eq!(found.result_id, "adm-1");
        assert!(found.matches("administer_dose", "abc"));
        assert!(!found.matches("administer_dose", "xyz"));
        assert!(!found.matches("transfer_stock", "abc"));
    }

    #[test]
    fn test_key_discarded_with_rolled_back_write() {
        let mut db = Database::open_in_memory().unwrap();
        let tx = db.begin_write().unwrap();
        tx.record_idempotency_key("k1", "transfer_stock", "abc", "t-1")
            .unwrap();
        tx.rollback().unwrap();

        let tx = db.begin_write().unwrap();
        assert!(tx.find_idempotency_key("k1").unwrap().is_none());
    }
}
