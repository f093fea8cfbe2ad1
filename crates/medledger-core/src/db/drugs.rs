//! Stock ledger operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{id_set_param, Database, DbError, DbResult, StoreTx};
use crate::models::{Drug, StockReceipt};

const DRUG_COLUMNS: &str =
    "id, name, form, strength, current_stock, low_stock_threshold, active, created_at";

fn read_drug(row: &Row<'_>) -> rusqlite::Result<Drug> {
    Ok(Drug {
        id: row.get(0)?,
        name: row.get(1)?,
        form: row.get(2)?,
        strength: row.get(3)?,
        current_stock: row.get(4)?,
        low_stock_threshold: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Database {
    /// Get a drug by ID.
    pub fn get_drug(&self, drug_id: &str) -> DbResult<Option<Drug>> {
        self.stats.record();
        self.conn
            .query_row(
                &format!("SELECT {} FROM drugs WHERE id = ?", DRUG_COLUMNS),
                [drug_id],
                read_drug,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List drugs ordered by name.
    pub fn list_drugs(&self, active_only: bool) -> DbResult<Vec<Drug>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM drugs WHERE active = 1 ORDER BY name, id",
                DRUG_COLUMNS
            )
        } else {
            format!("SELECT {} FROM drugs ORDER BY name, id", DRUG_COLUMNS)
        };

        self.stats.record();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_drug)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Fetch every drug whose id is in `ids` with one statement.
    pub fn get_drugs_by_ids(&self, ids: &[String]) -> DbResult<Vec<Drug>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM drugs WHERE id IN (SELECT value FROM json_each(?1))",
            DRUG_COLUMNS
        ))?;
        let rows = stmt.query_map([id_set_param(ids)?], read_drug)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// List stock receipts for a drug, oldest first.
    pub fn list_receipts_for_drug(&self, drug_id: &str) -> DbResult<Vec<StockReceipt>> {
        self.stats.record();
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, drug_id, quantity, received_by, received_at
            FROM stock_receipts
            WHERE drug_id = ?
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([drug_id], |row| {
            Ok(StockReceipt {
                id: row.get(0)?,
                drug_id: row.get(1)?,
                quantity: row.get(2)?,
                received_by: row.get(3)?,
                received_at: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl StoreTx<'_> {
    /// Insert a new formulary entry.
    pub fn insert_drug(&self, drug: &Drug) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO drugs (
                id, name, form, strength, current_stock,
                low_stock_threshold, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                drug.id,
                drug.name,
                drug.form,
                drug.strength,
                drug.current_stock,
                drug.low_stock_threshold,
                drug.active,
                drug.created_at,
            ],
        )?;
        Ok(())
    }

    /// Read a drug row under the transaction's write lock.
    pub fn lock_drug(&self, drug_id: &str) -> DbResult<Option<Drug>> {
        self.stats.record();
        self.conn()
            .query_row(
                &format!("SELECT {} FROM drugs WHERE id = ?", DRUG_COLUMNS),
                [drug_id],
                read_drug,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Draw `quantity` units from stock.
    ///
    /// The update is conditional on sufficient stock, so the balance cannot
    /// go below zero even if a caller skipped the precondition check.
    pub fn decrement_stock(&self, drug_id: &str, quantity: u32) -> DbResult<Drug> {
        self.stats.record();
        let updated = self
            .conn()
            .query_row(
                &format!(
                    r#"
                    UPDATE drugs
                    SET current_stock = current_stock - ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?1 AND current_stock >= ?2
                    RETURNING {}
                    "#,
                    DRUG_COLUMNS
                ),
                params![drug_id, quantity],
                read_drug,
            )
            .optional()?;

        match updated {
            Some(drug) => Ok(drug),
            None => match self.lock_drug(drug_id)? {
                Some(drug) => Err(DbError::InsufficientStock {
                    drug_id: drug_id.to_string(),
                    requested: quantity,
                    available: drug.current_stock,
                }),
                None => Err(DbError::NotFound(format!("drug {}", drug_id))),
            },
        }
    }

    /// Add `quantity` units to stock.
    pub fn increment_stock(&self, drug_id: &str, quantity: u32) -> DbResult<Drug> {
        self.stats.record();
        self.conn()
            .query_row(
                &format!(
                    r#"
                    UPDATE drugs
                    SET current_stock = current_stock + ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?1
                    RETURNING {}
                    "#,
                    DRUG_COLUMNS
                ),
                params![drug_id, quantity],
                read_drug,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("drug {}", drug_id)))
    }

    /// Set whether a drug is on the formulary.
    pub fn set_drug_active(&self, drug_id: &str, active: bool) -> DbResult<Drug> {
        self.stats.record();
        self.conn()
            .query_row(
                &format!(
                    r#"
                    UPDATE drugs
                    SET active = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?1
                    RETURNING {}
                    "#,
                    DRUG_COLUMNS
                ),
                params![drug_id, active],
                read_drug,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("drug {}", drug_id)))
    }

    /// Append a stock receipt.
    pub fn insert_receipt(&self, receipt: &StockReceipt) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO stock_receipts (id, drug_id, quantity, received_by, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                receipt.id,
                receipt.drug_id,
                receipt.quantity,
                receipt.received_by,
                receipt.received_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_receipt(&self, id: &str) -> DbResult<Option<StockReceipt>> {
        self.stats.record();
        self.conn()
            .query_row(
                "SELECT id, drug_id, quantity, received_by, received_at FROM stock_receipts WHERE id = ?",
                [id],
                |row| {
                    Ok(StockReceipt {
                        id: row.get(0)?,
                        drug_id: row.get(1)?,
                        quantity: row.get(2)?,
                        received_by: row.get(3)?,
                        received_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}
