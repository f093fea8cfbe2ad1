//! Administration audit trail (append-only).

use std::collections::HashMap;

use rusqlite::{params, Row};

use super::{id_set_param, Database, DbResult, StoreTx};
use crate::models::AdministrationRecord;

const ADMINISTRATION_COLUMNS: &str =
    "id, order_id, drug_id, quantity, administrator_id, administered_at";

fn read_administration(row: &Row<'_>) -> rusqlite::Result<AdministrationRecord> {
    Ok(AdministrationRecord {
        id: row.get(0)?,
        order_id: row.get(1)?,
        drug_id: row.get(2)?,
        quantity: row.get(3)?,
        administrator_id: row.get(4)?,
        administered_at: row.get(5)?,
    })
}

impl Database {
    /// Administration history of one order, oldest first.
    pub fn list_administrations_for_order(
        &self,
        order_id: &str,
    ) -> DbResult<Vec<AdministrationRecord>> {
        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM administrations WHERE order_id = ? ORDER BY rowid",
            ADMINISTRATION_COLUMNS
        ))?;
        let rows = stmt.query_map([order_id], read_administration)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Administration histories for a set of orders with one statement,
    /// grouped by order id. Orders without administrations are absent.
    pub fn administrations_by_order_ids(
        &self,
        order_ids: &[String],
    ) -> DbResult<HashMap<String, Vec<AdministrationRecord>>> {
        let mut grouped: HashMap<String, Vec<AdministrationRecord>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(grouped);
        }

        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM administrations
            WHERE order_id IN (SELECT value FROM json_each(?1))
            ORDER BY rowid
            "#,
            ADMINISTRATION_COLUMNS
        ))?;
        let rows = stmt.query_map([id_set_param(order_ids)?], read_administration)?;
        for row in rows {
            let record = row?;
            grouped
                .entry(record.order_id.clone())
                .or_default()
                .push(record);
        }
        Ok(grouped)
    }
}

impl StoreTx<'_> {
    /// Append an administration record.
    pub fn insert_administration(&self, record: &AdministrationRecord) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO administrations (
                id, order_id, drug_id, quantity, administrator_id, administered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.order_id,
                record.drug_id,
                record.quantity,
                record.administrator_id,
                record.administered_at,
            ],
        )?;
        Ok(())
    }

    /// Number of administrations recorded against an order.
    pub fn count_administrations(&self, order_id: &str) -> DbResult<u32> {
        self.stats.record();
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM administrations WHERE order_id = ?",
            [order_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetch an administration recorded earlier (idempotent replay).
    pub fn get_administration(&self, id: &str) -> DbResult<Option<AdministrationRecord>> {
        use rusqlite::OptionalExtension;

        self.stats.record();
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM administrations WHERE id = ?",
                    ADMINISTRATION_COLUMNS
                ),
                [id],
                read_administration,
            )
            .optional()
            .map_err(Into::into)
    }
}
