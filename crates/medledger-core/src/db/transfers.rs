//! Ward transfer log (append-only).

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult, StoreTx};
use crate::models::TransferRecord;

const TRANSFER_COLUMNS: &str =
    "id, drug_id, source_ward, destination_ward, quantity, initiator_id, transferred_at";

fn read_transfer(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        id: row.get(0)?,
        drug_id: row.get(1)?,
        source_ward: row.get(2)?,
        destination_ward: row.get(3)?,
        quantity: row.get(4)?,
        initiator_id: row.get(5)?,
        transferred_at: row.get(6)?,
    })
}

impl Database {
    /// Transfers of one drug, oldest first.
    pub fn list_transfers_for_drug(&self, drug_id: &str) -> DbResult<Vec<TransferRecord>> {
        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transfers WHERE drug_id = ? ORDER BY rowid",
            TRANSFER_COLUMNS
        ))?;
        let rows = stmt.query_map([drug_id], read_transfer)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl StoreTx<'_> {
    pub fn insert_transfer(&self, record: &TransferRecord) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO transfers (
                id, drug_id, source_ward, destination_ward,
                quantity, initiator_id, transferred_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id,
                record.drug_id,
                record.source_ward,
                record.destination_ward,
                record.quantity,
                record.initiator_id,
                record.transferred_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_transfer(&self, id: &str) -> DbResult<Option<TransferRecord>> {
        self.stats.record();
        self.conn()
            .query_row(
                &format!("SELECT {} FROM transfers WHERE id = ?", TRANSFER_COLUMNS),
                [id],
                read_transfer,
            )
            .optional()
            .map_err(Into::into)
    }
}
