//! Order database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult, StoreTx};
use crate::models::{Order, OrderStatus};

const ORDER_COLUMNS: &str = "id, patient_name, ward, drug_id, dosage, schedule, total_doses, \
                             status, prescriber_id, created_at, updated_at";

impl Database {
    /// Get an order by ID.
    pub fn get_order(&self, order_id: &str) -> DbResult<Option<Order>> {
        self.stats.record();
        self.conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS),
                [order_id],
                OrderRow::read,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all orders written by a prescriber, newest first.
    pub fn list_orders_by_prescriber(&self, prescriber_id: &str) -> DbResult<Vec<Order>> {
        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM orders WHERE prescriber_id = ? ORDER BY rowid DESC",
            ORDER_COLUMNS
        ))?;
        let rows = stmt.query_map([prescriber_id], OrderRow::read)?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?.try_into()?);
        }
        Ok(orders)
    }

    /// List active orders, optionally restricted to one ward, oldest first.
    pub fn list_active_orders(&self, ward: Option<&str>) -> DbResult<Vec<Order>> {
        self.stats.record();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM orders
            WHERE status = 'active' AND (?1 IS NULL OR ward = ?1)
            ORDER BY ward, rowid
            "#,
            ORDER_COLUMNS
        ))?;
        let rows = stmt.query_map([ward], OrderRow::read)?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?.try_into()?);
        }
        Ok(orders)
    }
}

impl StoreTx<'_> {
    /// Insert a new order.
    pub fn insert_order(&self, order: &Order) -> DbResult<()> {
        self.stats.record();
        self.conn().execute(
            r#"
            INSERT INTO orders (
                id, patient_name, ward, drug_id, dosage, schedule, total_doses,
                status, prescriber_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                order.id,
                order.patient_name,
                order.ward,
                order.drug_id,
                order.dosage,
                order.schedule,
                order.total_doses,
                order.status.as_str(),
                order.prescriber_id,
                order.created_at,
                order.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Read an order row under the transaction's write lock.
    pub fn lock_order(&self, order_id: &str) -> DbResult<Option<Order>> {
        self.stats.record();
        self.conn()
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS),
                [order_id],
                OrderRow::read,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Move an active order to `status`.
    ///
    /// Fails with [`DbError::Constraint`] if the order is no longer active.
    pub fn transition_order(&self, order_id: &str, status: OrderStatus) -> DbResult<Order> {
        self.stats.record();
        let updated = self
            .conn()
            .query_row(
                &format!(
                    r#"
                    UPDATE orders
                    SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?1 AND status = 'active'
                    RETURNING {}
                    "#,
                    ORDER_COLUMNS
                ),
                params![order_id, status.as_str()],
                OrderRow::read,
            )
            .optional()?;

        match updated {
            Some(row) => row.try_into(),
            None => Err(DbError::Constraint(format!(
                "order {} is not active",
                order_id
            ))),
        }
    }
}

/// Intermediate row struct for database mapping.
struct OrderRow {
    id: String,
    patient_name: String,
    ward: String,
    drug_id: String,
    dosage: u32,
    schedule: String,
    total_doses: Option<u32>,
    status: String,
    prescriber_id: String,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OrderRow {
            id: row.get(0)?,
            patient_name: row.get(1)?,
            ward: row.get(2)?,
            drug_id: row.get(3)?,
            dosage: row.get(4)?,
            schedule: row.get(5)?,
            total_doses: row.get(6)?,
            status: row.get(7)?,
            prescriber_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = DbError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown order status: {}", row.status)))?;

        Ok(Order {
            id: row.id,
            patient_name: row.patient_name,
            ward: row.ward,
            drug_id: row.drug_id,
            dosage: row.dosage,
            schedule: row.schedule,
            total_doses: row.total_doses,
            status,
            prescriber_id: row.prescriber_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
