//! Append-only administration events.

use serde::{Deserialize, Serialize};

use super::now_timestamp;

/// One dose given against one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdministrationRecord {
    pub id: String,
    pub order_id: String,
    pub drug_id: String,
    /// Units drawn from stock
    pub quantity: u32,
    pub administrator_id: String,
    pub administered_at: String,
}

impl AdministrationRecord {
    pub fn new(order_id: String, drug_id: String, quantity: u32, administrator_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id,
            drug_id,
            quantity,
            administrator_id,
            administered_at: now_timestamp(),
        }
    }
}
