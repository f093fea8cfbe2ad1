//! Stock movement models: ward transfers and stock receipts.

use serde::{Deserialize, Serialize};

use super::now_timestamp;

/// A request to move stock from one ward to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRequest {
    pub drug_id: String,
    pub source_ward: String,
    pub destination_ward: String,
    pub quantity: u32,
}

impl TransferRequest {
    pub fn new(
        drug_id: impl Into<String>,
        source_ward: impl Into<String>,
        destination_ward: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            drug_id: drug_id.into(),
            source_ward: source_ward.into(),
            destination_ward: destination_ward.into(),
            quantity,
        }
    }
}

/// Append-only record of a ward-to-ward movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    pub id: String,
    pub drug_id: String,
    pub source_ward: String,
    pub destination_ward: String,
    pub quantity: u32,
    pub initiator_id: String,
    pub transferred_at: String,
}

impl TransferRecord {
    pub fn new(request: &TransferRequest, initiator_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            drug_id: request.drug_id.clone(),
            source_ward: request.source_ward.clone(),
            destination_ward: request.destination_ward.clone(),
            quantity: request.quantity,
            initiator_id,
            transferred_at: now_timestamp(),
        }
    }
}

/// Append-only record of stock entering the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockReceipt {
    pub id: String,
    pub drug_id: String,
    pub quantity: u32,
    pub received_by: String,
    pub received_at: String,
}

impl StockReceipt {
    pub fn new(drug_id: String, quantity: u32, received_by: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            drug_id,
            quantity,
            received_by,
            received_at: now_timestamp(),
        }
    }
}
