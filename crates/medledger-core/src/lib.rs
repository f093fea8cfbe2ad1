//! MedLedger Core Library
//!
//! Transactional medication inventory for hospital wards: prescribed orders,
//! dose administration and ward transfers stay consistent with stock levels
//! under concurrent access.
//!
//! # Architecture
//!
//! ```text
//! caller ─▶ authorize ─▶ begin IMMEDIATE ─▶ lock order/drug ─▶ validate
//!                                                                 │
//!                                     ┌───────────────────────────▼──────┐
//!                                     │ decrement stock + append record  │
//!                                     │ (administration / transfer)      │
//!                                     └───────────────────────────┬──────┘
//!                                                                 │
//!                                                  commit ─▶ invalidate cache
//!
//! reader ─▶ cache ─(miss)─▶ parents query ─▶ one batch query per relation
//! ```
//!
//! # Core Principle
//!
//! **Stock never goes negative.** Every stock change commits together with
//! the record that explains it, or not at all.
//!
//! # Modules
//!
//! - [`db`]: SQLite store, connection pool and write transactions
//! - [`models`]: Domain types (Drug, Order, AdministrationRecord, etc.)
//! - [`auth`]: Roles, principals and the authorization gate
//! - [`engine`]: Write operations and read models
//! - [`cache`]: Cache-aside store for read aggregates
//! - [`config`]: Engine configuration
//! - [`error`]: Engine error taxonomy

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{authorize, AuthzError, Principal, Role};
pub use cache::{CacheStore, InMemoryCache};
pub use crate::config::EngineConfig;
pub use db::{Database, StoreStats};
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use models::{
    AdministrationRecord, Drug, DrugStatusView, DrugView, NewDrug, NewOrder, Order, OrderStatus,
    OrderView, StockReceipt, TransferRecord, TransferRequest,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum MedLedgerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for MedLedgerError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::OrderNotFound(_) | EngineError::DrugNotFound(_) => {
                MedLedgerError::NotFound(message)
            }
            _ => match e.kind() {
                ErrorKind::Validation => MedLedgerError::InvalidRequest(message),
                ErrorKind::BusinessState => MedLedgerError::Rejected(message),
                ErrorKind::Authorization => MedLedgerError::Forbidden(message),
                ErrorKind::Transient => MedLedgerError::Unavailable(message),
                ErrorKind::Internal => MedLedgerError::Internal(message),
            },
        }
    }
}

impl From<::config::ConfigError> for MedLedgerError {
    fn from(e: ::config::ConfigError) -> Self {
        MedLedgerError::ConfigError(e.to_string())
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a store at the given path, with other settings taken
/// from `config/medledger.toml` and the environment.
#[uniffi::export]
pub fn open_engine(path: String) -> Result<Arc<MedLedgerCore>, MedLedgerError> {
    let mut config = EngineConfig::load()?;
    config.database.path = path;
    let engine = Engine::open(config)?;
    Ok(Arc::new(MedLedgerCore { engine }))
}

/// Create an in-memory engine (for testing).
#[uniffi::export]
pub fn open_engine_in_memory() -> Result<Arc<MedLedgerCore>, MedLedgerError> {
    let engine = Engine::open_in_memory()?;
    Ok(Arc::new(MedLedgerCore { engine }))
}

/// Install JSON logging for the host process.
#[uniffi::export]
pub fn init_logging() {
    telemetry::init();
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine handle for FFI.
#[derive(uniffi::Object)]
pub struct MedLedgerCore {
    engine: Engine,
}

#[uniffi::export]
impl MedLedgerCore {
    // =========================================================================
    // Formulary and Stock
    // =========================================================================

    pub fn register_drug(
        &self,
        principal: FfiPrincipal,
        drug: FfiNewDrug,
    ) -> Result<FfiDrug, MedLedgerError> {
        let drug = self.engine.register_drug(&principal.into(), drug.into())?;
        Ok(drug.into())
    }

    pub fn deactivate_drug(
        &self,
        principal: FfiPrincipal,
        drug_id: String,
    ) -> Result<FfiDrug, MedLedgerError> {
        let drug = self.engine.deactivate_drug(&principal.into(), &drug_id)?;
        Ok(drug.into())
    }

    pub fn receive_stock(
        &self,
        principal: FfiPrincipal,
        drug_id: String,
        quantity: u32,
        idempotency_key: Option<String>,
    ) -> Result<FfiStockReceipt, MedLedgerError> {
        let receipt = self.engine.receive_stock(
            &principal.into(),
            &drug_id,
            quantity,
            idempotency_key.as_deref(),
        )?;
        Ok(receipt.into())
    }

    pub fn transfer_stock(
        &self,
        principal: FfiPrincipal,
        request: FfiTransferRequest,
        idempotency_key: Option<String>,
    ) -> Result<FfiTransfer, MedLedgerError> {
        let record = self.engine.transfer_stock(
            &principal.into(),
            &request.into(),
            idempotency_key.as_deref(),
        )?;
        Ok(record.into())
    }

    pub fn get_formulary(&self) -> Result<Vec<FfiDrugView>, MedLedgerError> {
        let drugs = self.engine.get_formulary()?;
        Ok(drugs.into_iter().map(|d| d.into()).collect())
    }

    pub fn get_inventory_status(&self) -> Result<Vec<FfiDrugStatus>, MedLedgerError> {
        let statuses = self.engine.get_inventory_status()?;
        Ok(statuses.into_iter().map(|s| s.into()).collect())
    }

    pub fn transfers_for_drug(
        &self,
        principal: FfiPrincipal,
        drug_id: String,
    ) -> Result<Vec<FfiTransfer>, MedLedgerError> {
        let transfers = self.engine.transfers_for_drug(&principal.into(), &drug_id)?;
        Ok(transfers.into_iter().map(|t| t.into()).collect())
    }

    pub fn receipts_for_drug(
        &self,
        principal: FfiPrincipal,
        drug_id: String,
    ) -> Result<Vec<FfiStockReceipt>, MedLedgerError> {
        let receipts = self.engine.receipts_for_drug(&principal.into(), &drug_id)?;
        Ok(receipts.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub fn create_order(
        &self,
        principal: FfiPrincipal,
        order: FfiNewOrder,
    ) -> Result<FfiOrder, MedLedgerError> {
        let order = self.engine.create_order(&principal.into(), order.into())?;
        Ok(order.into())
    }

    pub fn administer_dose(
        &self,
        principal: FfiPrincipal,
        order_id: String,
        idempotency_key: Option<String>,
    ) -> Result<FfiAdministration, MedLedgerError> {
        let record = self.engine.administer_dose(
            &principal.into(),
            &order_id,
            idempotency_key.as_deref(),
        )?;
        Ok(record.into())
    }

    pub fn complete_order(
        &self,
        principal: FfiPrincipal,
        order_id: String,
    ) -> Result<FfiOrder, MedLedgerError> {
        let order = self.engine.complete_order(&principal.into(), &order_id)?;
        Ok(order.into())
    }

    pub fn discontinue_order(
        &self,
        principal: FfiPrincipal,
        order_id: String,
    ) -> Result<FfiOrder, MedLedgerError> {
        let order = self.engine.discontinue_order(&principal.into(), &order_id)?;
        Ok(order.into())
    }

    pub fn get_order(
        &self,
        principal: FfiPrincipal,
        order_id: String,
    ) -> Result<FfiOrderView, MedLedgerError> {
        let view = self.engine.get_order(&principal.into(), &order_id)?;
        Ok(view.into())
    }

    /// Orders written by a prescriber, newest first.
    pub fn list_my_orders(
        &self,
        principal: FfiPrincipal,
        prescriber_id: String,
    ) -> Result<Vec<FfiOrderView>, MedLedgerError> {
        let views = self.engine.list_my_orders(&principal.into(), &prescriber_id)?;
        Ok(views.into_iter().map(|v| v.into()).collect())
    }

    /// Active orders in the caller's ward scope (the MAR).
    pub fn list_active_orders(
        &self,
        principal: FfiPrincipal,
    ) -> Result<Vec<FfiOrderView>, MedLedgerError> {
        let views = self.engine.list_active_orders(&principal.into())?;
        Ok(views.into_iter().map(|v| v.into()).collect())
    }

    /// Drop every cached read aggregate.
    pub fn flush_cache(&self) {
        self.engine.flush_cache();
    }
}

// =========================================================================
// FFI Types
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiRole {
    Prescriber,
    Nurse,
    Pharmacist,
    Admin,
}

impl From<FfiRole> for Role {
    fn from(role: FfiRole) -> Self {
        match role {
            FfiRole::Prescriber => Role::Prescriber,
            FfiRole::Nurse => Role::Nurse,
            FfiRole::Pharmacist => Role::Pharmacist,
            FfiRole::Admin => Role::Admin,
        }
    }
}

/// FFI-safe authenticated caller.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrincipal {
    pub id: String,
    pub roles: Vec<FfiRole>,
    pub ward: Option<String>,
}

impl From<FfiPrincipal> for Principal {
    fn from(principal: FfiPrincipal) -> Self {
        Principal {
            id: principal.id,
            roles: principal.roles.into_iter().map(Role::from).collect(),
            ward: principal.ward,
        }
    }
}

/// FFI-safe drug registration input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewDrug {
    pub name: String,
    pub form: String,
    pub strength: String,
    pub initial_stock: u32,
    pub low_stock_threshold: u32,
}

impl From<FfiNewDrug> for NewDrug {
    fn from(drug: FfiNewDrug) -> Self {
        NewDrug::new(drug.name, drug.form, drug.strength)
            .with_stock(drug.initial_stock)
            .with_threshold(drug.low_stock_threshold)
    }
}

/// FFI-safe drug.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDrug {
    pub id: String,
    pub name: String,
    pub form: String,
    pub strength: String,
    pub current_stock: u32,
    pub low_stock_threshold: u32,
    pub active: bool,
}

impl From<Drug> for FfiDrug {
    fn from(drug: Drug) -> Self {
        Self {
            id: drug.id,
            name: drug.name,
            form: drug.form,
            strength: drug.strength,
            current_stock: drug.current_stock,
            low_stock_threshold: drug.low_stock_threshold,
            active: drug.active,
        }
    }
}

/// FFI-safe formulary entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDrugView {
    pub id: String,
    pub name: String,
    pub form: String,
    pub strength: String,
}

impl From<DrugView> for FfiDrugView {
    fn from(view: DrugView) -> Self {
        Self {
            id: view.id,
            name: view.name,
            form: view.form,
            strength: view.strength,
        }
    }
}

/// FFI-safe inventory status line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDrugStatus {
    pub id: String,
    pub name: String,
    pub current_stock: u32,
    pub low_stock_threshold: u32,
    pub low_stock: bool,
}

impl From<DrugStatusView> for FfiDrugStatus {
    fn from(view: DrugStatusView) -> Self {
        Self {
            id: view.id,
            name: view.name,
            current_stock: view.current_stock,
            low_stock_threshold: view.low_stock_threshold,
            low_stock: view.low_stock,
        }
    }
}

/// FFI-safe order input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewOrder {
    pub patient_name: String,
    pub ward: String,
    pub drug_id: String,
    pub dosage: u32,
    pub schedule: String,
    pub total_doses: Option<u32>,
}

impl From<FfiNewOrder> for NewOrder {
    fn from(order: FfiNewOrder) -> Self {
        NewOrder {
            patient_name: order.patient_name,
            ward: order.ward,
            drug_id: order.drug_id,
            dosage: order.dosage,
            schedule: order.schedule,
            total_doses: order.total_doses,
        }
    }
}

/// FFI-safe order.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOrder {
    pub id: String,
    pub patient_name: String,
    pub ward: String,
    pub drug_id: String,
    pub dosage: u32,
    pub schedule: String,
    pub total_doses: Option<u32>,
    pub status: String,
    pub prescriber_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Order> for FfiOrder {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            patient_name: order.patient_name,
            ward: order.ward,
            drug_id: order.drug_id,
            dosage: order.dosage,
            schedule: order.schedule,
            total_doses: order.total_doses,
            status: order.status.as_str().to_string(),
            prescriber_id: order.prescriber_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// FFI-safe administration record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdministration {
    pub id: String,
    pub order_id: String,
    pub drug_id: String,
    pub quantity: u32,
    pub administrator_id: String,
    pub administered_at: String,
}

impl From<AdministrationRecord> for FfiAdministration {
    fn from(record: AdministrationRecord) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id,
            drug_id: record.drug_id,
            quantity: record.quantity,
            administrator_id: record.administrator_id,
            administered_at: record.administered_at,
        }
    }
}

/// FFI-safe order with history.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOrderView {
    pub order: FfiOrder,
    pub drug: Option<FfiDrugView>,
    pub administrations: Vec<FfiAdministration>,
    pub doses_remaining: Option<u32>,
}

impl From<OrderView> for FfiOrderView {
    fn from(view: OrderView) -> Self {
        let doses_remaining = view.doses_remaining();
        Self {
            order: view.order.into(),
            drug: view.drug.map(|d| d.into()),
            administrations: view.administrations.into_iter().map(|a| a.into()).collect(),
            doses_remaining,
        }
    }
}

/// FFI-safe transfer request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransferRequest {
    pub drug_id: String,
    pub source_ward: String,
    pub destination_ward: String,
    pub quantity: u32,
}

impl From<FfiTransferRequest> for TransferRequest {
    fn from(request: FfiTransferRequest) -> Self {
        TransferRequest::new(
            request.drug_id,
            request.source_ward,
            request.destination_ward,
            request.quantity,
        )
    }
}

/// FFI-safe transfer record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransfer {
    pub id: String,
    pub drug_id: String,
    pub source_ward: String,
    pub destination_ward: String,
    pub quantity: u32,
    pub initiator_id: String,
    pub transferred_at: String,
}

impl From<TransferRecord> for FfiTransfer {
    fn from(record: TransferRecord) -> Self {
        Self {
            id: record.id,
            drug_id: record.drug_id,
            source_ward: record.source_ward,
            destination_ward: record.destination_ward,
            quantity: record.quantity,
            initiator_id: record.initiator_id,
            transferred_at: record.transferred_at,
        }
    }
}

/// FFI-safe stock receipt.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockReceipt {
    pub id: String,
    pub drug_id: String,
    pub quantity: u32,
    pub received_by: String,
    pub received_at: String,
}

impl From<StockReceipt> for FfiStockReceipt {
    fn from(receipt: StockReceipt) -> Self {
        Self {
            id: receipt.id,
            drug_id: receipt.drug_id,
            quantity: receipt.quantity,
            received_by: receipt.received_by,
            received_at: receipt.received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> FfiPrincipal {
        FfiPrincipal {
            id: "admin-1".into(),
            roles: vec![FfiRole::Admin],
            ward: None,
        }
    }

    #[test]
    fn test_ffi_round_trip_through_engine() {
        let core = open_engine_in_memory().unwrap();
        let drug = core
            .register_drug(
                admin(),
                FfiNewDrug {
                    name: "Morphine".into(),
                    form: "ampoule".into(),
                    strength: "10mg/ml".into(),
                    initial_stock: 3,
                    low_stock_threshold: 1,
                },
            )
            .unwrap();
        let order = core
            .create_order(
                admin(),
                FfiNewOrder {
                    patient_name: "Pat".into(),
                    ward: "ICU".into(),
                    drug_id: drug.id.clone(),
                    dosage: 2,
                    schedule: "prn".into(),
                    total_doses: Some(1),
                },
            )
            .unwrap();

        core.administer_dose(admin(), order.id.clone(), None).unwrap();
        let view = core.get_order(admin(), order.id).unwrap();
        assert_eq!(view.order.status, "completed");
        assert_eq!(view.doses_remaining, Some(0));

        let status = core.get_inventory_status().unwrap();
        assert_eq!(status[0].current_stock, 1);
        assert!(status[0].low_stock);

        let receipt = core.receive_stock(admin(), drug.id.clone(), 4, None).unwrap();
        assert_eq!(core.receipts_for_drug(admin(), drug.id.clone()).unwrap().len(), 1);
        assert_eq!(receipt.quantity, 4);

        let retired = core.deactivate_drug(admin(), drug.id).unwrap();
        assert!(!retired.active);
        assert!(core.get_formulary().unwrap().is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let core = open_engine_in_memory().unwrap();
        let nurse = FfiPrincipal {
            id: "n-1".into(),
            roles: vec![FfiRole::Nurse],
            ward: Some("ICU".into()),
        };

        let err = core.administer_dose(nurse.clone(), "missing".into(), None).unwrap_err();
        assert!(matches!(err, MedLedgerError::NotFound(_)));

        let request = FfiTransferRequest {
            drug_id: "d".into(),
            source_ward: "ICU".into(),
            destination_ward: "ICU".into(),
            quantity: 1,
        };
        let err = core.transfer_stock(nurse, request.clone(), None).unwrap_err();
        assert!(matches!(err, MedLedgerError::Forbidden(_)));

        let err = core.transfer_stock(admin(), request, None).unwrap_err();
        assert!(matches!(err, MedLedgerError::InvalidRequest(_)));
    }
}
