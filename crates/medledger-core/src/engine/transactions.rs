//! Write operations.
//!
//! Every operation authorizes first, then runs begin, lock, validate, mutate,
//! commit inside one store transaction. Any early return drops the
//! transaction, which rolls it back. Cache entries are invalidated only
//! after a successful commit.

use serde::Serialize;

use super::{logged, Engine};
use crate::auth::{
    authorize, authorize_owner, Principal, ADMINISTER_ROLES, PHARMACY_ROLES, PRESCRIBE_ROLES,
};
use crate::cache::keys;
use crate::db::{fingerprint, DbError, StoreTx};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AdministrationRecord, Drug, NewDrug, NewOrder, Order, OrderStatus, StockReceipt,
    TransferRecord, TransferRequest,
};

/// Idempotency key bound to one request.
struct KeyGuard<'k> {
    key: &'k str,
    operation: &'static str,
    fingerprint: String,
}

impl<'k> KeyGuard<'k> {
    fn new<T: Serialize>(
        key: Option<&'k str>,
        operation: &'static str,
        request: &T,
    ) -> EngineResult<Option<Self>> {
        match key {
            Some(key) => Ok(Some(Self {
                key,
                operation,
                fingerprint: fingerprint(operation, request)?,
            })),
            None => Ok(None),
        }
    }

    /// Result id of an earlier identical request, if this is a replay.
    fn replayed(&self, tx: &StoreTx<'_>) -> EngineResult<Option<String>> {
        match tx.find_idempotency_key(self.key)? {
            None => Ok(None),
            Some(record) if record.matches(self.operation, &self.fingerprint) => {
                tracing::info!(key = self.key, result_id = %record.result_id, "replaying idempotent request");
                Ok(Some(record.result_id))
            }
            Some(_) => Err(EngineError::IdempotencyConflict(self.key.to_string())),
        }
    }

    fn record(&self, tx: &StoreTx<'_>, result_id: &str) -> EngineResult<()> {
        tx.record_idempotency_key(self.key, self.operation, &self.fingerprint, result_id)?;
        Ok(())
    }
}

fn replay_missing(kind: &str, id: &str) -> EngineError {
    EngineError::Internal(DbError::NotFound(format!("{} {} for idempotency key", kind, id)))
}

impl Engine {
    /// Give one dose of an active order, drawing its dosage from stock.
    ///
    /// The order completes when its administrations reach `total_doses`.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, principal = %principal.id))]
    pub fn administer_dose(
        &self,
        principal: &Principal,
        order_id: &str,
        idempotency_key: Option<&str>,
    ) -> EngineResult<AdministrationRecord> {
        logged(
            "administer_dose",
            self.administer_dose_inner(principal, order_id, idempotency_key),
        )
    }

    fn administer_dose_inner(
        &self,
        principal: &Principal,
        order_id: &str,
        idempotency_key: Option<&str>,
    ) -> EngineResult<AdministrationRecord> {
        authorize(principal, ADMINISTER_ROLES, None)?;
        let guard = KeyGuard::new(
            idempotency_key,
            "administer_dose",
            &(order_id, principal.id.as_str()),
        )?;

        let mut conn = self.connection()?;

        // An order's ward never changes, so it is safe to check scope unlocked.
        let ward = conn
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?
            .ward;
        authorize(principal, ADMINISTER_ROLES, Some(&ward))?;

        let tx = conn.begin_write()?;

        if let Some(guard) = &guard {
            if let Some(id) = guard.replayed(&tx)? {
                return tx
                    .get_administration(&id)?
                    .ok_or_else(|| replay_missing("administration", &id));
            }
        }

        let order = tx
            .lock_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if !order.is_active() {
            return Err(EngineError::InvalidState(format!(
                "order {} is {}",
                order.id, order.status
            )));
        }

        let drug = tx
            .lock_drug(&order.drug_id)?
            .ok_or_else(|| EngineError::DrugNotFound(order.drug_id.clone()))?;
        if !drug.can_supply(order.dosage) {
            return Err(EngineError::InsufficientStock {
                drug_id: drug.id,
                requested: order.dosage,
                available: drug.current_stock,
            });
        }

        let remaining = tx.decrement_stock(&drug.id, order.dosage)?;
        let record = AdministrationRecord::new(
            order.id.clone(),
            drug.id.clone(),
            order.dosage,
            principal.id.clone(),
        );
        tx.insert_administration(&record)?;

        let given = tx.count_administrations(&order.id)?;
        if order.is_fulfilled_by(given) {
            tx.transition_order(&order.id, OrderStatus::Completed)?;
            tracing::info!(doses = given, "order completed");
        }

        if let Some(guard) = &guard {
            guard.record(&tx, &record.id)?;
        }
        tx.commit()?;

        tracing::info!(
            administration_id = %record.id,
            drug_id = %drug.id,
            remaining_stock = remaining.current_stock,
            "dose administered"
        );
        self.cache.invalidate(&[
            keys::INVENTORY,
            &keys::mar(Some(&order.ward)),
            &keys::mar(None),
        ]);
        Ok(record)
    }

    /// Move stock between wards.
    ///
    /// The drug's balance is a single hospital-wide figure, so a transfer
    /// draws it down by `quantity` and logs the movement.
    #[tracing::instrument(
        skip_all,
        fields(
            drug_id = %request.drug_id,
            source = %request.source_ward,
            destination = %request.destination_ward,
            quantity = request.quantity,
            principal = %principal.id,
        )
    )]
    pub fn transfer_stock(
        &self,
        principal: &Principal,
        request: &TransferRequest,
        idempotency_key: Option<&str>,
    ) -> EngineResult<TransferRecord> {
        logged(
            "transfer_stock",
            self.transfer_stock_inner(principal, request, idempotency_key),
        )
    }

    fn transfer_stock_inner(
        &self,
        principal: &Principal,
        request: &TransferRequest,
        idempotency_key: Option<&str>,
    ) -> EngineResult<TransferRecord> {
        authorize(principal, PHARMACY_ROLES, Some(&request.source_ward))?;

        if request.source_ward == request.destination_ward {
            return Err(EngineError::InvalidTransfer(request.source_ward.clone()));
        }
        if request.quantity == 0 {
            return Err(EngineError::InvalidQuantity(
                "transfer quantity must be positive".into(),
            ));
        }
        let guard = KeyGuard::new(
            idempotency_key,
            "transfer_stock",
            &(request, principal.id.as_str()),
        )?;

        let mut conn = self.connection()?;
        let tx = conn.begin_write()?;

        if let Some(guard) = &guard {
            if let Some(id) = guard.replayed(&tx)? {
                return tx
                    .get_transfer(&id)?
                    .ok_or_else(|| replay_missing("transfer", &id));
            }
        }

        let drug = tx
            .lock_drug(&request.drug_id)?
            .ok_or_else(|| EngineError::DrugNotFound(request.drug_id.clone()))?;
        if !drug.can_supply(request.quantity) {
            return Err(EngineError::InsufficientStock {
                drug_id: drug.id,
                requested: request.quantity,
                available: drug.current_stock,
            });
        }

        tx.decrement_stock(&drug.id, request.quantity)?;
        let record = TransferRecord::new(request, principal.id.clone());
        tx.insert_transfer(&record)?;

        if let Some(guard) = &guard {
            guard.record(&tx, &record.id)?;
        }
        tx.commit()?;

        tracing::info!(transfer_id = %record.id, "stock transferred");
        self.cache.invalidate(&[keys::INVENTORY]);
        Ok(record)
    }

    /// Book a delivery into stock.
    #[tracing::instrument(skip_all, fields(drug_id = %drug_id, quantity = quantity, principal = %principal.id))]
    pub fn receive_stock(
        &self,
        principal: &Principal,
        drug_id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> EngineResult<StockReceipt> {
        logged(
            "receive_stock",
            self.receive_stock_inner(principal, drug_id, quantity, idempotency_key),
        )
    }

    fn receive_stock_inner(
        &self,
        principal: &Principal,
        drug_id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> EngineResult<StockReceipt> {
        authorize(principal, PHARMACY_ROLES, None)?;
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity(
                "received quantity must be positive".into(),
            ));
        }
        let guard = KeyGuard::new(
            idempotency_key,
            "receive_stock",
            &(drug_id, quantity, principal.id.as_str()),
        )?;

        let mut conn = self.connection()?;
        let tx = conn.begin_write()?;

        if let Some(guard) = &guard {
            if let Some(id) = guard.replayed(&tx)? {
                return tx
                    .get_receipt(&id)?
                    .ok_or_else(|| replay_missing("receipt", &id));
            }
        }

        let drug = tx
            .lock_drug(drug_id)?
            .ok_or_else(|| EngineError::DrugNotFound(drug_id.to_string()))?;
        if drug.current_stock.checked_add(quantity).is_none() {
            return Err(EngineError::InvalidQuantity(format!(
                "receipt would exceed maximum stock: {} on hand, {} received, limit {}",
                drug.current_stock,
                quantity,
                u32::MAX
            )));
        }
        let updated = tx.increment_stock(&drug.id, quantity)?;
        let receipt = StockReceipt::new(drug.id.clone(), quantity, principal.id.clone());
        tx.insert_receipt(&receipt)?;

        if let Some(guard) = &guard {
            guard.record(&tx, &receipt.id)?;
        }
        tx.commit()?;

        tracing::info!(
            receipt_id = %receipt.id,
            current_stock = updated.current_stock,
            "stock received"
        );
        self.cache.invalidate(&[keys::INVENTORY]);
        Ok(receipt)
    }

    /// Add a drug to the formulary.
    #[tracing::instrument(skip_all, fields(name = %new.name, principal = %principal.id))]
    pub fn register_drug(&self, principal: &Principal, new: NewDrug) -> EngineResult<Drug> {
        logged("register_drug", self.register_drug_inner(principal, new))
    }

    fn register_drug_inner(&self, principal: &Principal, new: NewDrug) -> EngineResult<Drug> {
        authorize(principal, PHARMACY_ROLES, None)?;
        if new.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("drug name must not be empty".into()));
        }

        let drug = Drug::from_new(new);
        let mut conn = self.connection()?;
        let tx = conn.begin_write()?;
        tx.insert_drug(&drug)?;
        tx.commit()?;

        tracing::info!(drug_id = %drug.id, stock = drug.current_stock, "drug registered");
        self.cache.invalidate(&[keys::FORMULARY, keys::INVENTORY]);
        Ok(drug)
    }

    /// Take a drug off the formulary.
    ///
    /// Existing orders and stock are untouched; new orders are refused.
    #[tracing::instrument(skip_all, fields(drug_id = %drug_id, principal = %principal.id))]
    pub fn deactivate_drug(&self, principal: &Principal, drug_id: &str) -> EngineResult<Drug> {
        logged("deactivate_drug", self.deactivate_drug_inner(principal, drug_id))
    }

    fn deactivate_drug_inner(&self, principal: &Principal, drug_id: &str) -> EngineResult<Drug> {
        authorize(principal, PHARMACY_ROLES, None)?;

        let mut conn = self.connection()?;
        let tx = conn.begin_write()?;
        let drug = tx
            .lock_drug(drug_id)?
            .ok_or_else(|| EngineError::DrugNotFound(drug_id.to_string()))?;
        if !drug.active {
            return Err(EngineError::InvalidState(format!(
                "drug {} is already off the formulary",
                drug.id
            )));
        }
        let updated = tx.set_drug_active(&drug.id, false)?;
        tx.commit()?;

        tracing::info!(drug_id = %updated.id, "drug deactivated");
        self.cache.invalidate(&[keys::FORMULARY, keys::INVENTORY]);
        Ok(updated)
    }

    /// Write a new active order.
    #[tracing::instrument(
        skip_all,
        fields(drug_id = %new.drug_id, ward = %new.ward, principal = %principal.id)
    )]
    pub fn create_order(&self, principal: &Principal, new: NewOrder) -> EngineResult<Order> {
        logged("create_order", self.create_order_inner(principal, new))
    }

    fn create_order_inner(&self, principal: &Principal, new: NewOrder) -> EngineResult<Order> {
        authorize(principal, PRESCRIBE_ROLES, Some(&new.ward))?;
        if new.dosage == 0 {
            return Err(EngineError::InvalidQuantity("dosage must be positive".into()));
        }
        if new.total_doses == Some(0) {
            return Err(EngineError::InvalidQuantity(
                "total doses must be positive when given".into(),
            ));
        }

        let mut conn = self.connection()?;
        let tx = conn.begin_write()?;

        let drug = tx
            .lock_drug(&new.drug_id)?
            .ok_or_else(|| EngineError::DrugNotFound(new.drug_id.clone()))?;
        if !drug.active {
            return Err(EngineError::InvalidState(format!(
                "drug {} is not on the formulary",
                drug.id
            )));
        }

        let order = Order::from_new(new, principal.id.clone());
        tx.insert_order(&order)?;
        tx.commit()?;

        tracing::info!(order_id = %order.id, "order created");
        self.cache
            .invalidate(&[&keys::mar(Some(&order.ward)), &keys::mar(None)]);
        Ok(order)
    }

    /// Close an active order as completed.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, principal = %principal.id))]
    pub fn complete_order(&self, principal: &Principal, order_id: &str) -> EngineResult<Order> {
        logged(
            "complete_order",
            self.close_order(principal, order_id, OrderStatus::Completed),
        )
    }

    /// Stop an active order.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, principal = %principal.id))]
    pub fn discontinue_order(&self, principal: &Principal, order_id: &str) -> EngineResult<Order> {
        logged(
            "discontinue_order",
            self.close_order(principal, order_id, OrderStatus::Discontinued),
        )
    }

    fn close_order(
        &self,
        principal: &Principal,
        order_id: &str,
        status: OrderStatus,
    ) -> EngineResult<Order> {
        authorize(principal, PRESCRIBE_ROLES, None)?;

        let mut conn = self.connection()?;

        // The prescriber of an order never changes.
        let owner = conn
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?
            .prescriber_id;
        authorize_owner(principal, &owner, &format!("order {}", order_id))?;

        let tx = conn.begin_write()?;
        let order = tx
            .lock_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if !order.is_active() {
            return Err(EngineError::InvalidState(format!(
                "order {} is {}",
                order.id, order.status
            )));
        }
        let closed = tx.transition_order(&order.id, status)?;
        tx.commit()?;

        tracing::info!(status = %closed.status, "order closed");
        self.cache
            .invalidate(&[&keys::mar(Some(&closed.ward)), &keys::mar(None)]);
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn pharmacist() -> Principal {
        Principal::new("pharm-1", [Role::Pharmacist])
    }

    fn prescriber() -> Principal {
        Principal::new("dr-1", [Role::Prescriber])
    }

    fn nurse() -> Principal {
        Principal::new("nurse-1", [Role::Nurse]).in_ward("ICU")
    }

    fn seed(engine: &Engine, stock: u32, total_doses: Option<u32>) -> (Drug, Order) {
        let drug = engine
            .register_drug(
                &pharmacist(),
                NewDrug::new("Vancomycin", "vial", "1g").with_stock(stock),
            )
            .unwrap();
        let order = engine
            .create_order(
                &prescriber(),
                NewOrder {
                    patient_name: "Ada Lovelace".into(),
                    ward: "ICU".into(),
                    drug_id: drug.id.clone(),
                    dosage: 2,
                    schedule: "q12h".into(),
                    total_doses,
                },
            )
            .unwrap();
        (drug, order)
    }

    fn stock_of(engine: &Engine, drug_id: &str) -> u32 {
        engine
            .get_inventory_status()
            .unwrap()
            .into_iter()
            .find(|d| d.id == drug_id)
            .map(|d| d.current_stock)
            .unwrap()
    }

    #[test]
    fn test_administer_draws_dosage() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, order) = seed(&engine, 10, None);

        let record = engine.administer_dose(&nurse(), &order.id, None).unwrap();
        assert_eq!(record.quantity, 2);
        assert_eq!(record.administrator_id, "nurse-1");
        assert_eq!(stock_of(&engine, &drug.id), 8);
    }

    #[test]
    fn test_insufficient_stock_leaves_no_trace() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, order) = seed(&engine, 1, None);

        let err = engine.administer_dose(&nurse(), &order.id, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            }
        ));
        assert_eq!(stock_of(&engine, &drug.id), 1);
        let view = engine.list_active_orders(&nurse()).unwrap();
        assert!(view[0].administrations.is_empty());
    }

    #[test]
    fn test_missing_order() {
        let engine = Engine::open_in_memory().unwrap();
        let err = engine.administer_dose(&nurse(), "nope", None).unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound(_)));
    }

    #[test]
    fn test_out_of_ward_nurse_denied() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, order) = seed(&engine, 10, None);
        let other = Principal::new("nurse-2", [Role::Nurse]).in_ward("Maternity");

        let err = engine.administer_dose(&other, &order.id, None).unwrap_err();
        assert!(matches!(err, EngineError::Denied(_)));
        assert_eq!(stock_of(&engine, &drug.id), 10);
    }

    #[test]
    fn test_completion_rule() {
        let engine = Engine::open_in_memory().unwrap();
        let (_, order) = seed(&engine, 10, Some(2));

        engine.administer_dose(&nurse(), &order.id, None).unwrap();
        engine.administer_dose(&nurse(), &order.id, None).unwrap();

        let err = engine.administer_dose(&nurse(), &order.id, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(engine.list_active_orders(&nurse()).unwrap().is_empty());
    }

    #[test]
    fn test_idempotent_replay() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, order) = seed(&engine, 10, None);

        let first = engine
            .administer_dose(&nurse(), &order.id, Some("retry-1"))
            .unwrap();
        let again = engine
            .administer_dose(&nurse(), &order.id, Some("retry-1"))
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(stock_of(&engine, &drug.id), 8);
    }

    #[test]
    fn test_idempotency_conflict() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, order) = seed(&engine, 10, None);
        let request = TransferRequest::new(&drug.id, "Pharmacy", "ICU", 3);

        engine
            .transfer_stock(&pharmacist(), &request, Some("k"))
            .unwrap();
        let err = engine
            .administer_dose(&nurse(), &order.id, Some("k"))
            .unwrap_err();
        assert!(matches!(err, EngineError::IdempotencyConflict(_)));
        assert_eq!(stock_of(&engine, &drug.id), 7);
    }

    #[test]
    fn test_transfer_validation_order() {
        let engine = Engine::open_in_memory().unwrap();
        let same = TransferRequest::new("d", "ICU", "ICU", 1);
        assert!(matches!(
            engine.transfer_stock(&pharmacist(), &same, None),
            Err(EngineError::InvalidTransfer(_))
        ));

        let zero = TransferRequest::new("d", "ICU", "Ward 7", 0);
        assert!(matches!(
            engine.transfer_stock(&pharmacist(), &zero, None),
            Err(EngineError::InvalidQuantity(_))
        ));

        let missing = TransferRequest::new("d", "ICU", "Ward 7", 1);
        assert!(matches!(
            engine.transfer_stock(&pharmacist(), &missing, None),
            Err(EngineError::DrugNotFound(_))
        ));

        // Authorization is checked before validation.
        assert!(matches!(
            engine.transfer_stock(&nurse(), &same, None),
            Err(EngineError::Denied(_))
        ));
    }

    #[test]
    fn test_receive_stock() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, _) = seed(&engine, 0, None);

        let receipt = engine
            .receive_stock(&pharmacist(), &drug.id, 25, Some("delivery-7"))
            .unwrap();
        let replay = engine
            .receive_stock(&pharmacist(), &drug.id, 25, Some("delivery-7"))
            .unwrap();
        assert_eq!(receipt, replay);
        assert_eq!(stock_of(&engine, &drug.id), 25);

        assert!(matches!(
            engine.receive_stock(&pharmacist(), &drug.id, 0, None),
            Err(EngineError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_create_order_validation() {
        let engine = Engine::open_in_memory().unwrap();
        let (drug, _) = seed(&engine, 5, None);
        let mut new = NewOrder {
            patient_name: "Alan Turing".into(),
            ward: "ICU".into(),
            drug_id: drug.id.clone(),
            dosage: 0,
            schedule: "daily".into(),
            total_doses: None,
        };
        assert!(matches!(
            engine.create_order(&prescriber(), new.clone()),
            Err(EngineError::InvalidQuantity(_))
        ));

        new.dosage = 1;
        new.drug_id = "missing".into();
        assert!(matches!(
            engine.create_order(&prescriber(), new.clone()),
            Err(EngineError::DrugNotFound(_))
        ));

        assert!(matches!(
            engine.create_order(&nurse(), new),
            Err(EngineError::Denied(_))
        ));
    }

    #[test]
    fn test_close_order_requires_owner() {
        let engine = Engine::open_in_memory().unwrap();
        let (_, order) = seed(&engine, 5, None);
        let colleague = Principal::new("dr-2", [Role::Prescriber]);

        assert!(matches!(
            engine.discontinue_order(&colleague, &order.id),
            Err(EngineError::Denied(_))
        ));

        let closed = engine.discontinue_order(&prescriber(), &order.id).unwrap();
        assert_eq!(closed.status, OrderStatus::Discontinued);

        assert!(matches!(
            engine.complete_order(&prescriber(), &order.id),
            Err(EngineError::InvalidState(_))
        ));
    }
}
