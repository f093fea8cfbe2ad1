//! Role-scoped read models.
//!
//! Order views are assembled with one statement for the parent orders and
//! one per nested relationship, regardless of how many orders match. All
//! statements of one view run inside a single read snapshot.

use std::collections::{BTreeSet, HashMap};

use super::{logged, Engine};
use crate::auth::{
    authorize, authorize_owner, AuthzError, Principal, CLINICAL_ROLES, PHARMACY_ROLES,
    PRESCRIBE_ROLES,
};
use crate::cache::keys;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::models::{DrugStatusView, DrugView, Order, OrderView, StockReceipt, TransferRecord};

/// Attach administrations and drug summaries to `orders`, keeping their order.
fn assemble_views(db: &Database, orders: Vec<Order>) -> EngineResult<Vec<OrderView>> {
    let order_ids: Vec<String> = orders.iter().map(|o| o.id.clone()).collect();
    let drug_ids: Vec<String> = orders
        .iter()
        .map(|o| o.drug_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut administrations = db.administrations_by_order_ids(&order_ids)?;
    let drugs: HashMap<String, DrugView> = db
        .get_drugs_by_ids(&drug_ids)?
        .iter()
        .map(|d| (d.id.clone(), DrugView::from(d)))
        .collect();

    Ok(orders
        .into_iter()
        .map(|order| OrderView {
            drug: drugs.get(&order.drug_id).cloned(),
            administrations: administrations.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect())
}

impl Engine {
    /// Orders written by `prescriber_id`, newest first, with their histories.
    #[tracing::instrument(skip_all, fields(prescriber_id = %prescriber_id, principal = %principal.id))]
    pub fn list_my_orders(
        &self,
        principal: &Principal,
        prescriber_id: &str,
    ) -> EngineResult<Vec<OrderView>> {
        logged("list_my_orders", self.list_my_orders_inner(principal, prescriber_id))
    }

    fn list_my_orders_inner(
        &self,
        principal: &Principal,
        prescriber_id: &str,
    ) -> EngineResult<Vec<OrderView>> {
        authorize(principal, PRESCRIBE_ROLES, None)?;
        authorize_owner(principal, prescriber_id, "orders of another prescriber")?;

        let conn = self.connection()?;
        conn.read_snapshot(|db| -> EngineResult<Vec<OrderView>> {
            let orders = db.list_orders_by_prescriber(prescriber_id)?;
            assemble_views(db, orders)
        })
    }

    /// The medication administration record visible to `principal`.
    ///
    /// Ward-scoped callers see their own ward; hospital-wide callers and
    /// admins see every ward. Served from cache when fresh.
    #[tracing::instrument(skip_all, fields(principal = %principal.id))]
    pub fn list_active_orders(&self, principal: &Principal) -> EngineResult<Vec<OrderView>> {
        logged("list_active_orders", self.list_active_orders_inner(principal))
    }

    fn list_active_orders_inner(&self, principal: &Principal) -> EngineResult<Vec<OrderView>> {
        authorize(principal, CLINICAL_ROLES, None)?;
        let ward = principal.ward_filter();
        self.cache.get_or_load(
            &keys::mar(ward),
            self.config.cache.inventory_ttl(),
            || -> EngineResult<Vec<OrderView>> {
                let conn = self.connection()?;
                conn.read_snapshot(|db| -> EngineResult<Vec<OrderView>> {
                    let orders = db.list_active_orders(ward)?;
                    assemble_views(db, orders)
                })
            },
        )
    }

    /// One order with its history, if the caller's ward scope covers it.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, principal = %principal.id))]
    pub fn get_order(&self, principal: &Principal, order_id: &str) -> EngineResult<OrderView> {
        logged("get_order", self.get_order_inner(principal, order_id))
    }

    fn get_order_inner(&self, principal: &Principal, order_id: &str) -> EngineResult<OrderView> {
        authorize(principal, CLINICAL_ROLES, None)?;
        let conn = self.connection()?;
        conn.read_snapshot(|db| -> EngineResult<OrderView> {
            let order = db
                .get_order(order_id)?
                .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
            // Prescribers may always read their own orders.
            if !principal.covers_ward(&order.ward)
                && authorize_owner(principal, &order.prescriber_id, "order").is_err()
            {
                return Err(AuthzError::WardOutOfScope(order.ward).into());
            }

            let administrations = db.list_administrations_for_order(&order.id)?;
            let drug = db.get_drug(&order.drug_id)?.as_ref().map(DrugView::from);
            Ok(OrderView {
                order,
                drug,
                administrations,
            })
        })
    }

    /// Active formulary, ordered by name.
    #[tracing::instrument(skip(self))]
    pub fn get_formulary(&self) -> EngineResult<Vec<DrugView>> {
        let result = self.cache.get_or_load(
            keys::FORMULARY,
            self.config.cache.formulary_ttl(),
            || -> EngineResult<Vec<DrugView>> {
                let conn = self.connection()?;
                let drugs = conn.list_drugs(true)?;
                Ok(drugs.iter().map(DrugView::from).collect())
            },
        );
        logged("get_formulary", result)
    }

    /// Stock level of every drug, ordered by name.
    #[tracing::instrument(skip(self))]
    pub fn get_inventory_status(&self) -> EngineResult<Vec<DrugStatusView>> {
        let result = self.cache.get_or_load(
            keys::INVENTORY,
            self.config.cache.inventory_ttl(),
            || -> EngineResult<Vec<DrugStatusView>> {
                let conn = self.connection()?;
                let drugs = conn.list_drugs(false)?;
                Ok(drugs.iter().map(DrugStatusView::from).collect())
            },
        );
        logged("get_inventory_status", result)
    }

    /// Transfer log of one drug, oldest first.
    #[tracing::instrument(skip_all, fields(drug_id = %drug_id, principal = %principal.id))]
    pub fn transfers_for_drug(
        &self,
        principal: &Principal,
        drug_id: &str,
    ) -> EngineResult<Vec<TransferRecord>> {
        logged("transfers_for_drug", self.transfers_for_drug_inner(principal, drug_id))
    }

    fn transfers_for_drug_inner(
        &self,
        principal: &Principal,
        drug_id: &str,
    ) -> EngineResult<Vec<TransferRecord>> {
        authorize(principal, PHARMACY_ROLES, None)?;
        let conn = self.connection()?;
        if conn.get_drug(drug_id)?.is_none() {
            return Err(EngineError::DrugNotFound(drug_id.to_string()));
        }
        Ok(conn.list_transfers_for_drug(drug_id)?)
    }

    /// Stock receipts of one drug, oldest first.
    #[tracing::instrument(skip_all, fields(drug_id = %drug_id, principal = %principal.id))]
    pub fn receipts_for_drug(
        &self,
        principal: &Principal,
        drug_id: &str,
    ) -> EngineResult<Vec<StockReceipt>> {
        logged("receipts_for_drug", self.receipts_for_drug_inner(principal, drug_id))
    }

    fn receipts_for_drug_inner(
        &self,
        principal: &Principal,
        drug_id: &str,
    ) -> EngineResult<Vec<StockReceipt>> {
        authorize(principal, PHARMACY_ROLES, None)?;
        let conn = self.connection()?;
        if conn.get_drug(drug_id)?.is_none() {
            return Err(EngineError::DrugNotFound(drug_id.to_string()));
        }
        Ok(conn.list_receipts_for_drug(drug_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::{NewDrug, NewOrder};

    fn admin() -> Principal {
        Principal::new("admin-1", [Role::Admin])
    }

    #[test]
    fn test_views_keep_parent_order_and_nest_children() {
        let engine = Engine::open_in_memory().unwrap();
        let drug = engine
            .register_drug(&admin(), NewDrug::new("Insulin", "pen", "100U/ml").with_stock(50))
            .unwrap();
        let mut ids = Vec::new();
        for ward in ["ICU", "ICU", "Ward 7"] {
            let order = engine
                .create_order(
                    &admin(),
                    NewOrder {
                        patient_name: "Pat".into(),
                        ward: ward.into(),
                        drug_id: drug.id.clone(),
                        dosage: 1,
                        schedule: "tid".into(),
                        total_doses: None,
                    },
                )
                .unwrap();
            ids.push(order.id);
        }
        engine.administer_dose(&admin(), &ids[1], None).unwrap();

        let views = engine.list_active_orders(&admin()).unwrap();
        let listed: Vec<_> = views.iter().map(|v| v.order.id.clone()).collect();
        assert_eq!(listed, ids);
        assert_eq!(views[1].doses_given(), 1);
        assert_eq!(views[0].drug.as_ref().map(|d| d.name.as_str()), Some("Insulin"));
    }

    #[test]
    fn test_get_order_scope() {
        let engine = Engine::open_in_memory().unwrap();
        let drug = engine
            .register_drug(&admin(), NewDrug::new("Insulin", "pen", "100U/ml").with_stock(5))
            .unwrap();
        let order = engine
            .create_order(
                &admin(),
                NewOrder {
                    patient_name: "Pat".into(),
                    ward: "ICU".into(),
                    drug_id: drug.id,
                    dosage: 1,
                    schedule: "tid".into(),
                    total_doses: None,
                },
            )
            .unwrap();

        let icu = Principal::new("n-1", [Role::Nurse]).in_ward("ICU");
        let maternity = Principal::new("n-2", [Role::Nurse]).in_ward("Maternity");
        assert!(engine.get_order(&icu, &order.id).is_ok());
        assert!(matches!(
            engine.get_order(&maternity, &order.id),
            Err(EngineError::Denied(_))
        ));

        let visitor = Principal::new("v-1", Vec::<Role>::new());
        assert!(matches!(
            engine.get_order(&visitor, &order.id),
            Err(EngineError::Denied(_))
        ));
        assert!(matches!(
            engine.list_active_orders(&visitor),
            Err(EngineError::Denied(_))
        ));
    }

    #[test]
    fn test_receipts_for_drug() {
        let engine = Engine::open_in_memory().unwrap();
        let drug = engine
            .register_drug(&admin(), NewDrug::new("Insulin", "pen", "100U/ml"))
            .unwrap();
        let first = engine.receive_stock(&admin(), &drug.id, 10, None).unwrap();
        let second = engine.receive_stock(&admin(), &drug.id, 5, None).unwrap();

        let receipts = engine.receipts_for_drug(&admin(), &drug.id).unwrap();
        assert_eq!(receipts, vec![first, second]);

        let nurse = Principal::new("n-1", [Role::Nurse]);
        assert!(matches!(
            engine.receipts_for_drug(&nurse, &drug.id),
            Err(EngineError::Denied(_))
        ));
        assert!(matches!(
            engine.receipts_for_drug(&admin(), "missing"),
            Err(EngineError::DrugNotFound(_))
        ));
    }
}
