//! Medication order (prescription) models.

use serde::{Deserialize, Serialize};

use super::administration::AdministrationRecord;
use super::drug::DrugView;
use super::now_timestamp;

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Doses may be administered
    Active,
    /// All prescribed doses given, or closed by the prescriber
    Completed,
    /// Stopped before completion
    Discontinued,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Discontinued => "discontinued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(OrderStatus::Active),
            "completed" => Some(OrderStatus::Completed),
            "discontinued" => Some(OrderStatus::Discontinued),
            _ => None,
        }
    }

    /// Terminal orders are immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prescription for one drug for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Unique order ID
    pub id: String,
    pub patient_name: String,
    /// Ward the patient is admitted to
    pub ward: String,
    pub drug_id: String,
    /// Units drawn from stock per administration
    pub dosage: u32,
    /// Free-text schedule (e.g., "q8h", "once daily")
    pub schedule: String,
    /// Number of administrations after which the order completes.
    /// `None` means open-ended until completed or discontinued.
    pub total_doses: Option<u32>,
    pub status: OrderStatus,
    pub prescriber_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOrder {
    pub patient_name: String,
    pub ward: String,
    pub drug_id: String,
    pub dosage: u32,
    pub schedule: String,
    pub total_doses: Option<u32>,
}

impl Order {
    /// Build an active order written by `prescriber_id`.
    pub fn from_new(new: NewOrder, prescriber_id: String) -> Self {
        let now = now_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_name: new.patient_name,
            ward: new.ward,
            drug_id: new.drug_id,
            dosage: new.dosage,
            schedule: new.schedule,
            total_doses: new.total_doses,
            status: OrderStatus::Active,
            prescriber_id,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    /// Whether `administered` doses fulfil the prescription.
    pub fn is_fulfilled_by(&self, administered: u32) -> bool {
        matches!(self.total_doses, Some(total) if administered >= total)
    }
}

/// Read-model of an order with its administration history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderView {
    pub order: Order,
    /// Summary of the ordered drug; `None` only if the drug row is missing
    pub drug: Option<DrugView>,
    pub administrations: Vec<AdministrationRecord>,
}

impl OrderView {
    pub fn doses_given(&self) -> usize {
        self.administrations.len()
    }

    /// Doses still owed, if the order has a prescribed total.
    pub fn doses_remaining(&self) -> Option<u32> {
        self.order
            .total_doses
            .map(|total| total.saturating_sub(self.administrations.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(total_doses: Option<u32>) -> NewOrder {
        NewOrder {
            patient_name: "Ada Byron".into(),
            ward: "ICU".into(),
            drug_id: "drug-1".into(),
            dosage: 2,
            schedule: "q8h".into(),
            total_doses,
        }
    }

    #[test]
    fn test_from_new_is_active() {
        let order = Order::from_new(new_order(None), "dr-1".into());
        assert!(order.is_active());
        assert_eq!(order.prescriber_id, "dr-1");
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [OrderStatus::Active, OrderStatus::Completed, OrderStatus::Discontinued] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("paused"), None);
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::Active.is_terminal());
    }

    #[test]
    fn test_fulfilment_rule() {
        let open = Order::from_new(new_order(None), "dr-1".into());
        assert!(!open.is_fulfilled_by(100));

        let fixed = Order::from_new(new_order(Some(3)), "dr-1".into());
        assert!(!fixed.is_fulfilled_by(2));
        assert!(fixed.is_fulfilled_by(3));
    }

    #[test]
    fn test_doses_remaining() {
        let view = OrderView {
            order: Order::from_new(new_order(Some(3)), "dr-1".into()),
            drug: None,
            administrations: vec![],
        };
        assert_eq!(view.doses_remaining(), Some(3));
        assert_eq!(view.doses_given(), 0);
    }
}
