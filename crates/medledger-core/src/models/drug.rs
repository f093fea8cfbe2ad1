//! Formulary and stock models.

use serde::{Deserialize, Serialize};

use super::now_timestamp;

/// A drug in the hospital formulary together with its ledger balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drug {
    /// Unique drug ID
    pub id: String,
    /// Generic or brand name
    pub name: String,
    /// Dosage form (e.g., "tablet", "vial")
    pub form: String,
    /// Strength per unit (e.g., "500mg", "10mg/mL")
    pub strength: String,
    /// Units on hand; never negative
    pub current_stock: u32,
    /// Stock level at or below which the drug is reported as low
    pub low_stock_threshold: u32,
    /// Whether the drug is currently listed in the formulary
    pub active: bool,
    /// Creation timestamp
    pub created_at: String,
}

/// Input for registering a formulary entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDrug {
    pub name: String,
    pub form: String,
    pub strength: String,
    pub initial_stock: u32,
    pub low_stock_threshold: u32,
}

impl NewDrug {
    pub fn new(name: impl Into<String>, form: impl Into<String>, strength: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            form: form.into(),
            strength: strength.into(),
            initial_stock: 0,
            low_stock_threshold: 0,
        }
    }

    pub fn with_stock(mut self, initial_stock: u32) -> Self {
        self.initial_stock = initial_stock;
        self
    }

    pub fn with_threshold(mut self, low_stock_threshold: u32) -> Self {
        self.low_stock_threshold = low_stock_threshold;
        self
    }
}

impl Drug {
    /// Build a new active drug from registration input.
    pub fn from_new(new: NewDrug) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            form: new.form,
            strength: new.strength,
            current_stock: new.initial_stock,
            low_stock_threshold: new.low_stock_threshold,
            active: true,
            created_at: now_timestamp(),
        }
    }

    /// Check whether stock is at or below the low-stock threshold.
    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.low_stock_threshold
    }

    /// Check whether `quantity` units can be drawn from stock.
    pub fn can_supply(&self, quantity: u32) -> bool {
        self.current_stock >= quantity
    }
}

/// Formulary entry as shown to prescribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrugView {
    pub id: String,
    pub name: String,
    pub form: String,
    pub strength: String,
}

impl From<&Drug> for DrugView {
    fn from(drug: &Drug) -> Self {
        Self {
            id: drug.id.clone(),
            name: drug.name.clone(),
            form: drug.form.clone(),
            strength: drug.strength.clone(),
        }
    }
}

/// Inventory status line for one drug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrugStatusView {
    pub id: String,
    pub name: String,
    pub current_stock: u32,
    pub low_stock_threshold: u32,
    pub low_stock: bool,
}

impl From<&Drug> for DrugStatusView {
    fn from(drug: &Drug) -> Self {
        Self {
            id: drug.id.clone(),
            name: drug.name.clone(),
            current_stock: drug.current_stock,
            low_stock_threshold: drug.low_stock_threshold,
            low_stock: drug.is_low_stock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_new() {
        let drug = Drug::from_new(
            NewDrug::new("Amoxicillin", "capsule", "500mg")
                .with_stock(40)
                .with_threshold(10),
        );
        assert_eq!(drug.id.len(), 36);
        assert_eq!(drug.current_stock, 40);
        assert!(drug.active);
    }

    #[test]
    fn test_low_stock() {
        let mut drug = Drug::from_new(NewDrug::new("Heparin", "vial", "5000IU/mL").with_threshold(5));
        drug.current_stock = 6;
        assert!(!drug.is_low_stock());
        drug.current_stock = 5;
        assert!(drug.is_low_stock());
    }

    #[test]
    fn test_can_supply() {
        let drug = Drug::from_new(NewDrug::new("Ondansetron", "tablet", "4mg").with_stock(2));
        assert!(drug.can_supply(2));
        assert!(!drug.can_supply(3));
    }

    #[test]
    fn test_status_view_flags_low_stock() {
        let drug = Drug::from_new(NewDrug::new("Morphine", "ampoule", "10mg/mL").with_stock(1).with_threshold(3));
        let view = DrugStatusView::from(&drug);
        assert!(view.low_stock);
        assert_eq!(view.current_stock, 1);
    }
}
