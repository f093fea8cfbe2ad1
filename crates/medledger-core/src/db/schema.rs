//! SQLite schema definition.

/// Complete database schema for medledger.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Stock Ledger (formulary + balance)
-- ============================================================================

CREATE TABLE IF NOT EXISTS drugs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    form TEXT NOT NULL,
    strength TEXT NOT NULL,
    current_stock INTEGER NOT NULL CHECK (current_stock >= 0),
    low_stock_threshold INTEGER NOT NULL DEFAULT 0 CHECK (low_stock_threshold >= 0),
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_drugs_name ON drugs(name);

-- ============================================================================
-- Orders (mutable until terminal)
-- ============================================================================

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    patient_name TEXT NOT NULL,
    ward TEXT NOT NULL,
    drug_id TEXT NOT NULL REFERENCES drugs(id),
    dosage INTEGER NOT NULL CHECK (dosage > 0),
    schedule TEXT NOT NULL,
    total_doses INTEGER CHECK (total_doses IS NULL OR total_doses > 0),
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'completed', 'discontinued')),
    prescriber_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_status_ward ON orders(status, ward);
CREATE INDEX IF NOT EXISTS idx_orders_prescriber ON orders(prescriber_id);
CREATE INDEX IF NOT EXISTS idx_orders_drug ON orders(drug_id);

-- Terminal orders are immutable
CREATE TRIGGER IF NOT EXISTS orders_terminal_immutable BEFORE UPDATE ON orders
WHEN old.status <> 'active'
BEGIN
    SELECT RAISE(ABORT, 'Terminal orders cannot be modified');
END;

-- ============================================================================
-- Audit Trail (Append-Only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS administrations (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL REFERENCES orders(id),
    drug_id TEXT NOT NULL REFERENCES drugs(id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    administrator_id TEXT NOT NULL,
    administered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_administrations_order ON administrations(order_id);

CREATE TABLE IF NOT EXISTS transfers (
    id TEXT PRIMARY KEY,
    drug_id TEXT NOT NULL REFERENCES drugs(id),
    source_ward TEXT NOT NULL,
    destination_ward TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    initiator_id TEXT NOT NULL,
    transferred_at TEXT NOT NULL,
    CHECK (source_ward <> destination_ward)
);

CREATE INDEX IF NOT EXISTS idx_transfers_drug ON transfers(drug_id);

CREATE TABLE IF NOT EXISTS stock_receipts (
    id TEXT PRIMARY KEY,
    drug_id TEXT NOT NULL REFERENCES drugs(id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    received_by TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stock_receipts_drug ON stock_receipts(drug_id);

-- Audit rows are never updated or deleted
CREATE TRIGGER IF NOT EXISTS administrations_no_update BEFORE UPDATE ON administrations
BEGIN
    SELECT RAISE(ABORT, 'Administrations are append-only');
END;

CREATE TRIGGER IF NOT EXISTS administrations_no_delete BEFORE DELETE ON administrations
BEGIN
    SELECT RAISE(ABORT, 'Administrations are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transfers_no_update BEFORE UPDATE ON transfers
BEGIN
    SELECT RAISE(ABORT, 'Transfers are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transfers_no_delete BEFORE DELETE ON transfers
BEGIN
    SELECT RAISE(ABORT, 'Transfers are append-only');
END;

-- ============================================================================
-- Idempotency Keys
-- ============================================================================

CREATE TABLE IF NOT EXISTS idempotency_keys (
    key TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    fingerprint TEXT NOT NULL,           -- SHA-256 of canonical request JSON
    result_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
