//! Read-model and cache integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use medledger_core::cache::{CacheStore, InMemoryCache};
use medledger_core::config::{CacheConfig, DatabaseConfig, EngineConfig};
use medledger_core::{Database, Drug, Engine, EngineError, NewDrug, NewOrder, Principal, Role};

fn admin() -> Principal {
    Principal::new("admin-1", [Role::Admin])
}

fn prescriber() -> Principal {
    Principal::new("dr-1", [Role::Prescriber])
}

fn seed_orders(engine: &Engine, count: usize) -> Drug {
    let drug = engine
        .register_drug(
            &admin(),
            NewDrug::new("Ondansetron", "tablet", "4mg").with_stock((count * 2) as u32),
        )
        .unwrap();
    for i in 0..count {
        let ward = if i % 2 == 0 { "WardA" } else { "WardB" };
        let order = engine
            .create_order(
                &prescriber(),
                NewOrder {
                    patient_name: format!("Patient {}", i),
                    ward: ward.into(),
                    drug_id: drug.id.clone(),
                    dosage: 1,
                    schedule: "q8h".into(),
                    total_doses: None,
                },
            )
            .unwrap();
        engine.administer_dose(&admin(), &order.id, None).unwrap();
    }
    drug
}

fn statements_for_active_orders(count: usize) -> u64 {
    let engine = Engine::open_in_memory().unwrap();
    seed_orders(&engine, count);
    engine.flush_cache();

    engine.stats().reset();
    let views = engine.list_active_orders(&admin()).unwrap();
    assert_eq!(views.len(), count);
    assert!(views.iter().all(|v| v.administrations.len() == 1));
    assert!(views.iter().all(|v| v.drug.is_some()));
    engine.stats().statements()
}

#[test]
fn test_active_orders_query_count_independent_of_rows() {
    let one = statements_for_active_orders(1);
    let ten = statements_for_active_orders(10);
    let thousand = statements_for_active_orders(1000);

    // Parents, administrations, drugs.
    assert_eq!(one, 3);
    assert_eq!(ten, one);
    assert_eq!(thousand, one);
}

#[test]
fn test_my_orders_query_count_bounded() {
    let engine = Engine::open_in_memory().unwrap();
    seed_orders(&engine, 25);

    engine.stats().reset();
    let views = engine.list_my_orders(&prescriber(), "dr-1").unwrap();
    assert_eq!(views.len(), 25);
    assert_eq!(engine.stats().statements(), 3);
}

#[test]
fn test_empty_result_costs_one_statement() {
    let engine = Engine::open_in_memory().unwrap();
    engine.stats().reset();
    assert!(engine.list_my_orders(&prescriber(), "dr-1").unwrap().is_empty());
    assert_eq!(engine.stats().statements(), 1);
}

#[test]
fn test_my_orders_newest_first_and_owner_only() {
    let engine = Engine::open_in_memory().unwrap();
    seed_orders(&engine, 3);

    let views = engine.list_my_orders(&prescriber(), "dr-1").unwrap();
    let patients: Vec<_> = views.iter().map(|v| v.order.patient_name.as_str()).collect();
    assert_eq!(patients, vec!["Patient 2", "Patient 1", "Patient 0"]);

    let colleague = Principal::new("dr-2", [Role::Prescriber]);
    assert!(matches!(
        engine.list_my_orders(&colleague, "dr-1"),
        Err(EngineError::Denied(_))
    ));
    assert_eq!(engine.list_my_orders(&admin(), "dr-1").unwrap().len(), 3);
}

#[test]
fn test_active_orders_scoped_to_ward() {
    let engine = Engine::open_in_memory().unwrap();
    seed_orders(&engine, 5);

    let ward_a = Principal::new("n-1", [Role::Nurse]).in_ward("WardA");
    let ward_b = Principal::new("n-2", [Role::Nurse]).in_ward("WardB");
    let roaming = Principal::new("n-3", [Role::Nurse]);

    let a = engine.list_active_orders(&ward_a).unwrap();
    assert_eq!(a.len(), 3);
    assert!(a.iter().all(|v| v.order.ward == "WardA"));
    assert_eq!(engine.list_active_orders(&ward_b).unwrap().len(), 2);
    assert_eq!(engine.list_active_orders(&roaming).unwrap().len(), 5);
}

#[test]
fn test_formulary_read_idempotence() {
    let engine = Engine::open_in_memory().unwrap();
    seed_orders(&engine, 2);

    engine.stats().reset();
    let first = engine.get_formulary().unwrap();
    let second = engine.get_formulary().unwrap();

    assert_eq!(first, second);
    // One miss reaches the store, the second read is a hit.
    assert_eq!(engine.stats().statements(), 1);
}

#[test]
fn test_scenario_d_invalidation_beats_ttl() {
    let engine = Engine::open_in_memory().unwrap();
    let drug = engine
        .register_drug(&admin(), NewDrug::new("Amiodarone", "vial", "150mg").with_stock(10))
        .unwrap();
    let order = engine
        .create_order(
            &prescriber(),
            NewOrder {
                patient_name: "Pat".into(),
                ward: "WardA".into(),
                drug_id: drug.id.clone(),
                dosage: 4,
                schedule: "once".into(),
                total_doses: None,
            },
        )
        .unwrap();

    // Prime the cache well inside its 60 s TTL.
    assert_eq!(engine.get_inventory_status().unwrap()[0].current_stock, 10);
    let mar = engine.list_active_orders(&admin()).unwrap();
    assert!(mar[0].administrations.is_empty());

    engine.administer_dose(&admin(), &order.id, None).unwrap();

    assert_eq!(engine.get_inventory_status().unwrap()[0].current_stock, 6);
    let mar = engine.list_active_orders(&admin()).unwrap();
    assert_eq!(mar[0].administrations.len(), 1);
}

#[test]
fn test_ttl_expiry_rereads_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ttl.db");
    let engine = Engine::open(EngineConfig {
        database: DatabaseConfig {
            path: path.to_string_lossy().into_owned(),
            pool_size: 2,
            ..DatabaseConfig::default()
        },
        cache: CacheConfig {
            formulary_ttl_secs: 1,
            inventory_ttl_secs: 1,
        },
    })
    .unwrap();
    let drug = engine
        .register_drug(&admin(), NewDrug::new("Digoxin", "tablet", "125mcg").with_stock(30))
        .unwrap();
    assert_eq!(engine.get_inventory_status().unwrap()[0].current_stock, 30);

    // A writer outside this engine changes stock; the cache cannot know.
    let outside = Database::open(&path).unwrap();
    outside
        .conn()
        .execute(
            "UPDATE drugs SET current_stock = 12 WHERE id = ?",
            [&drug.id],
        )
        .unwrap();

    assert_eq!(engine.get_inventory_status().unwrap()[0].current_stock, 30);
    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(engine.get_inventory_status().unwrap()[0].current_stock, 12);
}

/// Cache store that counts writes, wrapping the in-memory store.
#[derive(Default)]
struct CountingCache {
    inner: InMemoryCache,
    puts: AtomicUsize,
}

impl CacheStore for CountingCache {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, ttl);
    }

    fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

#[test]
fn test_injected_cache_store() {
    let store = Arc::new(CountingCache::default());
    let engine = Engine::with_cache_store(EngineConfig::in_memory(), store.clone()).unwrap();
    engine
        .register_drug(&admin(), NewDrug::new("Labetalol", "vial", "100mg").with_stock(3))
        .unwrap();

    engine.get_formulary().unwrap();
    engine.get_formulary().unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);

    engine.flush_cache();
    engine.get_formulary().unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_write_keeps_cache() {
    let store = Arc::new(CountingCache::default());
    let engine = Engine::with_cache_store(EngineConfig::in_memory(), store.clone()).unwrap();
    engine.get_inventory_status().unwrap();

    let err = engine.receive_stock(&admin(), "missing", 5, None).unwrap_err();
    assert!(matches!(err, EngineError::DrugNotFound(_)));

    // Still served from cache: no new population happened.
    engine.get_inventory_status().unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
}
