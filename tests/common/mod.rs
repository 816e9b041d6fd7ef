#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tempfile::TempDir;
use tradebook_core::{
    config::{ConfigManager, EngineConfig},
    domain::{Invoice, LedgerEntry, Order},
    storage::{Document, DocumentStore, InMemoryStore, Repository},
    PaymentEngine,
};
use uuid::Uuid;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Creates a JSON-backed engine and config manager in a unique directory.
pub async fn setup_test_env() -> (PaymentEngine, ConfigManager) {
    let temp = TempDir::new().expect("create temp dir");
    let base = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);

    let config_manager = ConfigManager::with_base_dir(base.clone()).expect("create config manager for temp dir");
    let config = config_manager.load().expect("load default config");
    let engine = PaymentEngine::open_json(base.join("store.json"), config)
        .await
        .expect("open json store");
    (engine, config_manager)
}

/// Engine over an in-memory store, with the store handle kept for fault injection.
pub fn memory_engine(config: EngineConfig) -> (Arc<InMemoryStore>, PaymentEngine) {
    let memory = Arc::new(InMemoryStore::new());
    let store: Arc<dyn DocumentStore> = memory.clone();
    (memory, PaymentEngine::new(store, config))
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, d).expect("valid day")
}

pub async fn seed<T: Document>(engine: &PaymentEngine, records: &[T]) {
    let repo = Repository::<T>::new(engine.store());
    for record in records {
        repo.create(record).await.expect("seed record");
    }
}

pub async fn order(engine: &PaymentEngine, id: Uuid) -> Order {
    Repository::<Order>::new(engine.store())
        .require(id)
        .await
        .expect("order exists")
}

pub async fn invoice(engine: &PaymentEngine, id: Uuid) -> Invoice {
    Repository::<Invoice>::new(engine.store())
        .require(id)
        .await
        .expect("invoice exists")
}

pub async fn entry(engine: &PaymentEngine, id: Uuid) -> Option<LedgerEntry> {
    Repository::<LedgerEntry>::new(engine.store())
        .get(id)
        .await
        .expect("read ledger entry")
}
