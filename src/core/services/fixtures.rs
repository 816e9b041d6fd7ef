//! Shared builders for service unit tests.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::storage::{Document, DocumentStore, InMemoryStore, Repository};

pub(crate) fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

pub(crate) fn memory_store() -> (Arc<InMemoryStore>, Arc<dyn DocumentStore>) {
    let memory = Arc::new(InMemoryStore::new());
    let store: Arc<dyn DocumentStore> = memory.clone();
    (memory, store)
}

pub(crate) fn config() -> EngineConfig {
    EngineConfig::default()
}

pub(crate) async fn seed<T: Document>(store: &Arc<dyn DocumentStore>, records: &[T]) {
    let repo = Repository::<T>::new(Arc::clone(store));
    for record in records {
        repo.create(record).await.unwrap();
    }
}

pub(crate) async fn load<T: Document>(store: &Arc<dyn DocumentStore>, id: Uuid) -> T {
    Repository::<T>::new(Arc::clone(store)).require(id).await.unwrap()
}
