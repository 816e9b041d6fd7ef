use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};

use super::{Collection, DocumentStore, FieldMap, Filter, WriteOp};

pub(crate) type Tables = HashMap<Collection, BTreeMap<Uuid, Value>>;

/// Failure modes that can be injected for a record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    PermissionDenied,
    Unavailable,
    PreconditionFailed,
}

impl InjectedFailure {
    fn to_error(self, id: Uuid) -> StoreError {
        match self {
            InjectedFailure::PermissionDenied => {
                StoreError::PermissionDenied(format!("write to {id} rejected"))
            }
            InjectedFailure::Unavailable => StoreError::Unavailable(format!("write to {id} timed out")),
            InjectedFailure::PreconditionFailed => {
                StoreError::PreconditionFailed(format!("record {id} changed underneath the write"))
            }
        }
    }
}

/// Process-local document store, used for tests and as the cache behind
/// [`super::JsonFileStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failures: RwLock<HashMap<Uuid, InjectedFailure>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Makes every subsequent write touching `id` fail with `failure`.
    pub fn fail_writes_for(&self, id: Uuid, failure: InjectedFailure) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(id, failure);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.write() {
            failures.clear();
        }
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.read_tables()
            .map(|tables| tables.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Tables as they would look after `ops`, leaving the live tables untouched.
    pub(crate) fn staged(&self, ops: Vec<WriteOp>) -> StoreResult<Tables> {
        for op in &ops {
            self.check_injected(op.id())?;
        }
        let tables = self.read_tables()?;
        Self::stage_onto(&tables, ops)
    }

    pub(crate) fn replace(&self, staged: Tables) -> StoreResult<()> {
        *self.write_tables()? = staged;
        Ok(())
    }

    fn stage_onto(tables: &Tables, ops: Vec<WriteOp>) -> StoreResult<Tables> {
        // Ops within one batch see each other.
        let mut staged = tables.clone();
        for op in ops {
            Self::validate(&staged, &op)?;
            Self::apply_unchecked(&mut staged, op)?;
        }
        Ok(staged)
    }

    fn read_tables(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write_tables(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn check_injected(&self, id: Uuid) -> StoreResult<()> {
        let failures = self
            .failures
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))?;
        match failures.get(&id) {
            Some(failure) => Err(failure.to_error(id)),
            None => Ok(()),
        }
    }

    /// Checks that `op` could be applied to `tables` without changing anything.
    fn validate(tables: &Tables, op: &WriteOp) -> StoreResult<()> {
        let exists = tables
            .get(&op.collection())
            .is_some_and(|table| table.contains_key(&op.id()));
        match op {
            WriteOp::Create { collection, id, .. } if exists => Err(StoreError::AlreadyExists {
                collection: *collection,
                id: *id,
            }),
            WriteOp::Update { collection, id, .. } | WriteOp::Delete { collection, id } if !exists => {
                Err(StoreError::NotFound {
                    collection: *collection,
                    id: *id,
                })
            }
            _ => Ok(()),
        }
    }

    fn apply_unchecked(tables: &mut Tables, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Create {
                collection,
                id,
                record,
            } => {
                tables.entry(collection).or_default().insert(id, record);
            }
            WriteOp::Update {
                collection,
                id,
                fields,
            } => {
                let record = tables
                    .get_mut(&collection)
                    .and_then(|table| table.get_mut(&id))
                    .ok_or(StoreError::NotFound { collection, id })?;
                let object = record.as_object_mut().ok_or_else(|| {
                    StoreError::PreconditionFailed(format!("{collection} record {id} is not an object"))
                })?;
                for (field, value) in fields {
                    object.insert(field, value);
                }
            }
            WriteOp::Delete { collection, id } => {
                if let Some(table) = tables.get_mut(&collection) {
                    table.remove(&id);
                }
            }
        }
        Ok(())
    }

    fn write_one(&self, op: WriteOp) -> StoreResult<()> {
        self.check_injected(op.id())?;
        let mut tables = self.write_tables()?;
        Self::validate(&tables, &op)?;
        Self::apply_unchecked(&mut tables, op)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn list(&self, collection: Collection, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        let tables = self.read_tables()?;
        Ok(tables
            .get(&collection)
            .map(|table| {
                table
                    .values()
                    .filter(|record| filters.iter().all(|filter| filter.matches(record)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>> {
        let tables = self.read_tables()?;
        Ok(tables.get(&collection).and_then(|table| table.get(&id)).cloned())
    }

    async fn create(&self, collection: Collection, id: Uuid, record: Value) -> StoreResult<()> {
        self.write_one(WriteOp::Create {
            collection,
            id,
            record,
        })
    }

    async fn update_fields(&self, collection: Collection, id: Uuid, fields: FieldMap) -> StoreResult<()> {
        self.write_one(WriteOp::Update {
            collection,
            id,
            fields,
        })
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<()> {
        self.write_one(WriteOp::Delete { collection, id })
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        for op in &ops {
            self.check_injected(op.id())?;
        }
        let mut tables = self.write_tables()?;
        *tables = Self::stage_onto(&tables, ops)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_fields_merges_named_fields() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store
            .create(Collection::Orders, id, json!({ "id": id, "paid": false, "total": "10" }))
            .await
            .unwrap();

        let mut fields = FieldMap::new();
        fields.insert("paid".into(), json!(true));
        store.update_fields(Collection::Orders, id, fields).await.unwrap();

        let stored = store.get(Collection::Orders, id).await.unwrap().unwrap();
        assert_eq!(stored["paid"], json!(true));
        assert_eq!(stored["total"], json!("10"));
    }

    #[tokio::test]
    async fn batch_write_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let existing = Uuid::new_v4();
        store
            .create(Collection::Orders, existing, json!({ "id": existing }))
            .await
            .unwrap();

        let fresh = Uuid::new_v4();
        let err = store
            .batch_write(vec![
                WriteOp::Create {
                    collection: Collection::Orders,
                    id: fresh,
                    record: json!({ "id": fresh }),
                },
                WriteOp::Delete {
                    collection: Collection::Orders,
                    id: Uuid::new_v4(),
                },
            ])
            .await
            .expect_err("unknown delete must fail the batch");

        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.count(Collection::Orders), 1);
    }

    #[tokio::test]
    async fn injected_failures_reject_writes() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.fail_writes_for(id, InjectedFailure::PermissionDenied);

        let err = store
            .create(Collection::Invoices, id, json!({ "id": id }))
            .await
            .expect_err("write must be rejected");
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        store.clear_failures();
        store
            .create(Collection::Invoices, id, json!({ "id": id }))
            .await
            .expect("write succeeds once cleared");
    }
}
