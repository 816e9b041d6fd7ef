//! Document-store collaborator: the only persistence contract the payment
//! services depend on.

pub mod json_backend;
pub mod memory;

use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{Identifiable, Invoice, LedgerEntry, Order, PartyPayment};
use crate::errors::{StoreError, StoreResult};

pub use json_backend::JsonFileStore;
pub use memory::InMemoryStore;

/// Named top-level fields to merge into a stored record.
pub type FieldMap = Map<String, Value>;

/// Record collections known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Orders,
    Invoices,
    LedgerEntries,
    PartyPayments,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Orders,
        Collection::Invoices,
        Collection::LedgerEntries,
        Collection::PartyPayments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Invoices => "invoices",
            Collection::LedgerEntries => "ledger_entries",
            Collection::PartyPayments => "party_payments",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create {
        collection: Collection,
        id: Uuid,
        record: Value,
    },
    Update {
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    },
    Delete {
        collection: Collection,
        id: Uuid,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Create { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            WriteOp::Create { id, .. } | WriteOp::Update { id, .. } | WriteOp::Delete { id, .. } => *id,
        }
    }
}

/// Abstraction over remote or local document stores.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, collection: Collection, filters: &[Filter]) -> StoreResult<Vec<Value>>;
    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>>;
    async fn create(&self, collection: Collection, id: Uuid, record: Value) -> StoreResult<()>;
    async fn update_fields(&self, collection: Collection, id: Uuid, fields: FieldMap) -> StoreResult<()>;
    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<()>;
    /// Applies every op or none of them.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Applies a single op outside of any batch.
    async fn apply(&self, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Create {
                collection,
                id,
                record,
            } => self.create(collection, id, record).await,
            WriteOp::Update {
                collection,
                id,
                fields,
            } => self.update_fields(collection, id, fields).await,
            WriteOp::Delete { collection, id } => self.delete(collection, id).await,
        }
    }
}

/// Records that live in a store collection.
pub trait Document: Identifiable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;
}

impl Document for Order {
    const COLLECTION: Collection = Collection::Orders;
}

impl Document for Invoice {
    const COLLECTION: Collection = Collection::Invoices;
}

impl Document for LedgerEntry {
    const COLLECTION: Collection = Collection::LedgerEntries;
}

impl Document for PartyPayment {
    const COLLECTION: Collection = Collection::PartyPayments;
}

/// Serializes a patch struct into named top-level fields.
pub fn to_fields<T: Serialize>(patch: &T) -> StoreResult<FieldMap> {
    match serde_json::to_value(patch)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::PreconditionFailed(format!(
            "expected an object patch, got `{other}`"
        ))),
    }
}

/// Typed access to one collection.
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn find(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        let rows = self.store.list(T::COLLECTION, filters).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    pub async fn all(&self) -> StoreResult<Vec<T>> {
        self.find(&[]).await
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Option<T>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: Uuid) -> StoreResult<T> {
        self.get(id).await?.ok_or(StoreError::NotFound {
            collection: T::COLLECTION,
            id,
        })
    }

    pub async fn create(&self, record: &T) -> StoreResult<()> {
        self.store
            .create(T::COLLECTION, record.id(), serde_json::to_value(record)?)
            .await
    }

    pub async fn update_fields(&self, id: Uuid, fields: FieldMap) -> StoreResult<()> {
        self.store.update_fields(T::COLLECTION, id, fields).await
    }

    pub async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.store.delete(T::COLLECTION, id).await
    }

    pub fn create_op(record: &T) -> StoreResult<WriteOp> {
        Ok(WriteOp::Create {
            collection: T::COLLECTION,
            id: record.id(),
            record: serde_json::to_value(record)?,
        })
    }

    pub fn update_op(id: Uuid, fields: FieldMap) -> WriteOp {
        WriteOp::Update {
            collection: T::COLLECTION,
            id,
            fields,
        }
    }

    pub fn delete_op(id: Uuid) -> WriteOp {
        WriteOp::Delete {
            collection: T::COLLECTION,
            id,
        }
    }
}
