use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::utils::{ensure_dir, staging_path, store_file};
use crate::errors::{StoreError, StoreResult};

use super::memory::{InMemoryStore, Tables};
use super::{Collection, DocumentStore, FieldMap, Filter, WriteOp};

pub const STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default = "StoreFile::schema_version_default")]
    schema_version: u32,
    #[serde(default)]
    collections: BTreeMap<String, BTreeMap<Uuid, Value>>,
}

impl StoreFile {
    fn schema_version_default() -> u32 {
        STORE_SCHEMA_VERSION
    }
}

/// Single-file JSON persistence for every collection.
///
/// Records are served from memory; each write rewrites the file through a
/// temporary sibling and a rename, and the cache only takes the new state
/// once the rename has landed.
pub struct JsonFileStore {
    path: PathBuf,
    cache: InMemoryStore,
    flush_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tables = if tokio::fs::try_exists(&path).await? {
            let data = tokio::fs::read_to_string(&path).await?;
            let file: StoreFile = serde_json::from_str(&data)?;
            if file.schema_version > STORE_SCHEMA_VERSION {
                return Err(StoreError::PreconditionFailed(format!(
                    "store file `{}` uses schema v{} but v{} is the newest supported",
                    path.display(),
                    file.schema_version,
                    STORE_SCHEMA_VERSION
                )));
            }
            into_tables(file)?
        } else {
            HashMap::new()
        };
        tracing::debug!(path = %path.display(), "opened json store");
        Ok(Self {
            path,
            cache: InMemoryStore::from_tables(tables),
            flush_lock: Mutex::new(()),
        })
    }

    /// Opens `store.json` inside the application data directory.
    pub async fn open_default() -> StoreResult<Self> {
        Self::open(store_file()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let _guard = self.flush_lock.lock().await;
        let staged = self.cache.staged(ops)?;
        let file = StoreFile {
            schema_version: STORE_SCHEMA_VERSION,
            collections: export(&staged),
        };
        let json = serde_json::to_string_pretty(&file)?;
        if let Err(err) = write_atomic(&self.path, &json).await {
            tracing::warn!(path = %self.path.display(), error = %err, "store write failed; cache unchanged");
            return Err(err);
        }
        self.cache.replace(staged)
    }
}

fn export(tables: &Tables) -> BTreeMap<String, BTreeMap<Uuid, Value>> {
    Collection::ALL
        .iter()
        .map(|collection| {
            (
                collection.as_str().to_string(),
                tables.get(collection).cloned().unwrap_or_default(),
            )
        })
        .collect()
}

fn into_tables(file: StoreFile) -> StoreResult<Tables> {
    let mut tables = HashMap::new();
    for (name, rows) in file.collections {
        let collection = Collection::ALL
            .into_iter()
            .find(|collection| collection.as_str() == name)
            .ok_or_else(|| StoreError::PreconditionFailed(format!("unknown collection `{name}`")))?;
        tables.insert(collection, rows);
    }
    Ok(tables)
}

async fn write_atomic(path: &Path, data: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = staging_path(path);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn list(&self, collection: Collection, filters: &[Filter]) -> StoreResult<Vec<Value>> {
        self.cache.list(collection, filters).await
    }

    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>> {
        self.cache.get(collection, id).await
    }

    async fn create(&self, collection: Collection, id: Uuid, record: Value) -> StoreResult<()> {
        self.commit(vec![WriteOp::Create { collection, id, record }]).await
    }

    async fn update_fields(&self, collection: Collection, id: Uuid, fields: FieldMap) -> StoreResult<()> {
        self.commit(vec![WriteOp::Update { collection, id, fields }]).await
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<()> {
        self.commit(vec![WriteOp::Delete { collection, id }]).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.commit(ops).await
    }
}
