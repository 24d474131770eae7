pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

pub type Document = Value;

/// Singleton chain parameters document.
pub const BLOCKCHAIN: &str = "blockchain";
pub const BLOCKS: &str = "blocks";
pub const ACCOUNTS: &str = "accounts";
pub const PENDING_TRANSACTIONS: &str = "pendingTransactions";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt document in `{collection}`: {reason}")]
    Corrupt { collection: String, reason: String },
}

/// Conjunction of top-level field equalities. An empty filter matches every document.
#[derive(Debug, Clone, Default)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

/// Single-document update operators.
#[derive(Debug, Clone)]
pub enum Update {
    /// Overwrite (or add) the given fields.
    Set(Map<String, Value>),
    /// Add to an integer field; a missing field counts as zero.
    Inc(String, i64),
}

impl Update {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), value.into());
        Update::Set(map)
    }

    pub fn inc(field: &str, by: i64) -> Self {
        Update::Inc(field.to_string(), by)
    }

    fn apply(&self, collection: &str, doc: &mut Document) -> Result<(), StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            collection: collection.to_string(),
            reason,
        };
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| corrupt("document is not an object".into()))?;

        match self {
            Update::Set(fields) => {
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
            }
            Update::Inc(field, by) => {
                let current = match obj.get(field) {
                    None => 0,
                    Some(v) => v
                        .as_i64()
                        .ok_or_else(|| corrupt(format!("`{field}` is not an integer")))?,
                };
                let next = current
                    .checked_add(*by)
                    .ok_or_else(|| corrupt(format!("`{field}` overflowed")))?;
                obj.insert(field.clone(), Value::from(next));
            }
        }
        Ok(())
    }
}

/// Key-scoped document store the core persists through. Each call is atomic on
/// its own; nothing spans calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError>;

    /// Returns the number of documents touched.
    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError>;

    /// Returns the number of documents removed.
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError>;
}

pub async fn find_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .find(collection, filter)
        .await?
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
        .collect()
}

pub async fn find_one_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &Filter,
) -> Result<Option<T>, StoreError> {
    Ok(find_as(store, collection, filter).await?.into_iter().next())
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    Ok(serde_json::to_value(value)?)
}

// Shared by both backends: they only differ in where the vectors live.
fn update_docs(
    collection: &str,
    docs: &mut [Document],
    filter: &Filter,
    update: &Update,
) -> Result<usize, StoreError> {
    let mut touched = 0;
    for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
        update.apply(collection, doc)?;
        touched += 1;
    }
    Ok(touched)
}

fn delete_docs(docs: &mut Vec<Document>, filter: &Filter) -> usize {
    let before = docs.len();
    docs.retain(|d| !filter.matches(d));
    before - docs.len()
}
