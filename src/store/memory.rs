use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, Filter, StoreError, Update, delete_docs, update_docs};

/// Volatile store; collections live in a map of vectors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let cols = self.collections.read().await;
        Ok(cols
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let mut cols = self.collections.write().await;
        cols.entry(collection.to_string()).or_default().extend(docs);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError> {
        let mut cols = self.collections.write().await;
        match cols.get_mut(collection) {
            Some(docs) => update_docs(collection, docs, filter, update),
            None => Ok(0),
        }
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut cols = self.collections.write().await;
        Ok(cols
            .get_mut(collection)
            .map(|docs| delete_docs(docs, filter))
            .unwrap_or(0))
    }
}
