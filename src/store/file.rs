use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{Document, DocumentStore, Filter, StoreError, Update, delete_docs, update_docs};

/// One `<collection>.json` array per collection under `dir`. Collections are
/// cached after the first read and the whole file is rewritten on mutation.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Vec<Document>>>,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!("file store opened at {}", dir.display());
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    async fn load<'a>(
        &self,
        cache: &'a mut HashMap<String, Vec<Document>>,
        collection: &str,
    ) -> Result<&'a mut Vec<Document>, StoreError> {
        if !cache.contains_key(collection) {
            let docs = match fs::read(self.path_for(collection)).await {
                Ok(bytes) => serde_json::from_slice::<Vec<Document>>(&bytes).map_err(|e| {
                    StoreError::Corrupt {
                        collection: collection.to_string(),
                        reason: e.to_string(),
                    }
                })?,
                Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            cache.insert(collection.to_string(), docs);
        }
        Ok(cache.entry(collection.to_string()).or_default())
    }

    async fn save(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(docs)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let mut cache = self.cache.lock().await;
        let docs = self.load(&mut cache, collection).await?;
        Ok(docs.iter().filter(|d| filter.matches(d)).cloned().collect())
    }

    async fn insert(&self, collection: &str, new_docs: Vec<Document>) -> Result<(), StoreError> {
        if new_docs.is_empty() {
            return Ok(());
        }
        let mut cache = self.cache.lock().await;
        let docs = self.load(&mut cache, collection).await?;
        docs.extend(new_docs);
        self.save(collection, docs).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<usize, StoreError> {
        let mut cache = self.cache.lock().await;
        let docs = self.load(&mut cache, collection).await?;
        // Apply to a copy so a failing operator leaves cache and disk unchanged.
        let mut next = docs.clone();
        let touched = update_docs(collection, &mut next, filter, update)?;
        if touched > 0 {
            self.save(collection, &next).await?;
            *docs = next;
        }
        Ok(touched)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut cache = self.cache.lock().await;
        let docs = self.load(&mut cache, collection).await?;
        let mut next = docs.clone();
        let removed = delete_docs(&mut next, filter);
        if removed > 0 {
            self.save(collection, &next).await?;
            *docs = next;
        }
        Ok(removed)
    }
}
