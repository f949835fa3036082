//! In-memory document store.
//!
//! Used when no `DATABASE_URL` is configured and as the backing store in
//! tests. Batches are applied to a staged copy of every touched collection
//! and swapped in only when all ops succeed.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use super::{
    CHANGE_FEED_CAPACITY, ChangeEvent, CollectionPath, Document, DocumentStore, Fields, Query, StoreError, WriteBatch,
    WriteOp,
};

type Collection = BTreeMap<String, Fields>;

pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionPath, Collection>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { collections: RwLock::new(HashMap::new()), changes }
    }

    /// Number of documents in one collection.
    #[cfg(test)]
    pub async fn count(&self, path: &CollectionPath) -> usize {
        let collections = self.collections.read().await;
        collections.get(path).map_or(0, BTreeMap::len)
    }

    /// Push a raw event onto the change feed, as a remote listener would.
    #[cfg(test)]
    pub fn announce(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_op(staged: &mut HashMap<CollectionPath, Collection>, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Create { path, id, fields } => {
            let collection = staged.entry(path.clone()).or_default();
            if collection.contains_key(&id) {
                return Err(StoreError::AlreadyExists { path, id });
            }
            collection.insert(id, fields);
        }
        WriteOp::Update { path, id, fields, precondition } => {
            let Some(current) = staged.get_mut(&path).and_then(|c| c.get_mut(&id)) else {
                return Err(StoreError::NotFound { path, id });
            };
            if let Some(pre) = &precondition {
                if !pre.holds(current) {
                    let field = pre.field().to_owned();
                    return Err(StoreError::PreconditionFailed { path, id, field });
                }
            }
            for (key, value) in fields {
                current.insert(key, value);
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(path)
            .and_then(|c| c.get(id))
            .map(|fields| Document { id: id.to_owned(), fields: fields.clone() }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&query.path) else {
            return Ok(Vec::new());
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(collection
            .iter()
            .filter(|(_, fields)| query.matches(fields))
            .take(limit)
            .map(|(id, fields)| Document { id: id.clone(), fields: fields.clone() })
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let touched = batch.touched_paths();

        {
            let mut collections = self.collections.write().await;
            let mut staged: HashMap<CollectionPath, Collection> = touched
                .iter()
                .filter_map(|path| collections.get(path).map(|c| (path.clone(), c.clone())))
                .collect();

            for op in batch.ops().iter().cloned() {
                apply_op(&mut staged, op)?;
            }

            for (path, collection) in staged {
                collections.insert(path, collection);
            }
        }

        debug!(ops = batch.len(), collections = touched.len(), "memory store: batch committed");
        for path in touched {
            // No receivers is fine: nobody is listening yet.
            let _ = self.changes.send(ChangeEvent::Changed(path));
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
