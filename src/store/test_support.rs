//! Store wrappers for failure-path tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use super::memory::MemoryStore;
use super::{ChangeEvent, CollectionPath, Document, DocumentStore, Query, StoreError, WriteBatch};

/// `MemoryStore` whose reads fail with `PermissionDenied` and whose commits
/// fail with `Unavailable` on demand. Query failures can be scoped to one
/// collection.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    fail_path: std::sync::Mutex<Option<CollectionPath>>,
    fail_queries: AtomicBool,
    fail_commits: AtomicBool,
}

impl FlakyStore {
    #[must_use]
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_path: std::sync::Mutex::new(None),
            fail_queries: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Fail queries against `path` only.
    pub fn fail_queries_on(&self, path: CollectionPath) {
        *self.fail_path.lock().unwrap() = Some(path);
        self.fail_queries.store(true, Ordering::SeqCst);
    }

    pub fn fail_all_queries(&self, fail: bool) {
        *self.fail_path.lock().unwrap() = None;
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn query_fails(&self, path: &CollectionPath) -> bool {
        if !self.fail_queries.load(Ordering::SeqCst) {
            return false;
        }
        self.fail_path
            .lock()
            .unwrap()
            .as_ref()
            .is_none_or(|p| p == path)
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        if self.query_fails(&query.path) {
            return Err(StoreError::PermissionDenied(format!("read {}", query.path)));
        }
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commits disabled".into()));
        }
        self.inner.commit(batch).await
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes()
    }
}
