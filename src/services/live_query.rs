//! Live queries: a query re-run on every change to its collection.
//!
//! DESIGN
//! ======
//! Each live query is one spawned task. It subscribes to the store's change
//! feed *before* running the initial query, so a write landing between the
//! two is never missed. Every delivery is a complete snapshot; consumers
//! replace state, never merge.
//!
//! ERROR HANDLING
//! ==============
//! A failed query is delivered as [`SnapshotEvent::Error`] and is not
//! retried. The task stays attached to the change feed, so the next change
//! to the collection produces a fresh snapshot. A lagged change receiver
//! triggers one re-query; a closed feed ends the task after reporting it.
//!
//! An interrupted feed is reported as `StoreError::Unavailable` without
//! re-querying; the matching `Resync` re-queries every live query, whatever
//! its collection.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{ChangeEvent, Document, DocumentStore, Query, StoreError};

#[derive(Debug)]
pub enum SnapshotEvent {
    Snapshot(Vec<Document>),
    Error(StoreError),
}

/// Handle to a running live query. Dropping it stops the query.
pub struct LiveQuery {
    handle: JoinHandle<()>,
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a live query. `on_event` runs once for the initial snapshot and
/// again after every change to `query.path`. Deliveries are sequential.
pub fn spawn_live_query<F, Fut>(store: Arc<dyn DocumentStore>, query: Query, mut on_event: F) -> LiveQuery
where
    F: FnMut(SnapshotEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut changes = store.changes();

        on_event(run_query(store.as_ref(), &query).await).await;

        loop {
            match changes.recv().await {
                Ok(ChangeEvent::Changed(path)) if path == query.path => {}
                Ok(ChangeEvent::Changed(_)) => continue,
                Ok(ChangeEvent::Resync) => {
                    debug!(path = %query.path, "change feed resynced; re-querying");
                }
                Ok(ChangeEvent::Interrupted(reason)) => {
                    on_event(SnapshotEvent::Error(StoreError::Unavailable(reason))).await;
                    continue;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(path = %query.path, skipped, "live query lagged; re-querying");
                }
                Err(RecvError::Closed) => {
                    warn!(path = %query.path, "change feed closed; live query stopped");
                    on_event(SnapshotEvent::Error(StoreError::Unavailable("change feed closed".into()))).await;
                    break;
                }
            }
            on_event(run_query(store.as_ref(), &query).await).await;
        }
    });

    LiveQuery { handle }
}

async fn run_query(store: &dyn DocumentStore, query: &Query) -> SnapshotEvent {
    match store.query(query).await {
        Ok(docs) => SnapshotEvent::Snapshot(docs),
        Err(e) => {
            warn!(path = %query.path, error = %e, "live query failed");
            SnapshotEvent::Error(e)
        }
    }
}

#[cfg(test)]
#[path = "live_query_test.rs"]
mod tests;
