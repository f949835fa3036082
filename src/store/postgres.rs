//! `PostgreSQL` document store.
//!
//! DESIGN
//! ======
//! All collections share one `documents` table keyed by `(collection, id)`
//! with a `jsonb` body. Equality filters become a jsonb containment test.
//! A batch runs in one transaction and issues `pg_notify` per touched
//! collection; notifications are delivered on commit, so the change feed
//! never announces a write that was rolled back.
//!
//! A background `PgListener` task forwards notifications into the local
//! broadcast channel. Notifications from other server processes arrive the
//! same way.
//!
//! LIFECYCLE
//! =========
//! When the listener connection drops, `ChangeEvent::Interrupted` goes out
//! at once so subscribers can surface the outage. The task then retries
//! until the connection (and its LISTEN) is back and sends
//! `ChangeEvent::Resync`, since any writes in between went unannounced.
//! The task is aborted when the store is dropped.

use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    CHANGE_FEED_CAPACITY, ChangeEvent, CollectionPath, Document, DocumentStore, Fields, Query, StoreError, WriteBatch,
    WriteOp,
};

const NOTIFY_CHANNEL: &str = "parkwise_documents";
const LISTENER_RETRY_MS: u64 = 1000;

/// Owns the listener task and aborts it on drop.
struct ListenerTask(JoinHandle<()>);

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
    _listener: ListenerTask,
}

impl PgStore {
    /// Start listening for change notifications and wrap the pool.
    ///
    /// # Errors
    ///
    /// Returns a database error if the listener connection cannot be opened.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        info!(channel = NOTIFY_CHANNEL, "document change listener started");

        let handle = tokio::spawn(forward_notifications(listener, changes.clone()));

        Ok(Self { pool, changes, _listener: ListenerTask(handle) })
    }
}

async fn forward_notifications(mut listener: PgListener, tx: broadcast::Sender<ChangeEvent>) {
    loop {
        let reason = match listener.try_recv().await {
            Ok(Some(notification)) => {
                let _ = tx.send(ChangeEvent::Changed(CollectionPath::from(notification.payload())));
                continue;
            }
            Ok(None) => "listener connection closed".to_owned(),
            Err(e) => e.to_string(),
        };

        warn!(error = %reason, "document change listener interrupted");
        let _ = tx.send(ChangeEvent::Interrupted(reason));
        reconnect(&mut listener).await;
        info!(channel = NOTIFY_CHANNEL, "document change listener resumed");
        let _ = tx.send(ChangeEvent::Resync);
    }
}

/// Any statement on the listener reconnects it and re-issues its LISTENs.
async fn reconnect(listener: &mut PgListener) {
    loop {
        match sqlx::query("SELECT 1").execute(&mut *listener).await {
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "document change listener reconnect failed; retrying");
                tokio::time::sleep(Duration::from_millis(LISTENER_RETRY_MS)).await;
            }
        }
    }
}

fn limit_param(limit: Option<usize>) -> Option<i64> {
    limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX))
}

fn filters_object(query: &Query) -> Value {
    let mut object = Fields::new();
    for filter in &query.filters {
        match filter {
            super::Filter::Eq { field, value } => {
                object.insert(field.clone(), value.clone());
            }
        }
    }
    Value::Object(object)
}

fn into_fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

#[async_trait::async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, (String, Value)>(
            "SELECT id, fields FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(path.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, fields)| Document { id, fields: into_fields(fields) }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Value)>(
            "SELECT id, fields FROM documents
             WHERE collection = $1 AND fields @> $2
             ORDER BY id ASC
             LIMIT $3",
        )
        .bind(query.path.as_str())
        .bind(filters_object(query))
        .bind(limit_param(query.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, fields)| Document { id, fields: into_fields(fields) })
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for op in batch.ops() {
            match op {
                WriteOp::Create { path, id, fields } => {
                    let result = sqlx::query(
                        "INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3)
                         ON CONFLICT (collection, id) DO NOTHING",
                    )
                    .bind(path.as_str())
                    .bind(id)
                    .bind(Value::Object(fields.clone()))
                    .execute(tx.as_mut())
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::AlreadyExists { path: path.clone(), id: id.clone() });
                    }
                }
                WriteOp::Update { path, id, fields, precondition } => {
                    let guard = match precondition {
                        Some(super::Precondition::FieldEquals { field, value }) => {
                            let mut object = Fields::new();
                            object.insert(field.clone(), value.clone());
                            Value::Object(object)
                        }
                        None => Value::Object(Fields::new()),
                    };
                    let result = sqlx::query(
                        "UPDATE documents SET fields = fields || $3, updated_at = now()
                         WHERE collection = $1 AND id = $2 AND fields @> $4",
                    )
                    .bind(path.as_str())
                    .bind(id)
                    .bind(Value::Object(fields.clone()))
                    .bind(guard)
                    .execute(tx.as_mut())
                    .await?;

                    if result.rows_affected() == 0 {
                        let exists: bool = sqlx::query_scalar(
                            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = $1 AND id = $2)",
                        )
                        .bind(path.as_str())
                        .bind(id)
                        .fetch_one(tx.as_mut())
                        .await?;
                        return Err(match (exists, precondition) {
                            (true, Some(pre)) => StoreError::PreconditionFailed {
                                path: path.clone(),
                                id: id.clone(),
                                field: pre.field().to_owned(),
                            },
                            _ => StoreError::NotFound { path: path.clone(), id: id.clone() },
                        });
                    }
                }
            }
        }

        for path in batch.touched_paths() {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(NOTIFY_CHANNEL)
                .bind(path.as_str())
                .execute(tx.as_mut())
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
