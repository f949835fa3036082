//! Document store: collections of JSON documents with a change feed.
//!
//! DESIGN
//! ======
//! Documents are addressed by a collection path (`parkingLands`,
//! `parkingLands/{landId}/slots`, ...) and a string id. Reads are plain
//! queries; writes always go through an atomic [`WriteBatch`]. Every committed
//! batch publishes one [`ChangeEvent::Changed`] per touched collection on a
//! broadcast channel, which the live query layer turns into fresh snapshots.
//! A backend whose notifications can be lost (Postgres `LISTEN`) also
//! publishes `Interrupted` when its upstream drops and `Resync` once it is
//! back, so every live query re-reads what it may have missed.
//!
//! Two backends implement [`DocumentStore`]: [`memory::MemoryStore`] and
//! [`postgres::PgStore`].

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub mod test_support;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Top-level fields of a document.
pub type Fields = serde_json::Map<String, Value>;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {path}/{id}")]
    NotFound { path: CollectionPath, id: String },
    #[error("document already exists: {path}/{id}")]
    AlreadyExists { path: CollectionPath, id: String },
    #[error("precondition failed on {path}/{id}: {field} changed")]
    PreconditionFailed { path: CollectionPath, id: String, field: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

/// SQLSTATE `insufficient_privilege`.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.code().as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE) {
                return Self::PermissionDenied(db.message().to_owned());
            }
        }
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => Self::Unavailable(e.to_string()),
            other => Self::Database(other),
        }
    }
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::AlreadyExists { .. } => "E_ALREADY_EXISTS",
            Self::PreconditionFailed { .. } => "E_PRECONDITION_FAILED",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
            Self::Unavailable(_) => "E_UNAVAILABLE",
            Self::InvalidDocument(_) => "E_INVALID_DOCUMENT",
            Self::Serialization(_) => "E_SERIALIZATION",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }
}

// =============================================================================
// PATHS + DOCUMENTS
// =============================================================================

/// Slash-separated collection path, e.g. `parkingLands/land1/slots`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    #[must_use]
    pub fn root(name: &str) -> Self {
        Self(name.to_owned())
    }

    /// Sub-collection `name` under document `doc_id` of this collection.
    #[must_use]
    pub fn child(&self, doc_id: &str, name: &str) -> Self {
        Self(format!("{}/{doc_id}/{name}", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CollectionPath {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Decode into a record, injecting the document id under `id_key`.
    /// The document id wins over any stored field of the same name.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the fields don't match the record shape.
    pub fn decode<T: DeserializeOwned>(&self, id_key: &str) -> Result<T, serde_json::Error> {
        let mut fields = self.fields.clone();
        fields.insert(id_key.to_owned(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields))
    }
}

/// Encode a record as document fields, dropping its id key.
///
/// # Errors
///
/// Returns `InvalidDocument` if the value doesn't serialize to an object.
pub fn encode<T: Serialize>(value: &T, id_key: &str) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(mut fields) => {
            fields.remove(id_key);
            Ok(fields)
        }
        other => Err(StoreError::InvalidDocument(format!("expected object, got {other}"))),
    }
}

// =============================================================================
// QUERIES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
}

impl Filter {
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::Eq { field, value } => fields.get(field) == Some(value),
        }
    }
}

/// Equality-filtered, optionally limited query over one collection.
/// Results are ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: CollectionPath,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn collection(path: CollectionPath) -> Self {
        Self { path, filters: Vec::new(), limit: None }
    }

    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::Eq { field: field.into(), value: value.into() });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }
}

// =============================================================================
// WRITES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The current document must hold `value` at `field`.
    FieldEquals { field: String, value: Value },
}

impl Precondition {
    #[must_use]
    pub fn holds(&self, fields: &Fields) -> bool {
        match self {
            Self::FieldEquals { field, value } => fields.get(field) == Some(value),
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::FieldEquals { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document; fails if the id is taken.
    Create { path: CollectionPath, id: String, fields: Fields },
    /// Merge top-level fields into an existing document.
    Update { path: CollectionPath, id: String, fields: Fields, precondition: Option<Precondition> },
}

impl WriteOp {
    #[must_use]
    pub fn path(&self) -> &CollectionPath {
        match self {
            Self::Create { path, .. } | Self::Update { path, .. } => path,
        }
    }
}

/// Ordered set of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn create(mut self, path: CollectionPath, id: impl Into<String>, fields: Fields) -> Self {
        self.ops.push(WriteOp::Create { path, id: id.into(), fields });
        self
    }

    #[must_use]
    pub fn update(mut self, path: CollectionPath, id: impl Into<String>, fields: Fields) -> Self {
        self.ops
            .push(WriteOp::Update { path, id: id.into(), fields, precondition: None });
        self
    }

    #[must_use]
    pub fn update_if(
        mut self,
        path: CollectionPath,
        id: impl Into<String>,
        fields: Fields,
        precondition: Precondition,
    ) -> Self {
        self.ops
            .push(WriteOp::Update { path, id: id.into(), fields, precondition: Some(precondition) });
        self
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct collections written by this batch.
    #[must_use]
    pub fn touched_paths(&self) -> BTreeSet<CollectionPath> {
        self.ops.iter().map(|op| op.path().clone()).collect()
    }
}

// =============================================================================
// CHANGE FEED
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A committed write touched this collection.
    Changed(CollectionPath),
    /// The upstream feed dropped; notifications may be lost until `Resync`.
    Interrupted(String),
    /// The feed is back and may have missed writes: re-read everything.
    Resync,
}

pub const CHANGE_FEED_CAPACITY: usize = 1024;

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend cannot be read.
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError>;

    /// Run a query. Results are ordered by document id.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend cannot be read.
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Commit a batch atomically: either every op applies or none does.
    ///
    /// # Errors
    ///
    /// Returns the first failing op's error (`NotFound`, `AlreadyExists`,
    /// `PreconditionFailed`) or a backend error.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Subscribe to committed-write notifications.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Generate a fresh document id.
    fn new_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Merge fields into one existing document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document doesn't exist.
    async fn update(&self, path: &CollectionPath, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().update(path.clone(), id, fields))
            .await
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
