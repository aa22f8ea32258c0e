//! Document-store seam.
//!
//! The core is a logic layer over an injected store that provides atomic
//! multi-document writes, field-level mutation operators, and push-based
//! change listeners per query. `MemoryStore` is the in-process reference
//! implementation used by tests and single-instance hosts.

pub mod memory;

pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("invalid field operation on {path}: {reason}")]
    InvalidField { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ─── Documents ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ─── Queries ───────────────────────────────────────────

/// Equality / array-contains query over one collection.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub equals: Vec<(String, Value)>,
    pub array_contains: Vec<(String, Value)>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            equals: Vec::new(),
            array_contains: Vec::new(),
        }
    }

    pub fn where_eq(mut self, path: &str, value: Value) -> Self {
        self.equals.push((path.to_string(), value));
        self
    }

    pub fn where_array_contains(mut self, path: &str, value: Value) -> Self {
        self.array_contains.push((path.to_string(), value));
        self
    }

    /// Whether a document currently satisfies every filter.
    pub fn matches(&self, data: &Value) -> bool {
        self.equals
            .iter()
            .all(|(path, expected)| field_at(data, path) == Some(expected))
            && self.array_contains.iter().all(|(path, expected)| {
                matches!(field_at(data, path), Some(Value::Array(items)) if items.contains(expected))
            })
    }
}

/// Resolve a dotted field path inside a document.
pub(crate) fn field_at<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

// ─── Write Operations ──────────────────────────────────

/// Field-level mutation inside an `Update`. Paths are dotted; map-valued
/// fields (e.g. per-user counters) are addressed as `field.<user_id>`.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Set { path: String, value: Value },
    Increment { path: String, by: i64 },
    ArrayUnion { path: String, values: Vec<Value> },
    ArrayRemove { path: String, values: Vec<Value> },
    DeleteField { path: String },
}

impl FieldOp {
    pub fn set(path: &str, value: Value) -> Self {
        Self::Set { path: path.to_string(), value }
    }

    pub fn increment(path: &str, by: i64) -> Self {
        Self::Increment { path: path.to_string(), by }
    }

    pub fn array_union(path: &str, values: Vec<Value>) -> Self {
        Self::ArrayUnion { path: path.to_string(), values }
    }

    pub fn array_remove(path: &str, values: Vec<Value>) -> Self {
        Self::ArrayRemove { path: path.to_string(), values }
    }

    pub fn delete_field(path: &str) -> Self {
        Self::DeleteField { path: path.to_string() }
    }
}

/// One operation inside an atomic batch. `Insert` is create-only: a batch
/// containing an insert for an existing id fails as a whole.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert { collection: String, id: String, data: Value },
    Update { collection: String, id: String, ops: Vec<FieldOp> },
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn insert<T: Serialize>(collection: &str, id: impl Into<String>, value: &T) -> StoreResult<Self> {
        Ok(Self::Insert {
            collection: collection.to_string(),
            id: id.into(),
            data: serde_json::to_value(value)?,
        })
    }

    pub fn update(collection: &str, id: impl Into<String>, ops: Vec<FieldOp>) -> Self {
        Self::Update {
            collection: collection.to_string(),
            id: id.into(),
            ops,
        }
    }

    pub fn delete(collection: &str, id: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.to_string(),
            id: id.into(),
        }
    }
}

// ─── Change Listeners ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Change event carrying the full current document. `Removed` carries the
/// last state the query saw (a document can leave a query without being
/// deleted, e.g. when a group goes inactive).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Cancellable handle to one change-listener registration.
///
/// Events arrive in the store's commit order for this query; there is no
/// ordering guarantee across independent subscriptions. Dropping the
/// handle (or calling `unsubscribe`) unregisters the listener; owners
/// must do so when their context ends or callbacks leak.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next event, or `None` once the store side is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant for draining already-delivered events.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// ─── Store Trait ───────────────────────────────────────

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document by id.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// All documents currently matching the query, in stable id order.
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Apply a batch atomically: every operation succeeds or none does,
    /// and listeners never observe partial state.
    async fn atomic_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Register a change listener. The current matching set is delivered
    /// first as `Added` events, then incremental changes in commit order.
    async fn watch(&self, query: Query) -> StoreResult<Subscription>;
}
