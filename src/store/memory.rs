use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    ChangeEvent, ChangeKind, Document, DocumentStore, FieldOp, Query, StoreError,
    StoreResult, Subscription, WriteOp,
};

struct Watcher {
    query: Query,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// In-memory document store for tests and single-instance hosts.
///
/// A single `RwLock` over the collection tree gives batches snapshot
/// atomicity; listener events are emitted while the write lock is held so
/// each subscription observes commit order.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    watchers: Arc<DashMap<u64, Watcher>>,
    next_watcher_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            watchers: Arc::new(DashMap::new()),
            next_watcher_id: AtomicU64::new(1),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, collection: &str, before: Option<&Value>, after: Option<&Value>, id: &str) {
        let mut closed = Vec::new();
        for entry in self.watchers.iter() {
            let watcher = entry.value();
            if watcher.query.collection != collection {
                continue;
            }
            let was_match = before.is_some_and(|v| watcher.query.matches(v));
            let is_match = after.is_some_and(|v| watcher.query.matches(v));

            let event = match (was_match, is_match) {
                (false, true) => ChangeEvent {
                    kind: ChangeKind::Added,
                    doc: Document { id: id.to_string(), data: after.unwrap().clone() },
                },
                (true, true) => ChangeEvent {
                    kind: ChangeKind::Modified,
                    doc: Document { id: id.to_string(), data: after.unwrap().clone() },
                },
                (true, false) => ChangeEvent {
                    kind: ChangeKind::Removed,
                    doc: Document {
                        id: id.to_string(),
                        // Last state the query saw.
                        data: before.unwrap().clone(),
                    },
                },
                (false, false) => continue,
            };

            if watcher.tx.send(event).is_err() {
                closed.push(*entry.key());
            }
        }
        for watcher_id in closed {
            self.watchers.remove(&watcher_id);
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().expect("store lock poisoned");
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document { id: id.to_string(), data: data.clone() }))
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().expect("store lock poisoned");
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, data)| query.matches(data))
            .map(|(id, data)| Document { id: id.clone(), data: data.clone() })
            .collect())
    }

    async fn atomic_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let mut collections = self.collections.write().expect("store lock poisoned");

        // Stage every operation against a scratch view first so a failing
        // op leaves the committed tree untouched. Documents commit in the
        // order the batch first touches them, so same-collection watchers
        // see a deterministic intra-batch sequence.
        let mut staged: HashMap<(String, String), Option<Value>> = HashMap::new();
        let mut commit_order: Vec<(String, String)> = Vec::new();
        let mut stage = |staged: &mut HashMap<(String, String), Option<Value>>,
                         key: (String, String),
                         value: Option<Value>| {
            if !staged.contains_key(&key) {
                commit_order.push(key.clone());
            }
            staged.insert(key, value);
        };
        let current = |collections: &HashMap<String, BTreeMap<String, Value>>,
                       staged: &HashMap<(String, String), Option<Value>>,
                       collection: &str,
                       id: &str|
         -> Option<Value> {
            match staged.get(&(collection.to_string(), id.to_string())) {
                Some(value) => value.clone(),
                None => collections.get(collection).and_then(|docs| docs.get(id)).cloned(),
            }
        };

        for op in &ops {
            match op {
                WriteOp::Insert { collection, id, data } => {
                    if current(&collections, &staged, collection, id).is_some() {
                        return Err(StoreError::AlreadyExists {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    }
                    stage(&mut staged, (collection.clone(), id.clone()), Some(data.clone()));
                }
                WriteOp::Update { collection, id, ops: field_ops } => {
                    let Some(mut doc) = current(&collections, &staged, collection, id) else {
                        return Err(StoreError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    };
                    for field_op in field_ops {
                        apply_field_op(&mut doc, field_op)?;
                    }
                    stage(&mut staged, (collection.clone(), id.clone()), Some(doc));
                }
                WriteOp::Delete { collection, id } => {
                    if current(&collections, &staged, collection, id).is_none() {
                        return Err(StoreError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    }
                    stage(&mut staged, (collection.clone(), id.clone()), None);
                }
            }
        }

        // Commit and notify. Events go out under the write lock so every
        // subscription sees this batch before any later one.
        for key in commit_order {
            let after = staged.remove(&key).expect("key was staged");
            let (collection, id) = key;
            let docs = collections.entry(collection.clone()).or_default();
            let before = match &after {
                Some(value) => docs.insert(id.clone(), value.clone()),
                None => docs.remove(&id),
            };
            self.emit(&collection, before.as_ref(), after.as_ref(), &id);
        }

        Ok(())
    }

    async fn watch(&self, query: Query) -> StoreResult<Subscription> {
        // Hold the write lock while registering so no commit can slip
        // between the initial snapshot and incremental delivery.
        let collections = self.collections.write().expect("store lock poisoned");
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(docs) = collections.get(&query.collection) {
            for (id, data) in docs {
                if query.matches(data) {
                    let _ = tx.send(ChangeEvent {
                        kind: ChangeKind::Added,
                        doc: Document { id: id.clone(), data: data.clone() },
                    });
                }
            }
        }

        let watcher_id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(watcher_id, collection = %query.collection, "listener registered");
        self.watchers.insert(watcher_id, Watcher { query, tx });
        drop(collections);

        let watchers = Arc::clone(&self.watchers);
        Ok(Subscription::new(rx, move || {
            watchers.remove(&watcher_id);
            tracing::debug!(watcher_id, "listener unregistered");
        }))
    }
}

/// Apply one field mutation in place, creating intermediate objects along
/// the path for set/increment/union.
fn apply_field_op(doc: &mut Value, op: &FieldOp) -> StoreResult<()> {
    let invalid = |path: &str, reason: &str| StoreError::InvalidField {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let (path, create_missing) = match op {
        FieldOp::Set { path, .. } | FieldOp::Increment { path, .. } | FieldOp::ArrayUnion { path, .. } => {
            (path.as_str(), true)
        }
        FieldOp::ArrayRemove { path, .. } | FieldOp::DeleteField { path } => (path.as_str(), false),
    };

    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().ok_or_else(|| invalid(path, "empty path"))?;

    let mut current = doc;
    for segment in segments {
        let object = current
            .as_object_mut()
            .ok_or_else(|| invalid(path, "parent is not an object"))?;
        if !object.contains_key(segment) {
            if !create_missing {
                // Removing from or deleting a missing branch is a no-op.
                return Ok(());
            }
            object.insert(segment.to_string(), Value::Object(Default::default()));
        }
        current = object.get_mut(segment).expect("segment just ensured");
    }
    let object = current
        .as_object_mut()
        .ok_or_else(|| invalid(path, "parent is not an object"))?;

    match op {
        FieldOp::Set { value, .. } => {
            object.insert(leaf.to_string(), value.clone());
        }
        FieldOp::Increment { by, .. } => {
            let base = match object.get(leaf) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => {
                    n.as_i64().ok_or_else(|| invalid(path, "not an integer"))?
                }
                Some(_) => return Err(invalid(path, "increment target is not a number")),
            };
            object.insert(leaf.to_string(), Value::from(base + by));
        }
        FieldOp::ArrayUnion { values, .. } => {
            match object.get(leaf) {
                None | Some(Value::Null) => {
                    object.insert(leaf.to_string(), Value::Array(Vec::new()));
                }
                Some(Value::Array(_)) => {}
                Some(_) => return Err(invalid(path, "union target is not an array")),
            }
            let items = object
                .get_mut(leaf)
                .and_then(Value::as_array_mut)
                .expect("array just ensured");
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
        }
        FieldOp::ArrayRemove { values, .. } => {
            if let Some(Value::Array(items)) = object.get_mut(leaf) {
                items.retain(|item| !values.contains(item));
            }
        }
        FieldOp::DeleteField { .. } => {
            object.remove(leaf);
        }
    }
    Ok(())
}
