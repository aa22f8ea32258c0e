use std::sync::Arc;

use uuid::Uuid;

use crate::errors::{ChatError, ChatResult};
use crate::models::collections;
use crate::store::{DocumentStore, FieldOp, StoreError, WriteOp};

/// Which per-user counter map a mutation addresses.
#[derive(Debug, Clone)]
pub enum CounterTarget {
    Conversation(String),
    Group(Uuid),
}

impl CounterTarget {
    fn collection(&self) -> &'static str {
        match self {
            CounterTarget::Conversation(_) => collections::CONVERSATIONS,
            CounterTarget::Group(_) => collections::GROUP_CHATS,
        }
    }

    fn doc_id(&self) -> String {
        match self {
            CounterTarget::Conversation(id) => id.clone(),
            CounterTarget::Group(id) => id.to_string(),
        }
    }

    fn not_found(&self) -> ChatError {
        match self {
            CounterTarget::Conversation(_) => ChatError::ConversationNotFound,
            CounterTarget::Group(_) => ChatError::GroupNotFound,
        }
    }
}

/// Per-recipient unread counters for conversations and groups.
///
/// Every mutation is a store-native field operator, never a client-side
/// read-modify-write, so counter updates commute with concurrent sends.
/// The `*_op` builders let membership changes and send batches carry
/// their counter mutation inside the same atomic write.
pub struct UnreadCounter {
    store: Arc<dyn DocumentStore>,
}

impl UnreadCounter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn counter_path(user_id: Uuid) -> String {
        format!("unread_count.{user_id}")
    }

    /// Native increment for one user's counter.
    pub fn increment_op(user_id: Uuid, by: i64) -> FieldOp {
        FieldOp::increment(&Self::counter_path(user_id), by)
    }

    /// Zero a user's counter (reset, or initialization on join/create).
    pub fn reset_op(user_id: Uuid) -> FieldOp {
        FieldOp::set(&Self::counter_path(user_id), serde_json::json!(0))
    }

    /// Drop a user's counter entry entirely (leave/remove), keeping the
    /// key set aligned with membership.
    pub fn remove_op(user_id: Uuid) -> FieldOp {
        FieldOp::delete_field(&Self::counter_path(user_id))
    }

    pub async fn increment(&self, target: &CounterTarget, user_id: Uuid, by: i64) -> ChatResult<()> {
        if by <= 0 {
            return Err(ChatError::Validation(format!(
                "unread increment must be positive, got {by}"
            )));
        }
        self.apply(target, Self::increment_op(user_id, by)).await
    }

    /// Counts never go negative: reset writes an exact zero.
    pub async fn reset(&self, target: &CounterTarget, user_id: Uuid) -> ChatResult<()> {
        self.apply(target, Self::reset_op(user_id)).await
    }

    async fn apply(&self, target: &CounterTarget, op: FieldOp) -> ChatResult<()> {
        let write = WriteOp::update(target.collection(), target.doc_id(), vec![op]);
        match self.store.atomic_write(vec![write]).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(target.not_found()),
            Err(e) => Err(e.into()),
        }
    }
}
