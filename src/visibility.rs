use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::errors::{ChatError, ChatResult};
use crate::models::{collections, Conversation};
use crate::store::{DocumentStore, FieldOp, Query, WriteOp};

/// Per-user soft-delete of conversations.
///
/// Hiding removes a conversation from one user's list without touching
/// shared data. Only the hider sending a message, or an explicit `show`,
/// restores it; receiving a message never does. That asymmetry is
/// deliberate and pinned by tests.
pub struct VisibilityManager {
    store: Arc<dyn DocumentStore>,
}

impl VisibilityManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Add the user to `deleted_for`. Idempotent set-union.
    pub async fn hide(&self, conversation_id: &str, user_id: Uuid) -> ChatResult<()> {
        self.update_deleted_for(
            conversation_id,
            user_id,
            FieldOp::array_union("deleted_for", vec![json!(user_id)]),
        )
        .await?;
        tracing::debug!(%conversation_id, %user_id, "conversation hidden");
        Ok(())
    }

    /// Remove the user from `deleted_for`. Idempotent set-difference.
    pub async fn show(&self, conversation_id: &str, user_id: Uuid) -> ChatResult<()> {
        self.update_deleted_for(
            conversation_id,
            user_id,
            FieldOp::array_remove("deleted_for", vec![json!(user_id)]),
        )
        .await?;
        tracing::debug!(%conversation_id, %user_id, "conversation restored");
        Ok(())
    }

    /// The user's conversation list: participant and not hidden, newest
    /// activity first.
    pub async fn visible_conversations(&self, user_id: Uuid) -> ChatResult<Vec<Conversation>> {
        let query = Query::collection(collections::CONVERSATIONS)
            .where_array_contains("participants", json!(user_id));
        let mut conversations: Vec<Conversation> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|d| d.decode::<Conversation>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|c| c.is_visible_to(user_id))
            .collect();
        conversations.sort_by(|a, b| {
            b.last_message_timestamp
                .cmp(&a.last_message_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(conversations)
    }

    async fn update_deleted_for(
        &self,
        conversation_id: &str,
        user_id: Uuid,
        op: FieldOp,
    ) -> ChatResult<()> {
        // deleted_for must stay a subset of participants.
        let doc = self
            .store
            .get(collections::CONVERSATIONS, conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        let conversation: Conversation = doc.decode()?;
        if !conversation.participants.contains(&user_id) {
            return Err(ChatError::InsufficientPermissions);
        }

        self.store
            .atomic_write(vec![WriteOp::update(
                collections::CONVERSATIONS,
                conversation_id,
                vec![op],
            )])
            .await?;
        Ok(())
    }
}
