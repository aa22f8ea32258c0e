use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::errors::{ChatError, ChatResult};
use crate::models::{collections, Conversation};
use crate::store::{DocumentStore, Query, StoreError, Subscription, WriteOp};

/// Finds or creates the single conversation between two users.
///
/// The conversation document id is the canonical pair key, and inserts
/// are create-only, so two first-senders racing each other collapse onto
/// one document: the loser sees the insert conflict and uses the
/// winner's. Deletion state is not identity; a conversation hidden for
/// one side still resolves.
pub struct ConversationResolver {
    store: Arc<dyn DocumentStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<String> {
        if user_a == user_b {
            return Err(ChatError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let id = Conversation::pair_key(user_a, user_b);
        if self.store.get(collections::CONVERSATIONS, &id).await?.is_some() {
            return Ok(id);
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: id.clone(),
            participants: vec![user_a, user_b],
            last_message: String::new(),
            last_message_timestamp: now,
            unread_count: HashMap::from([(user_a, 0), (user_b, 0)]),
            created_by: user_a,
            created_at: now,
            deleted_for: Vec::new(),
        };

        let insert = WriteOp::insert(collections::CONVERSATIONS, id.clone(), &conversation)?;
        match self.store.atomic_write(vec![insert]).await {
            Ok(()) => {
                tracing::info!(conversation_id = %id, "conversation created");
                Ok(id)
            }
            // A concurrent sender created it between our read and write.
            Err(StoreError::AlreadyExists { .. }) => Ok(id),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, conversation_id: &str) -> ChatResult<Conversation> {
        let doc = self
            .store
            .get(collections::CONVERSATIONS, conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        Ok(doc.decode()?)
    }

    /// Every conversation the user participates in, hidden ones included.
    pub async fn conversations_for(&self, user_id: Uuid) -> ChatResult<Vec<Conversation>> {
        let query = Query::collection(collections::CONVERSATIONS)
            .where_array_contains("participants", json!(user_id));
        let docs = self.store.query(&query).await?;
        docs.iter().map(|d| Ok(d.decode()?)).collect()
    }

    /// Change listener over the user's conversation list.
    pub async fn watch_conversations(&self, user_id: Uuid) -> ChatResult<Subscription> {
        let query = Query::collection(collections::CONVERSATIONS)
            .where_array_contains("participants", json!(user_id));
        Ok(self.store.watch(query).await?)
    }
}
