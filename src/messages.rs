use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::conversations::ConversationResolver;
use crate::errors::{ChatError, ChatResult};
use crate::models::{collections, DirectMessage, MessageType};
use crate::store::{DocumentStore, FieldOp, Query, StoreError, Subscription, WriteOp};
use crate::unread::UnreadCounter;

/// Validates and atomically persists direct messages together with their
/// conversation-metadata side effects.
pub struct MessagePipeline {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    resolver: ConversationResolver,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>) -> Self {
        let resolver = ConversationResolver::new(Arc::clone(&store));
        Self { store, auth, resolver }
    }

    /// Send a direct message to `recipient_id`. Resolves (or lazily
    /// creates) the conversation, then commits one atomic batch: the
    /// message insert, the conversation preview metadata, a native
    /// increment of the recipient's unread counter, and removal of the
    /// sender from `deleted_for`. Sending always un-hides the
    /// conversation for the sender, never for the recipient.
    pub async fn send(&self, recipient_id: Uuid, text: &str) -> ChatResult<String> {
        let sender_id = self.auth.current_user_id().ok_or(ChatError::NotAuthenticated)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.require_user(recipient_id).await?;

        let conversation_id = self.resolver.resolve(sender_id, recipient_id).await?;

        let now = Utc::now();
        let message = DirectMessage {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.clone(),
            sender_id,
            recipient_id,
            text: text.to_string(),
            timestamp: now,
            is_read: false,
            message_type: MessageType::Text,
        };

        let ops = vec![
            WriteOp::insert(collections::DIRECT_MESSAGES, message.id.to_string(), &message)?,
            WriteOp::update(
                collections::CONVERSATIONS,
                conversation_id.clone(),
                vec![
                    FieldOp::set("last_message", json!(text)),
                    FieldOp::set("last_message_timestamp", json!(now)),
                    UnreadCounter::increment_op(recipient_id, 1),
                    FieldOp::array_remove("deleted_for", vec![json!(sender_id)]),
                ],
            ),
        ];

        match self.store.atomic_write(ops).await {
            Ok(()) => {
                tracing::debug!(%conversation_id, %sender_id, %recipient_id, "direct message sent");
                Ok(conversation_id)
            }
            Err(StoreError::NotFound { .. }) => Err(ChatError::ConversationNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark every unread message addressed to `user_id` in this
    /// conversation as read and reset their unread counter, in one
    /// atomic batch.
    pub async fn mark_read(&self, conversation_id: &str, user_id: Uuid) -> ChatResult<()> {
        let query = Query::collection(collections::DIRECT_MESSAGES)
            .where_eq("conversation_id", json!(conversation_id))
            .where_eq("recipient_id", json!(user_id))
            .where_eq("is_read", json!(false));
        let unread = self.store.query(&query).await?;

        let mut ops: Vec<WriteOp> = unread
            .iter()
            .map(|doc| {
                WriteOp::update(
                    collections::DIRECT_MESSAGES,
                    doc.id.clone(),
                    vec![FieldOp::set("is_read", json!(true))],
                )
            })
            .collect();
        ops.push(WriteOp::update(
            collections::CONVERSATIONS,
            conversation_id,
            vec![UnreadCounter::reset_op(user_id)],
        ));

        match self.store.atomic_write(ops).await {
            Ok(()) => {
                tracing::debug!(%conversation_id, %user_id, count = unread.len(), "messages marked read");
                Ok(())
            }
            Err(StoreError::NotFound { .. }) => Err(ChatError::ConversationNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Message history for a conversation, in display order.
    pub async fn conversation_messages(&self, conversation_id: &str) -> ChatResult<Vec<DirectMessage>> {
        let query = Query::collection(collections::DIRECT_MESSAGES)
            .where_eq("conversation_id", json!(conversation_id));
        let mut messages: Vec<DirectMessage> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|d| d.decode())
            .collect::<Result<_, _>>()?;
        sort_for_display(&mut messages);
        Ok(messages)
    }

    /// Change listener over one conversation's messages. Arrival order is
    /// not display order across subscriptions; consumers re-sort.
    pub async fn watch_messages(&self, conversation_id: &str) -> ChatResult<Subscription> {
        let query = Query::collection(collections::DIRECT_MESSAGES)
            .where_eq("conversation_id", json!(conversation_id));
        Ok(self.store.watch(query).await?)
    }

    /// Recipients must exist before a thread is created for them.
    async fn require_user(&self, user_id: Uuid) -> ChatResult<()> {
        self.store
            .get(collections::USERS, &user_id.to_string())
            .await?
            .ok_or(ChatError::UserNotFound)?;
        Ok(())
    }
}

/// Display order: timestamp ascending, document id as the stable
/// tiebreaker for identical timestamps.
pub fn sort_for_display(messages: &mut [DirectMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}
