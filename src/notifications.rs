use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::ProfileCache;
use crate::errors::ChatResult;
use crate::models::{
    collections, AppNotification, Conversation, GroupChat, NotificationChannel,
    NotificationMetadata, NotificationPreferences, NotificationType, UnreadAggregate,
};
use crate::store::{ChangeKind, DocumentStore, FieldOp, Query, Subscription, WriteOp};

// ─── Unread Aggregation ────────────────────────────────

/// Fold a user's unread totals from document snapshots. Pure: hidden
/// conversations and groups the user left (or that went inactive)
/// contribute zero, whatever their stored counters say.
pub fn total_unread(
    conversations: &[Conversation],
    groups: &[GroupChat],
    user_id: Uuid,
) -> UnreadAggregate {
    let direct: i64 = conversations
        .iter()
        .filter(|c| c.is_visible_to(user_id))
        .map(|c| c.unread_for(user_id))
        .sum();
    let group_total: i64 = groups
        .iter()
        .filter(|g| g.is_active && g.is_member(user_id))
        .map(|g| g.unread_for(user_id))
        .sum();
    UnreadAggregate {
        direct,
        groups: group_total,
        total: direct + group_total,
    }
}

/// Live handle to a user's unread totals. Holds the background task that
/// folds store change events; dropping the handle stops it.
pub struct UnreadWatch {
    rx: watch::Receiver<UnreadAggregate>,
    task: JoinHandle<()>,
}

impl UnreadWatch {
    pub fn current(&self) -> UnreadAggregate {
        *self.rx.borrow()
    }

    /// Wait for the next recomputation. Returns `false` once the
    /// publisher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for UnreadWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─── Fan-out ───────────────────────────────────────────

/// Notification dispatch and unread aggregation.
///
/// Dispatch consults the recipient's preferences per channel before
/// anything is persisted; a record only exists if at least one channel
/// allows it. Message events (DM and group) never produce in-app
/// records, since the badge counters cover them; only the push channel
/// is consulted for those.
pub struct NotificationFanout {
    store: Arc<dyn DocumentStore>,
    profiles: Arc<ProfileCache>,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn DocumentStore>, profiles: Arc<ProfileCache>) -> Self {
        Self { store, profiles }
    }

    // ─── Live Unread Totals ────────────────────────────

    /// Subscribe to a user's unread totals. Two change listeners (the
    /// user's conversations, all active groups) feed one fold; every
    /// event republishes the aggregate through a `watch` channel.
    pub async fn watch_total_unread(&self, user_id: Uuid) -> ChatResult<UnreadWatch> {
        let conv_query = Query::collection(collections::CONVERSATIONS)
            .where_array_contains("participants", json!(user_id));
        let group_query =
            Query::collection(collections::GROUP_CHATS).where_eq("is_active", json!(true));
        let conversations = self.store.watch(conv_query).await?;
        let groups = self.store.watch(group_query).await?;

        let (tx, rx) = watch::channel(UnreadAggregate::default());
        let task = tokio::spawn(fold_unread(user_id, conversations, groups, tx));
        Ok(UnreadWatch { rx, task })
    }

    // ─── Dispatch ──────────────────────────────────────

    /// A direct message arrived. Badge counters carry the in-app signal,
    /// so only push is consulted.
    pub async fn notify_direct_message(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        conversation_id: &str,
        preview: &str,
    ) -> ChatResult<Option<Uuid>> {
        let sender_name = self.profiles.display_name(sender_id).await;
        self.dispatch(DispatchRequest {
            kind: NotificationType::DirectMessage,
            recipient_id,
            sender_id: Some(sender_id),
            title: sender_name.clone(),
            message: preview.to_string(),
            metadata: NotificationMetadata {
                conversation_id: Some(conversation_id.to_string()),
                sender_display_name: Some(sender_name),
                ..Default::default()
            },
            in_app_eligible: false,
        })
        .await
    }

    /// A group message arrived. Same channel rule as direct messages.
    pub async fn notify_group_message(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        group_chat_id: Uuid,
        group_name: &str,
        preview: &str,
    ) -> ChatResult<Option<Uuid>> {
        let sender_name = self.profiles.display_name(sender_id).await;
        self.dispatch(DispatchRequest {
            kind: NotificationType::GroupMessage,
            recipient_id,
            sender_id: Some(sender_id),
            title: group_name.to_string(),
            message: format!("{sender_name}: {preview}"),
            metadata: NotificationMetadata {
                group_chat_id: Some(group_chat_id),
                sender_display_name: Some(sender_name),
                ..Default::default()
            },
            in_app_eligible: false,
        })
        .await
    }

    pub async fn notify_post_like(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        post_id: Uuid,
    ) -> ChatResult<Option<Uuid>> {
        let sender_name = self.profiles.display_name(sender_id).await;
        self.dispatch(DispatchRequest {
            kind: NotificationType::PostLike,
            recipient_id,
            sender_id: Some(sender_id),
            title: "New Like".to_string(),
            message: format!("{sender_name} liked your post"),
            metadata: NotificationMetadata {
                post_id: Some(post_id),
                sender_display_name: Some(sender_name),
                ..Default::default()
            },
            in_app_eligible: true,
        })
        .await
    }

    pub async fn notify_post_comment(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        post_id: Uuid,
    ) -> ChatResult<Option<Uuid>> {
        let sender_name = self.profiles.display_name(sender_id).await;
        self.dispatch(DispatchRequest {
            kind: NotificationType::PostComment,
            recipient_id,
            sender_id: Some(sender_id),
            title: "New Comment".to_string(),
            message: format!("{sender_name} commented on your post"),
            metadata: NotificationMetadata {
                post_id: Some(post_id),
                sender_display_name: Some(sender_name),
                ..Default::default()
            },
            in_app_eligible: true,
        })
        .await
    }

    pub async fn notify_comment_like(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
        post_id: Uuid,
    ) -> ChatResult<Option<Uuid>> {
        let sender_name = self.profiles.display_name(sender_id).await;
        self.dispatch(DispatchRequest {
            kind: NotificationType::CommentLike,
            recipient_id,
            sender_id: Some(sender_id),
            title: "New Like".to_string(),
            message: format!("{sender_name} liked your comment"),
            metadata: NotificationMetadata {
                post_id: Some(post_id),
                sender_display_name: Some(sender_name),
                ..Default::default()
            },
            in_app_eligible: true,
        })
        .await
    }

    /// System-originated milestone (no sender, so no self-notify or
    /// muted-user checks apply).
    pub async fn notify_milestone(
        &self,
        recipient_id: Uuid,
        title: &str,
        message: &str,
    ) -> ChatResult<Option<Uuid>> {
        self.dispatch(DispatchRequest {
            kind: NotificationType::Milestone,
            recipient_id,
            sender_id: None,
            title: title.to_string(),
            message: message.to_string(),
            metadata: NotificationMetadata::default(),
            in_app_eligible: true,
        })
        .await
    }

    /// Preference cascade for one event on one channel: global toggle,
    /// per-target mutes, channel toggle, then per-type toggle. The first
    /// refusal wins. A user with no stored preferences allows everything.
    pub async fn should_notify(
        &self,
        kind: NotificationType,
        recipient_id: Uuid,
        channel: NotificationChannel,
        sender_id: Option<Uuid>,
        metadata: &NotificationMetadata,
    ) -> ChatResult<bool> {
        let prefs = self.preferences(recipient_id).await?;

        if !prefs.all_notifications_enabled {
            return Ok(false);
        }
        if let Some(sender) = sender_id {
            if prefs.muted_users.contains(&sender) {
                return Ok(false);
            }
        }
        if let Some(post) = metadata.post_id {
            if prefs.muted_posts.contains(&post) {
                return Ok(false);
            }
        }
        if let Some(conversation) = &metadata.conversation_id {
            if prefs.muted_conversations.contains(conversation) {
                return Ok(false);
            }
        }
        if let Some(group) = metadata.group_chat_id {
            if prefs.muted_group_chats.contains(&group) {
                return Ok(false);
            }
        }

        let settings = match channel {
            NotificationChannel::InApp => &prefs.in_app,
            NotificationChannel::Push => &prefs.push,
        };
        Ok(settings.allows(kind))
    }

    // ─── Preferences ───────────────────────────────────

    /// Stored preferences, or permissive defaults when none exist.
    pub async fn preferences(&self, user_id: Uuid) -> ChatResult<NotificationPreferences> {
        let doc = self
            .store
            .get(collections::NOTIFICATION_PREFERENCES, &user_id.to_string())
            .await?;
        match doc {
            Some(doc) => Ok(doc.decode()?),
            None => Ok(NotificationPreferences::defaults_for(user_id)),
        }
    }

    /// Upsert the user's preferences document (whole-document replace).
    pub async fn save_preferences(&self, mut prefs: NotificationPreferences) -> ChatResult<()> {
        prefs.last_updated = Utc::now();
        let id = prefs.user_id.to_string();
        let exists = self
            .store
            .get(collections::NOTIFICATION_PREFERENCES, &id)
            .await?
            .is_some();
        let mut ops = Vec::with_capacity(2);
        if exists {
            ops.push(WriteOp::delete(collections::NOTIFICATION_PREFERENCES, id.clone()));
        }
        ops.push(WriteOp::insert(collections::NOTIFICATION_PREFERENCES, id, &prefs)?);
        self.store.atomic_write(ops).await?;
        Ok(())
    }

    // ─── Records ───────────────────────────────────────

    /// Persisted records for a user, newest first.
    pub async fn notifications_for(&self, user_id: Uuid) -> ChatResult<Vec<AppNotification>> {
        let query = Query::collection(collections::NOTIFICATIONS)
            .where_eq("recipient_id", json!(user_id));
        let mut records: Vec<AppNotification> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|d| d.decode())
            .collect::<Result<_, _>>()?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> ChatResult<()> {
        self.store
            .atomic_write(vec![WriteOp::update(
                collections::NOTIFICATIONS,
                notification_id.to_string(),
                vec![FieldOp::set("is_read", json!(true))],
            )])
            .await?;
        Ok(())
    }

    /// Mark every unread record for the user read, in one batch.
    pub async fn mark_all_read(&self, user_id: Uuid) -> ChatResult<()> {
        let query = Query::collection(collections::NOTIFICATIONS)
            .where_eq("recipient_id", json!(user_id))
            .where_eq("is_read", json!(false));
        let docs = self.store.query(&query).await?;
        if docs.is_empty() {
            return Ok(());
        }
        let ops = docs
            .iter()
            .map(|d| {
                WriteOp::update(
                    collections::NOTIFICATIONS,
                    d.id.clone(),
                    vec![FieldOp::set("is_read", json!(true))],
                )
            })
            .collect();
        self.store.atomic_write(ops).await?;
        Ok(())
    }

    // ─── Internals ─────────────────────────────────────

    async fn dispatch(&self, req: DispatchRequest) -> ChatResult<Option<Uuid>> {
        // Users never notify themselves.
        if req.sender_id == Some(req.recipient_id) {
            return Ok(None);
        }

        let in_app_allowed = req.in_app_eligible
            && self
                .should_notify(
                    req.kind,
                    req.recipient_id,
                    NotificationChannel::InApp,
                    req.sender_id,
                    &req.metadata,
                )
                .await?;
        let push_allowed = self
            .should_notify(
                req.kind,
                req.recipient_id,
                NotificationChannel::Push,
                req.sender_id,
                &req.metadata,
            )
            .await?;

        if !in_app_allowed && !push_allowed {
            tracing::debug!(recipient_id = %req.recipient_id, kind = ?req.kind, "notification suppressed");
            return Ok(None);
        }

        let record = AppNotification {
            id: Uuid::new_v4(),
            recipient_id: req.recipient_id,
            sender_id: req.sender_id,
            notification_type: req.kind,
            title: req.title,
            message: req.message,
            timestamp: Utc::now(),
            is_read: false,
            in_app_allowed,
            push_allowed,
            metadata: req.metadata,
        };
        self.store
            .atomic_write(vec![WriteOp::insert(
                collections::NOTIFICATIONS,
                record.id.to_string(),
                &record,
            )?])
            .await?;
        tracing::debug!(notification_id = %record.id, kind = ?record.notification_type, "notification recorded");
        Ok(Some(record.id))
    }
}

struct DispatchRequest {
    kind: NotificationType,
    recipient_id: Uuid,
    sender_id: Option<Uuid>,
    title: String,
    message: String,
    metadata: NotificationMetadata,
    /// Message events keep this false: badges are their in-app signal.
    in_app_eligible: bool,
}

/// Background fold: keep the latest decoded state per source document and
/// republish the aggregate after every change event.
async fn fold_unread(
    user_id: Uuid,
    mut conversations: Subscription,
    mut groups: Subscription,
    tx: watch::Sender<UnreadAggregate>,
) {
    let mut conv_state: HashMap<String, Conversation> = HashMap::new();
    let mut group_state: HashMap<String, GroupChat> = HashMap::new();

    loop {
        let recompute = tokio::select! {
            event = conversations.recv() => match event {
                Some(event) => apply_event(&mut conv_state, event),
                None => break,
            },
            event = groups.recv() => match event {
                Some(event) => apply_event(&mut group_state, event),
                None => break,
            },
        };
        if recompute {
            let convs: Vec<Conversation> = conv_state.values().cloned().collect();
            let grps: Vec<GroupChat> = group_state.values().cloned().collect();
            let aggregate = total_unread(&convs, &grps, user_id);
            if tx.send(aggregate).is_err() {
                break;
            }
        }
    }
}

/// Returns whether the aggregate needs recomputing.
fn apply_event<T: serde::de::DeserializeOwned>(
    state: &mut HashMap<String, T>,
    event: crate::store::ChangeEvent,
) -> bool {
    match event.kind {
        ChangeKind::Added | ChangeKind::Modified => match event.doc.decode::<T>() {
            Ok(value) => {
                state.insert(event.doc.id, value);
                true
            }
            Err(e) => {
                tracing::warn!(doc_id = %event.doc.id, error = %e, "undecodable change event");
                false
            }
        },
        ChangeKind::Removed => state.remove(&event.doc.id).is_some(),
    }
}
