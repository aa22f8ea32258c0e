use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthProvider;
use crate::cache::ProfileCache;
use crate::config::CoreConfig;
use crate::errors::{ChatError, ChatResult};
use crate::models::{
    collections, CreateGroupRequest, GroupChat, GroupMessage, MessageType, SystemMessageType,
};
use crate::store::{DocumentStore, FieldOp, Query, StoreError, Subscription, WriteOp};
use crate::unread::UnreadCounter;

/// Group chat lifecycle: `nonexistent → active → inactive` (terminal).
///
/// Permission rule: owner over admin over member. Owner and admins
/// manage membership; only the owner deactivates the group. Every
/// permission and capacity decision re-reads the authoritative group
/// document; the profile cache is display-only.
pub struct GroupLifecycleManager {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<ProfileCache>,
    config: CoreConfig,
}

impl GroupLifecycleManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<ProfileCache>,
        config: CoreConfig,
    ) -> Self {
        Self { store, auth, profiles, config }
    }

    // ─── Lifecycle ─────────────────────────────────────

    /// Create a group owned by the current user. The owner is always a
    /// member; unread counters start at zero for everyone included.
    pub async fn create_group(&self, req: CreateGroupRequest) -> ChatResult<Uuid> {
        let owner_id = self.auth.current_user_id().ok_or(ChatError::NotAuthenticated)?;
        req.validate()
            .map_err(|e| ChatError::Validation(e.to_string()))?;

        let name = req.name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidGroupName);
        }

        let max_members = req.max_members.unwrap_or(self.config.default_max_members);
        let mut member_ids: Vec<Uuid> = Vec::new();
        for id in req.member_ids {
            if id != owner_id && !member_ids.contains(&id) {
                member_ids.push(id);
            }
        }
        if member_ids.len() as u32 + 1 > max_members {
            return Err(ChatError::GroupFull);
        }

        let now = Utc::now();
        let mut unread_count: HashMap<Uuid, i64> = HashMap::new();
        unread_count.insert(owner_id, 0);
        for &id in &member_ids {
            unread_count.insert(id, 0);
        }

        let group = GroupChat {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: req.description,
            owner_id,
            member_ids,
            admin_ids: Vec::new(),
            created_at: now,
            last_message: String::new(),
            last_message_timestamp: now,
            last_message_sender_id: None,
            is_active: true,
            max_members,
            is_private: req.is_private,
            unread_count,
            deleted_at: None,
            deleted_by: None,
        };

        let announce = system_message(
            group.id,
            owner_id,
            SystemMessageType::GroupCreated,
            format!("Group '{name}' was created"),
        );
        self.store
            .atomic_write(vec![
                WriteOp::insert(collections::GROUP_CHATS, group.id.to_string(), &group)?,
                WriteOp::insert(collections::GROUP_MESSAGES, announce.id.to_string(), &announce)?,
            ])
            .await?;

        tracing::info!(group_id = %group.id, %owner_id, "group created");
        Ok(group.id)
    }

    /// Add a member. Actor must be owner or admin; the group must have
    /// room. Membership union, counter initialization, and the join
    /// system message commit as one batch.
    pub async fn add_member(&self, group_id: Uuid, member_id: Uuid, actor_id: Uuid) -> ChatResult<()> {
        let group = self.load_active(group_id).await?;

        if !group.can_manage(actor_id) {
            return Err(ChatError::InsufficientPermissions);
        }
        if group.is_member(member_id) {
            return Err(ChatError::AlreadyMember);
        }
        if group.is_at_capacity() {
            return Err(ChatError::GroupFull);
        }

        let member_name = self.profiles.display_name(member_id).await;
        let announce = system_message(
            group_id,
            actor_id,
            SystemMessageType::MemberJoined,
            format!("{member_name} joined the group"),
        );

        self.commit_group_update(
            group_id,
            vec![
                WriteOp::update(
                    collections::GROUP_CHATS,
                    group_id.to_string(),
                    vec![
                        FieldOp::array_union("member_ids", vec![json!(member_id)]),
                        UnreadCounter::reset_op(member_id),
                    ],
                ),
                WriteOp::insert(collections::GROUP_MESSAGES, announce.id.to_string(), &announce)?,
            ],
        )
        .await?;

        tracing::info!(%group_id, %member_id, %actor_id, "member added");
        Ok(())
    }

    /// Remove a member. The owner can never be removed; the owner may
    /// remove anyone else, admins only non-admin members.
    pub async fn remove_member(&self, group_id: Uuid, member_id: Uuid, actor_id: Uuid) -> ChatResult<()> {
        let group = self.load_active(group_id).await?;

        if group.is_owner(member_id) {
            return Err(ChatError::CannotRemoveOwner);
        }
        let allowed = group.is_owner(actor_id)
            || (group.is_admin(actor_id) && !group.is_admin(member_id));
        if !allowed {
            return Err(ChatError::InsufficientPermissions);
        }
        if !group.is_member(member_id) {
            return Err(ChatError::NotMember);
        }

        let member_name = self.profiles.display_name(member_id).await;
        let announce = system_message(
            group_id,
            actor_id,
            SystemMessageType::MemberRemoved,
            format!("{member_name} was removed from the group"),
        );
        self.commit_group_update(
            group_id,
            vec![
                Self::membership_removal(group_id, member_id),
                WriteOp::insert(collections::GROUP_MESSAGES, announce.id.to_string(), &announce)?,
            ],
        )
        .await?;

        tracing::info!(%group_id, %member_id, %actor_id, "member removed");
        Ok(())
    }

    /// Leave a group. Owners cannot leave; their path is `delete_group`.
    pub async fn leave(&self, group_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        let group = self.load_active(group_id).await?;

        if group.is_owner(user_id) {
            return Err(ChatError::OwnerCannotLeave);
        }
        if !group.is_member(user_id) {
            return Err(ChatError::NotMember);
        }

        let member_name = self.profiles.display_name(user_id).await;
        let announce = system_message(
            group_id,
            user_id,
            SystemMessageType::MemberLeft,
            format!("{member_name} left the group"),
        );
        self.commit_group_update(
            group_id,
            vec![
                Self::membership_removal(group_id, user_id),
                WriteOp::insert(collections::GROUP_MESSAGES, announce.id.to_string(), &announce)?,
            ],
        )
        .await?;

        tracing::info!(%group_id, %user_id, "member left");
        Ok(())
    }

    /// Deactivate a group (owner only). Deactivation is atomic; the
    /// optional message purge runs afterwards, best-effort, and never
    /// blocks the deactivation.
    pub async fn delete_group(&self, group_id: Uuid, actor_id: Uuid) -> ChatResult<()> {
        let group = self.load_active(group_id).await?;
        if !group.is_owner(actor_id) {
            return Err(ChatError::InsufficientPermissions);
        }

        let now = Utc::now();
        self.commit_group_update(
            group_id,
            vec![WriteOp::update(
                collections::GROUP_CHATS,
                group_id.to_string(),
                vec![
                    FieldOp::set("is_active", json!(false)),
                    FieldOp::set("deleted_at", json!(now)),
                    FieldOp::set("deleted_by", json!(actor_id)),
                ],
            )],
        )
        .await?;
        tracing::info!(%group_id, %actor_id, "group deactivated");

        if self.config.purge_messages_on_delete {
            if let Err(e) = self.purge_messages(group_id).await {
                tracing::warn!(%group_id, error = %e, "group message purge failed");
            }
        }
        Ok(())
    }

    // ─── Messaging ─────────────────────────────────────

    /// Send a message to a group the current user belongs to. One atomic
    /// batch: message insert, preview metadata, and a native increment
    /// for every member except the sender.
    pub async fn send_group_message(&self, group_id: Uuid, text: &str) -> ChatResult<Uuid> {
        let sender_id = self.auth.current_user_id().ok_or(ChatError::NotAuthenticated)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let group = self.load_active(group_id).await?;
        if !group.is_member(sender_id) {
            return Err(ChatError::NotMember);
        }

        let sender_name = self.profiles.display_name(sender_id).await;
        let now = Utc::now();
        let message = GroupMessage {
            id: Uuid::new_v4(),
            group_chat_id: group_id,
            sender_id,
            sender_name,
            text: text.to_string(),
            timestamp: now,
            message_type: MessageType::Text,
            // The sender has seen their own message.
            read_by: vec![sender_id],
            is_system_message: false,
            system_message_type: None,
        };

        let mut group_ops = vec![
            FieldOp::set("last_message", json!(text)),
            FieldOp::set("last_message_timestamp", json!(now)),
            FieldOp::set("last_message_sender_id", json!(sender_id)),
        ];
        for member_id in group.all_member_ids() {
            if member_id != sender_id {
                group_ops.push(UnreadCounter::increment_op(member_id, 1));
            }
        }

        self.commit_group_update(
            group_id,
            vec![
                WriteOp::insert(collections::GROUP_MESSAGES, message.id.to_string(), &message)?,
                WriteOp::update(collections::GROUP_CHATS, group_id.to_string(), group_ops),
            ],
        )
        .await?;

        tracing::debug!(%group_id, %sender_id, "group message sent");
        Ok(message.id)
    }

    /// Reset the user's unread counter for this group. Pure counter
    /// reset; group read state needs no per-message flip to reach zero.
    pub async fn mark_group_read(&self, group_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        self.commit_group_update(
            group_id,
            vec![WriteOp::update(
                collections::GROUP_CHATS,
                group_id.to_string(),
                vec![UnreadCounter::reset_op(user_id)],
            )],
        )
        .await
    }

    /// Opportunistically record that a user has seen a message.
    pub async fn mark_message_seen(&self, message_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        self.store
            .atomic_write(vec![WriteOp::update(
                collections::GROUP_MESSAGES,
                message_id.to_string(),
                vec![FieldOp::array_union("read_by", vec![json!(user_id)])],
            )])
            .await?;
        Ok(())
    }

    // ─── Views ─────────────────────────────────────────

    pub async fn get_group(&self, group_id: Uuid) -> ChatResult<GroupChat> {
        let doc = self
            .store
            .get(collections::GROUP_CHATS, &group_id.to_string())
            .await?
            .ok_or(ChatError::GroupNotFound)?;
        Ok(doc.decode()?)
    }

    /// Active groups the user belongs to, newest activity first.
    pub async fn member_groups(&self, user_id: Uuid) -> ChatResult<Vec<GroupChat>> {
        let query = Query::collection(collections::GROUP_CHATS).where_eq("is_active", json!(true));
        let mut groups: Vec<GroupChat> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|d| d.decode::<GroupChat>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|g| g.is_member(user_id))
            .collect();
        groups.sort_by(|a, b| {
            b.last_message_timestamp
                .cmp(&a.last_message_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(groups)
    }

    /// Change listener over all active groups. Consumers filter by
    /// membership, as the group document is shared state.
    pub async fn watch_groups(&self) -> ChatResult<Subscription> {
        let query = Query::collection(collections::GROUP_CHATS).where_eq("is_active", json!(true));
        Ok(self.store.watch(query).await?)
    }

    /// Message history for a group, in display order.
    pub async fn group_messages(&self, group_id: Uuid) -> ChatResult<Vec<GroupMessage>> {
        let query = Query::collection(collections::GROUP_MESSAGES)
            .where_eq("group_chat_id", json!(group_id));
        let mut messages: Vec<GroupMessage> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|d| d.decode())
            .collect::<Result<_, _>>()?;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    pub async fn watch_group_messages(&self, group_id: Uuid) -> ChatResult<Subscription> {
        let query = Query::collection(collections::GROUP_MESSAGES)
            .where_eq("group_chat_id", json!(group_id));
        Ok(self.store.watch(query).await?)
    }

    // ─── Internals ─────────────────────────────────────

    /// Fetch a group; inactive is terminal and reads as not found.
    async fn load_active(&self, group_id: Uuid) -> ChatResult<GroupChat> {
        let group = self.get_group(group_id).await?;
        if !group.is_active {
            return Err(ChatError::GroupNotFound);
        }
        Ok(group)
    }

    /// Removal ops shared by remove/leave: membership, admin role, and
    /// the counter entry all go in one update.
    fn membership_removal(group_id: Uuid, member_id: Uuid) -> WriteOp {
        WriteOp::update(
            collections::GROUP_CHATS,
            group_id.to_string(),
            vec![
                FieldOp::array_remove("member_ids", vec![json!(member_id)]),
                FieldOp::array_remove("admin_ids", vec![json!(member_id)]),
                UnreadCounter::remove_op(member_id),
            ],
        )
    }

    async fn commit_group_update(&self, group_id: Uuid, ops: Vec<WriteOp>) -> ChatResult<()> {
        match self.store.atomic_write(ops).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!(%group_id, "group vanished mid-operation");
                Err(ChatError::GroupNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_messages(&self, group_id: Uuid) -> ChatResult<()> {
        let query = Query::collection(collections::GROUP_MESSAGES)
            .where_eq("group_chat_id", json!(group_id));
        let docs = self.store.query(&query).await?;
        if docs.is_empty() {
            return Ok(());
        }
        let ops = docs
            .iter()
            .map(|d| WriteOp::delete(collections::GROUP_MESSAGES, d.id.clone()))
            .collect();
        self.store.atomic_write(ops).await?;
        tracing::debug!(%group_id, count = docs.len(), "group messages purged");
        Ok(())
    }
}

fn system_message(
    group_id: Uuid,
    sender_id: Uuid,
    kind: SystemMessageType,
    text: String,
) -> GroupMessage {
    GroupMessage {
        id: Uuid::new_v4(),
        group_chat_id: group_id,
        sender_id,
        sender_name: "System".to_string(),
        text,
        timestamp: Utc::now(),
        message_type: MessageType::System,
        read_by: Vec::new(),
        is_system_message: true,
        system_message_type: Some(kind),
    }
}
