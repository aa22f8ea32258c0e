use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ─── Collections ───────────────────────────────────────

/// Document collection names, shared by every component.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CONVERSATIONS: &str = "conversations";
    pub const DIRECT_MESSAGES: &str = "direct_messages";
    pub const GROUP_CHATS: &str = "group_chats";
    pub const GROUP_MESSAGES: &str = "group_messages";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const NOTIFICATION_PREFERENCES: &str = "notification_preferences";
}

// ─── User Profile ──────────────────────────────────────

/// Minimal profile record used for display-name denormalization.
/// Authoritative user management lives outside this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ─── Conversation (DM thread) ──────────────────────────

/// A DM thread between exactly two users. At most one exists per
/// unordered participant pair; its document id is the canonical pair key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<Uuid>,
    pub last_message: String,
    pub last_message_timestamp: DateTime<Utc>,
    /// Per-participant unread counters; key set == participants.
    pub unread_count: HashMap<Uuid, i64>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Participants who have hidden this conversation from their list.
    pub deleted_for: Vec<Uuid>,
}

impl Conversation {
    /// Canonical id for the unordered pair: sorted concatenation.
    pub fn pair_key(a: Uuid, b: Uuid) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}_{hi}")
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        self.participants.iter().copied().find(|&p| p != user_id)
    }

    pub fn is_deleted_for(&self, user_id: Uuid) -> bool {
        self.deleted_for.contains(&user_id)
    }

    /// Visible in a user's list iff they participate and have not hidden it.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id) && !self.is_deleted_for(user_id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_count.get(&user_id).copied().unwrap_or(0)
    }
}

// ─── Direct Message ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub message_type: MessageType,
}

// ─── Group Chat ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChat {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    /// Members excluding the owner; the owner is tracked separately.
    pub member_ids: Vec<Uuid>,
    /// Members who can manage the group (the owner implicitly can).
    pub admin_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message: String,
    pub last_message_timestamp: DateTime<Utc>,
    pub last_message_sender_id: Option<Uuid>,
    pub is_active: bool,
    pub max_members: u32,
    /// Hidden from public discovery when true.
    pub is_private: bool,
    /// Per-member unread counters; key set tracks all_member_ids exactly.
    pub unread_count: HashMap<Uuid, i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl GroupChat {
    /// All member ids including the owner.
    pub fn all_member_ids(&self) -> Vec<Uuid> {
        let mut members = self.member_ids.clone();
        if !members.contains(&self.owner_id) {
            members.push(self.owner_id);
        }
        members
    }

    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Owner or admin.
    pub fn can_manage(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.is_admin(user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        user_id == self.owner_id || self.member_ids.contains(&user_id)
    }

    pub fn is_at_capacity(&self) -> bool {
        self.all_member_ids().len() as u32 >= self.max_members
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_count.get(&user_id).copied().unwrap_or(0)
    }
}

/// Parameters for creating a group chat.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(max = 100, message = "Group name must be at most 100 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    pub max_members: Option<u32>,
    #[serde(default = "default_true")]
    pub is_private: bool,
}

fn default_true() -> bool {
    true
}

// ─── Group Message ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMessageType {
    GroupCreated,
    MemberJoined,
    MemberRemoved,
    MemberLeft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: Uuid,
    pub group_chat_id: Uuid,
    pub sender_id: Uuid,
    /// Display name snapshot at send time.
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    /// Users who have seen this message (populated opportunistically).
    pub read_by: Vec<Uuid>,
    pub is_system_message: bool,
    pub system_message_type: Option<SystemMessageType>,
}

impl GroupMessage {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.contains(&user_id)
    }
}

// ─── Notifications ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PostLike,
    PostComment,
    CommentLike,
    DirectMessage,
    GroupMessage,
    Milestone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    InApp,
    Push,
}

/// Context consulted by per-target mutes when deciding dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub conversation_id: Option<String>,
    pub group_chat_id: Option<Uuid>,
    pub post_id: Option<Uuid>,
    pub sender_display_name: Option<String>,
}

/// Persisted notification record. The external push transport consumes
/// these; the channel flags let it decide delivery independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppNotification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub in_app_allowed: bool,
    pub push_allowed: bool,
    pub metadata: NotificationMetadata,
}

// ─── Notification Preferences ──────────────────────────

/// Per-type toggles for one delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub post_likes: bool,
    pub post_comments: bool,
    pub comment_likes: bool,
    pub direct_messages: bool,
    pub group_messages: bool,
    pub milestones: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            post_likes: true,
            post_comments: true,
            comment_likes: true,
            direct_messages: true,
            group_messages: true,
            milestones: true,
        }
    }
}

impl ChannelSettings {
    pub fn allows(&self, kind: NotificationType) -> bool {
        if !self.enabled {
            return false;
        }
        match kind {
            NotificationType::PostLike => self.post_likes,
            NotificationType::PostComment => self.post_comments,
            NotificationType::CommentLike => self.comment_likes,
            NotificationType::DirectMessage => self.direct_messages,
            NotificationType::GroupMessage => self.group_messages,
            NotificationType::Milestone => self.milestones,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub all_notifications_enabled: bool,
    pub in_app: ChannelSettings,
    pub push: ChannelSettings,
    #[serde(default)]
    pub muted_posts: Vec<Uuid>,
    #[serde(default)]
    pub muted_conversations: Vec<String>,
    #[serde(default)]
    pub muted_group_chats: Vec<Uuid>,
    #[serde(default)]
    pub muted_users: Vec<Uuid>,
    pub last_updated: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            all_notifications_enabled: true,
            in_app: ChannelSettings::default(),
            push: ChannelSettings::default(),
            muted_posts: Vec::new(),
            muted_conversations: Vec::new(),
            muted_group_chats: Vec::new(),
            muted_users: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

// ─── Unread Aggregation ────────────────────────────────

/// Snapshot of a user's unread totals across DMs and groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnreadAggregate {
    pub direct: i64,
    pub groups: i64,
    pub total: i64,
}
