use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("User not authenticated")]
    NotAuthenticated,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Group chat not found")]
    GroupNotFound,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("User is already a member")]
    AlreadyMember,

    #[error("User is not a member of this group")]
    NotMember,

    #[error("Group is at maximum capacity")]
    GroupFull,

    #[error("Cannot remove group owner")]
    CannotRemoveOwner,

    #[error("Owner cannot leave group. Transfer ownership first.")]
    OwnerCannotLeave,

    #[error("Invalid group name")]
    InvalidGroupName,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;
