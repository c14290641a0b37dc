use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stored value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invitation not found")]
    InvitationNotFound,

    #[error("invitation already used")]
    InvitationUsed,

    #[error("chat is not pending")]
    ChatNotPending,

    #[error("cannot join with the creator's participant id")]
    SameParticipantId,

    #[error("participant not in chat")]
    ParticipantNotInChat,

    #[error("record not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, StoreError>;
