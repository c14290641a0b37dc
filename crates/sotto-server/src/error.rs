use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use sotto_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("missing authentication headers")]
    MissingAuthHeaders,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("timestamp expired")]
    TimestampExpired,

    #[error("device banned")]
    DeviceBanned { reason: String },

    #[error("device not found")]
    DeviceNotFound,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("subscription expired")]
    SubscriptionExpired { renew_url: String },

    #[error("rate limit exceeded")]
    RateLimited { current: usize, limit: usize },

    #[error("invitation_not_found")]
    InvitationNotFound,

    #[error("invitation_used")]
    InvitationUsed,

    #[error("chat_not_pending")]
    ChatNotPending,

    #[error("same_participant_id")]
    SameParticipantId,

    #[error("not a participant")]
    NotParticipant,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Store failures degrade to the nearest typed error; backend detail never
/// reaches the wire.
impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvitationNotFound => ServerError::InvitationNotFound,
            StoreError::InvitationUsed => ServerError::InvitationUsed,
            StoreError::ChatNotPending => ServerError::ChatNotPending,
            StoreError::SameParticipantId => ServerError::SameParticipantId,
            StoreError::ParticipantNotInChat => ServerError::NotParticipant,
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::Redis(_) | StoreError::Decode(_) => {
                ServerError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::MissingAuthHeaders
            | ServerError::InvalidTimestamp
            | ServerError::TimestampExpired
            | ServerError::DeviceNotFound
            | ServerError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ServerError::DeviceBanned { .. } | ServerError::NotParticipant => {
                StatusCode::FORBIDDEN
            }
            ServerError::SubscriptionExpired { .. } => StatusCode::PAYMENT_REQUIRED,
            ServerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvitationNotFound => StatusCode::NOT_FOUND,
            ServerError::InvitationUsed
            | ServerError::ChatNotPending
            | ServerError::SameParticipantId
            | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ServerError::DeviceBanned { reason } => serde_json::json!({
                "error": "device banned",
                "reason": reason,
            }),
            ServerError::SubscriptionExpired { renew_url } => serde_json::json!({
                "error": "subscription expired",
                "renew_url": renew_url,
            }),
            ServerError::RateLimited { current, limit } => serde_json::json!({
                "error": "rate limit exceeded",
                "current": current,
                "limit": limit,
            }),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal server error");
                serde_json::json!({ "error": "internal server error" })
            }
            other => serde_json::json!({ "error": other.to_string() }),
        };

        (status, axum::Json(body)).into_response()
    }
}
