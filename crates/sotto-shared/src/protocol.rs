//! WebSocket wire protocol.
//!
//! Every frame is one JSON object: `{"type": "<t>", "payload": {...}}`.
//! The envelope is decoded first so dispatch can distinguish an unknown type
//! from a malformed payload; payloads are decoded per type afterwards.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Frame type strings as they appear on the wire.
pub mod frame_type {
    pub const AUTH: &str = "auth";
    pub const AUTH_SUCCESS: &str = "auth.success";
    pub const AUTH_FAILED: &str = "auth.failed";
    pub const CHAT_REGISTER: &str = "chat.register";
    pub const CHAT_REGISTER_ACK: &str = "chat.register.ack";
    pub const CHAT_JOINED: &str = "chat.joined";
    pub const CHAT_EXPIRED: &str = "chat.expired";
    pub const MESSAGE_SEND: &str = "message.send";
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const MESSAGE_ACK: &str = "message.ack";
    pub const MESSAGE_DELIVERED: &str = "message.delivered";
    pub const MESSAGE_READ: &str = "message.read";
    pub const MESSAGE_READ_ACK: &str = "message.read.ack";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const TYPING_INDICATOR: &str = "typing.indicator";
    pub const SUBSCRIPTION_EXPIRED: &str = "subscription.expired";
    pub const RATE_LIMIT_WARNING: &str = "rate_limit.warning";
    pub const BANNED: &str = "banned";
    pub const ERROR: &str = "error";
    pub const PUSH_REGISTER: &str = "push.register";
    pub const PUSH_REGISTER_ACK: &str = "push.register.ack";
    pub const PUSH_UNREGISTER: &str = "push.unregister";
    pub const PUSH_UNREGISTER_ACK: &str = "push.unregister.ack";
    pub const PUSH_BURN_ALL: &str = "push.burn_all";
    pub const PUSH_BURN_ALL_ACK: &str = "push.burn_all.ack";
    pub const PING: &str = "ping";
}

/// Wire-visible error codes carried in `error` frames.
pub mod error_code {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const CHAT_NOT_FOUND: &str = "chat_not_found";
    pub const MESSAGE_TOO_LARGE: &str = "message_too_large";
    pub const UNKNOWN_TYPE: &str = "unknown_type";
    pub const DEVICE_PURGED: &str = "device_purged";
}

/// Failure reasons carried in `auth.failed` frames.
pub mod auth_reason {
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const TIMESTAMP_EXPIRED: &str = "timestamp_expired";
    pub const DEVICE_NOT_FOUND: &str = "device_not_found";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
}

/// Reasons carried in `banned` frames.
pub mod ban_reason {
    pub const RATE_LIMIT_ABUSE: &str = "rate_limit_abuse";
    pub const ABUSE: &str = "abuse";
}

/// The frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Frame {
    /// Builds a frame with a typed payload.
    ///
    /// Serialization of the payload structs in this module cannot fail, so a
    /// failure here would be a programming error; it degrades to an empty
    /// payload rather than panicking in the delivery path.
    pub fn new(kind: &str, payload: impl Serialize) -> Self {
        Self {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload).ok(),
        }
    }

    /// Builds a frame with no payload.
    pub fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: None,
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(
            frame_type::ERROR,
            ErrorPayload {
                code: code.to_string(),
                message: message.to_string(),
            },
        )
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decodes the payload into the struct expected for this frame type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let value = self.payload.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"type\":\"error\"}"))
    }
}

// ─── Inbound payloads ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub device_uuid: String,
    /// Hex-encoded HMAC-SHA256 over `<device_uuid>:<timestamp>`
    pub signature: String,
    /// Unix seconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRegisterPayload {
    pub chats: Vec<ChatRegistration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRegistration {
    pub chat_uuid: String,
    pub participant_id: String,
    pub participant_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendPayload {
    pub chat_uuid: String,
    pub message_id: String,
    /// Base64-encoded ciphertext
    pub encrypted_content: String,
    pub participant_id: String,
    pub participant_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadPayload {
    pub chat_uuid: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub chat_uuid: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub participant_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRegisterPayload {
    pub chat_uuid: String,
    pub fcm_token: String,
    pub participant_id: String,
    pub participant_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushUnregisterPayload {
    pub chat_uuid: String,
    pub participant_id: String,
    pub participant_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBurnAllPayload {
    pub participant_ids: Vec<String>,
}

// ─── Outbound payloads ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccessPayload {
    /// Always empty: chat membership is client-held.
    pub chats: Vec<ChatInfo>,
    pub subscription: SubscriptionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_uuid: String,
    pub created_at: i64,
    pub ttl: u32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub plan: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionExpiredPayload {
    pub renew_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRegisterAckPayload {
    pub registered: usize,
    pub failed: usize,
}

/// Sent to the chat creator when the invitation is claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatJoinedPayload {
    pub chat_uuid: String,
    pub participant_id: String,
    pub joiner_device_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatExpiredPayload {
    pub chat_uuid: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedPayload {
    pub chat_uuid: String,
    pub message_id: String,
    /// Sender's per-chat participant ID (routing identity)
    pub sender_uuid: String,
    /// Sender's device UUID, required by the recipient's cryptographic session
    pub sender_device_uuid: String,
    pub encrypted_content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAckPayload {
    pub chat_uuid: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeliveredPayload {
    pub chat_uuid: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadAckPayload {
    pub chat_uuid: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingIndicatorPayload {
    pub chat_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitWarningPayload {
    pub current: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRegisterAckPayload {
    pub chat_uuid: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushUnregisterAckPayload {
    pub chat_uuid: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBurnAllAckPayload {
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
