//! Stored value shapes.
//!
//! Every value is serialized as JSON under its key family (see
//! [`crate::keyspace`]). Field names are part of the storage format: the
//! atomic join script reads and rewrites chat records by these names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Pending,
    Active,
}

/// A 1↔1 conversation scope. Participant IDs are opaque, client-minted and
/// scoped to this chat only; the same person holds unrelated IDs in other
/// chats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub chat_uuid: String,
    pub participant_a: String,
    /// SHA-256 hex of the client-chosen secret, never the secret itself
    pub participant_a_secret: String,
    pub participant_a_device: String,
    pub participant_b: String,
    pub participant_b_secret: String,
    pub participant_b_device: String,
    /// Client-declared lifetime of ciphertext inside the chat
    pub ttl_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub status: ChatStatus,
}

impl Chat {
    /// Returns the participant ID held by `device` in this chat, if any.
    pub fn participant_for_device(&self, device: &str) -> Option<&str> {
        if !self.participant_a_device.is_empty() && self.participant_a_device == device {
            Some(&self.participant_a)
        } else if !self.participant_b_device.is_empty() && self.participant_b_device == device {
            Some(&self.participant_b)
        } else {
            None
        }
    }

    /// Returns the participant ID on the other side of `participant_id`.
    pub fn other_participant(&self, participant_id: &str) -> &str {
        if self.participant_a == participant_id {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }

    /// Checks a participant's secret against the stored hash.
    pub fn verify_secret(&self, participant_id: &str, secret: &str) -> bool {
        let stored = if self.participant_a == participant_id {
            &self.participant_a_secret
        } else if self.participant_b == participant_id {
            &self.participant_b_secret
        } else {
            return false;
        };
        let hash = hash_secret(secret);
        hash.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// Single-use token binding a pending chat to its eventual second participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub token: String,
    pub chat_uuid: String,
    pub creator_device_id: String,
    pub ttl_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub used: bool,
}

/// Store-and-forward entry for an offline recipient. The ciphertext is kept
/// exactly as the sender encoded it; the server never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub sender_participant: String,
    pub sender_device_uuid: String,
    /// Base64 ciphertext, passed through byte-identical
    pub encrypted_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKey {
    pub id: u32,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub id: u32,
    pub public_key: String,
    pub signature: String,
}

/// The part of a key bundle that persists across fetches (prekeys live in a
/// separate hash so one can be consumed atomically per fetch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeyBundle {
    pub registration_id: u32,
    pub identity_key: String,
    pub signed_prekey: SignedPreKey,
}

/// A fetched bundle: the stored part plus at most one consumed prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub registration_id: u32,
    pub identity_key: String,
    pub signed_prekey: SignedPreKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prekey: Option<PreKey>,
}

impl KeyBundle {
    pub fn from_stored(stored: StoredKeyBundle, prekey: Option<PreKey>) -> Self {
        Self {
            registration_id: stored.registration_id,
            identity_key: stored.identity_key,
            signed_prekey: stored.signed_prekey,
            prekey,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == "active" && Utc::now() < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRegistration {
    pub token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub device_uuid: String,
    pub reason: String,
    pub count: u32,
    pub last_warning: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ban {
    pub device_uuid: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
}

/// SHA-256 hex of a participant secret. This is what chat records store.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// SHA-256 hex of ciphertext bytes, used only for duplicate-content
/// accounting. The hash never leaves the abuse counters.
pub fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chat() -> Chat {
        Chat {
            chat_uuid: "c1".into(),
            participant_a: "pA".into(),
            participant_a_secret: hash_secret("sA"),
            participant_a_device: "dev-A".into(),
            participant_b: "pB".into(),
            participant_b_secret: hash_secret("sB"),
            participant_b_device: "dev-B".into(),
            ttl_seconds: 60,
            created_at: Utc::now(),
            status: ChatStatus::Active,
        }
    }

    #[test]
    fn test_verify_secret() {
        let chat = sample_chat();
        assert!(chat.verify_secret("pA", "sA"));
        assert!(chat.verify_secret("pB", "sB"));
        assert!(!chat.verify_secret("pA", "sB"));
        assert!(!chat.verify_secret("pC", "sA"));
    }

    #[test]
    fn test_participant_for_device() {
        let mut chat = sample_chat();
        assert_eq!(chat.participant_for_device("dev-A"), Some("pA"));
        assert_eq!(chat.participant_for_device("dev-B"), Some("pB"));
        assert_eq!(chat.participant_for_device("dev-C"), None);

        // A pending chat has empty B fields; an empty device must not match
        chat.participant_b_device.clear();
        assert_eq!(chat.participant_for_device(""), None);
    }

    #[test]
    fn test_chat_status_wire_format() {
        let json = serde_json::to_string(&ChatStatus::Pending).unwrap();
        assert_eq!(json, r#""pending""#);
    }

    #[test]
    fn test_subscription_active() {
        let sub = Subscription {
            plan: "1_month_solo".into(),
            status: "active".into(),
            expires_at: Utc::now() + chrono::Duration::days(3),
            created_at: Utc::now(),
        };
        assert!(sub.is_active());

        let expired = Subscription {
            expires_at: Utc::now() - chrono::Duration::hours(1),
            ..sub
        };
        assert!(!expired.is_active());
    }
}
