use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Chat, Invitation, KeyBundle, PreKey, QueuedMessage, StoredKeyBundle, Subscription,
};

/// Outcome of the warn→ban escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseAction {
    /// First violation inside the warning window; the caller may continue.
    Warned,
    /// The device is now (or already was) banned.
    Banned,
}

/// Verdict of the per-send abuse accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVerdict {
    Clean,
    /// The same ciphertext hash was sent too many times inside the window.
    DuplicateContent,
    /// Sub-human send cadence repeated too often inside the window.
    BotCadence,
}

impl MessageVerdict {
    pub fn is_clean(self) -> bool {
        matches!(self, MessageVerdict::Clean)
    }
}

/// The relay's only persistence surface.
///
/// Implementations must make every composite operation (`join_chat`,
/// `take_key_bundle`, `store_key_bundle`) atomic under concurrent callers,
/// and must expire every key family by its declared TTL. No method ever
/// stores plaintext or a payment↔device link.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // ─── Devices & subscriptions ───
    //
    // Written by the external activation flow; the relay itself only reads.

    /// Binds a device to its session-proof key and subscription. The
    /// subscription entry expires when the subscription does.
    async fn put_device(
        &self,
        device: &str,
        public_key: &str,
        subscription: &Subscription,
    ) -> Result<()>;

    async fn public_key(&self, device: &str) -> Result<Option<String>>;

    async fn subscription(&self, device: &str) -> Result<Option<Subscription>>;

    /// Deletes everything keyed by this device except its ban record.
    async fn purge_device(&self, device: &str) -> Result<()>;

    // ─── Chats & invitations ───

    async fn create_chat(&self, chat: &Chat, invitation: &Invitation) -> Result<()>;

    async fn chat(&self, chat_uuid: &str) -> Result<Option<Chat>>;

    async fn delete_chat(&self, chat_uuid: &str) -> Result<()>;

    /// Claims an invitation and fills the chat's B side, atomically. At most
    /// one caller succeeds per token; losers see [`StoreError::InvitationUsed`]
    /// or [`StoreError::InvitationNotFound`]. Returns the activated chat and
    /// the creator's device UUID.
    ///
    /// [`StoreError::InvitationUsed`]: crate::StoreError::InvitationUsed
    /// [`StoreError::InvitationNotFound`]: crate::StoreError::InvitationNotFound
    async fn join_chat(
        &self,
        token: &str,
        joiner_device: &str,
        participant_id: &str,
        participant_secret: &str,
    ) -> Result<(Chat, String)>;

    /// Constant-time check of a participant secret against the chat record.
    /// Unknown chats and unknown participants are plain `false`.
    async fn validate_participant(
        &self,
        chat_uuid: &str,
        participant_id: &str,
        secret: &str,
    ) -> Result<bool>;

    /// Resolves the participant ID a device holds in a chat, from the chat
    /// record itself rather than client claims.
    async fn participant_for_device(&self, chat_uuid: &str, device: &str)
        -> Result<Option<String>>;

    // ─── Message queue ───

    async fn enqueue_message(
        &self,
        chat_uuid: &str,
        message_id: &str,
        message: &QueuedMessage,
    ) -> Result<()>;

    /// Drains pending entries for `recipient_participant` in enqueue order,
    /// skipping the recipient's own messages. Entries whose TTL already
    /// expired are silently absent.
    async fn queued_messages(
        &self,
        chat_uuid: &str,
        recipient_participant: &str,
    ) -> Result<Vec<(String, QueuedMessage)>>;

    async fn delete_queued_message(&self, chat_uuid: &str, message_id: &str) -> Result<()>;

    // ─── Key bundles ───

    /// Stores the bundle and replaces all prekeys, atomically. Initial
    /// registration only; replenishment goes through [`Store::add_prekeys`].
    async fn store_key_bundle(
        &self,
        device: &str,
        bundle: &StoredKeyBundle,
        prekeys: &[PreKey],
    ) -> Result<()>;

    async fn add_prekeys(&self, device: &str, prekeys: &[PreKey]) -> Result<()>;

    /// Fetches the bundle with at most one prekey attached, consuming it
    /// atomically. Each prekey is handed out exactly once across concurrent
    /// callers; when none remain the bundle is returned without one.
    async fn take_key_bundle(&self, device: &str) -> Result<Option<KeyBundle>>;

    async fn prekey_count(&self, device: &str) -> Result<usize>;

    async fn refresh_key_bundle_ttl(&self, device: &str) -> Result<()>;

    async fn delete_key_bundle(&self, device: &str) -> Result<()>;

    // ─── Push registrations ───

    /// Stores a chat-scoped wake token, keyed by participant so the
    /// registration survives device-handle changes within the chat. Fails
    /// with [`StoreError::ParticipantNotInChat`] if the participant is not
    /// part of the chat.
    ///
    /// [`StoreError::ParticipantNotInChat`]: crate::StoreError::ParticipantNotInChat
    async fn register_push(&self, chat_uuid: &str, participant_id: &str, token: &str)
        -> Result<()>;

    async fn push_token(&self, chat_uuid: &str, participant_id: &str) -> Result<Option<String>>;

    async fn unregister_push(&self, chat_uuid: &str, participant_id: &str) -> Result<()>;

    /// Deletes every push registration for each of the given participant IDs
    /// across all chats. Returns the number deleted.
    async fn burn_push_registrations(&self, participant_ids: &[String]) -> Result<usize>;

    /// Deletes every push registration scoped to a chat.
    async fn purge_chat_push(&self, chat_uuid: &str) -> Result<()>;

    // ─── Rate limiting & abuse ───

    /// Sliding-window rate check. Evicts events older than the window, then
    /// either denies (returning the current count) or records this event.
    /// Returns `(count, allowed)`.
    async fn check_rate_limit(&self, device: &str, limit: usize) -> Result<(usize, bool)>;

    /// Per-send abuse accounting: duplicate-content counter and send-cadence
    /// tracker. Best-effort; counters expire on their own.
    async fn record_message(&self, device: &str, content_hash: &str) -> Result<MessageVerdict>;

    /// Returns the ban reason if the device is banned.
    async fn is_banned(&self, device: &str) -> Result<Option<String>>;

    /// Escalation ladder: already banned → `Banned`; an unexpired warning
    /// exists → ban now (clearing warning and rate state) and return
    /// `Banned`; otherwise record a 24 h warning and return `Warned`.
    async fn handle_abuse(&self, device: &str, reason: &str) -> Result<AbuseAction>;

    /// Writes a permanent ban record and clears the device's warning and
    /// rate state.
    async fn ban_device(&self, device: &str, reason: &str) -> Result<()>;
}
