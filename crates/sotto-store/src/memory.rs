//! In-memory backend.
//!
//! One mutex over the whole state: composite operations are atomic because
//! they hold the lock for their duration, which is exactly the guarantee the
//! Lua scripts give the Redis backend. TTLs are enforced lazily on access.
//!
//! Used by the test suites and as the `STORE_BACKEND=memory` dev backend;
//! state does not survive the process.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use sotto_shared::constants::{
    ABUSE_COUNTER_TTL_SECS, BOT_CADENCE_LIMIT, DUPLICATE_CONTENT_LIMIT, INVITE_USED_TTL_SECS,
    KEY_BUNDLE_TTL_SECS, MIN_MESSAGE_GAP_MS, PUSH_TTL_SECS, QUEUED_MESSAGE_TTL_SECS,
    RATE_WINDOW_SECS, WARNING_TTL_SECS,
};

use crate::error::{Result, StoreError};
use crate::store::{AbuseAction, MessageVerdict, Store};
use crate::types::{
    hash_secret, Ban, Chat, ChatStatus, Invitation, KeyBundle, PreKey, PushRegistration,
    QueuedMessage, StoredKeyBundle, Subscription, Warning,
};

struct Expiring<T> {
    value: T,
    deadline: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            deadline: Some(Instant::now() + ttl),
        }
    }

    fn live(&self) -> bool {
        self.deadline.is_none_or(|d| Instant::now() < d)
    }

    fn refresh(&mut self, ttl: Duration) {
        self.deadline = Some(Instant::now() + ttl);
    }
}

/// Drops the entry if its TTL has passed.
fn drop_expired<K, T>(map: &mut HashMap<K, Expiring<T>>, key: &K)
where
    K: std::hash::Hash + Eq,
{
    if map.get(key).is_some_and(|e| !e.live()) {
        map.remove(key);
    }
}

/// Drops the entry if its TTL has passed, then returns a live mutable ref.
fn live_entry<'a, K, T>(
    map: &'a mut HashMap<K, Expiring<T>>,
    key: &K,
) -> Option<&'a mut Expiring<T>>
where
    K: std::hash::Hash + Eq,
{
    drop_expired(map, key);
    map.get_mut(key)
}

#[derive(Default)]
struct State {
    pubkeys: HashMap<String, String>,
    subscriptions: HashMap<String, Expiring<Subscription>>,
    chats: HashMap<String, Expiring<Chat>>,
    invites: HashMap<String, Expiring<Invitation>>,
    messages: HashMap<(String, String), Expiring<QueuedMessage>>,
    queues: HashMap<String, Expiring<Vec<String>>>,
    bundles: HashMap<String, Expiring<StoredKeyBundle>>,
    // BTreeMap so "first available prekey" is deterministic
    prekeys: HashMap<String, Expiring<BTreeMap<u32, PreKey>>>,
    push: HashMap<(String, String), Expiring<PushRegistration>>,
    rate: HashMap<String, Vec<i64>>,
    msghash: HashMap<(String, String), Expiring<i64>>,
    msgtiming: HashMap<String, Expiring<i64>>,
    botcount: HashMap<String, Expiring<i64>>,
    warnings: HashMap<String, Expiring<Warning>>,
    bans: HashMap<String, Ban>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn put_device(
        &self,
        device: &str,
        public_key: &str,
        subscription: &Subscription,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pubkeys.insert(device.to_string(), public_key.to_string());
        let remaining = (subscription.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(3600));
        state.subscriptions.insert(
            device.to_string(),
            Expiring::new(subscription.clone(), remaining),
        );
        Ok(())
    }

    async fn public_key(&self, device: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.pubkeys.get(device).cloned())
    }

    async fn subscription(&self, device: &str) -> Result<Option<Subscription>> {
        let mut state = self.state.lock().await;
        Ok(live_entry(&mut state.subscriptions, &device.to_string()).map(|e| e.value.clone()))
    }

    async fn purge_device(&self, device: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pubkeys.remove(device);
        state.subscriptions.remove(device);
        state.bundles.remove(device);
        state.prekeys.remove(device);
        state.rate.remove(device);
        state.warnings.remove(device);
        state.msgtiming.remove(device);
        state.botcount.remove(device);
        state.msghash.retain(|(dev, _), _| dev != device);
        // The ban record, if any, deliberately survives the purge.
        Ok(())
    }

    async fn create_chat(&self, chat: &Chat, invitation: &Invitation) -> Result<()> {
        let chat_ttl = Duration::from_secs(sotto_shared::constants::CHAT_TTL_SECS);
        let mut state = self.state.lock().await;
        state
            .chats
            .insert(chat.chat_uuid.clone(), Expiring::new(chat.clone(), chat_ttl));
        state.invites.insert(
            invitation.token.clone(),
            Expiring::new(invitation.clone(), chat_ttl),
        );
        Ok(())
    }

    async fn chat(&self, chat_uuid: &str) -> Result<Option<Chat>> {
        let mut state = self.state.lock().await;
        Ok(live_entry(&mut state.chats, &chat_uuid.to_string()).map(|e| e.value.clone()))
    }

    async fn delete_chat(&self, chat_uuid: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.chats.remove(chat_uuid);
        Ok(())
    }

    async fn join_chat(
        &self,
        token: &str,
        joiner_device: &str,
        participant_id: &str,
        participant_secret: &str,
    ) -> Result<(Chat, String)> {
        let mut state = self.state.lock().await;

        let (chat_uuid, creator) = {
            let invite = live_entry(&mut state.invites, &token.to_string())
                .ok_or(StoreError::InvitationNotFound)?;
            if invite.value.used {
                return Err(StoreError::InvitationUsed);
            }
            (
                invite.value.chat_uuid.clone(),
                invite.value.creator_device_id.clone(),
            )
        };

        let chat = {
            let entry = live_entry(&mut state.chats, &chat_uuid)
                .ok_or(StoreError::InvitationNotFound)?;
            if entry.value.status != ChatStatus::Pending {
                return Err(StoreError::ChatNotPending);
            }
            if entry.value.participant_a == participant_id {
                return Err(StoreError::SameParticipantId);
            }
            entry.value.participant_b = participant_id.to_string();
            entry.value.participant_b_secret = hash_secret(participant_secret);
            entry.value.participant_b_device = joiner_device.to_string();
            entry.value.status = ChatStatus::Active;
            entry.value.clone()
        };

        if let Some(invite) = state.invites.get_mut(token) {
            invite.value.used = true;
            invite.refresh(Duration::from_secs(INVITE_USED_TTL_SECS));
        }

        Ok((chat, creator))
    }

    async fn validate_participant(
        &self,
        chat_uuid: &str,
        participant_id: &str,
        secret: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(live_entry(&mut state.chats, &chat_uuid.to_string())
            .map(|e| e.value.verify_secret(participant_id, secret))
            .unwrap_or(false))
    }

    async fn participant_for_device(
        &self,
        chat_uuid: &str,
        device: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(live_entry(&mut state.chats, &chat_uuid.to_string())
            .and_then(|e| e.value.participant_for_device(device).map(String::from)))
    }

    async fn enqueue_message(
        &self,
        chat_uuid: &str,
        message_id: &str,
        message: &QueuedMessage,
    ) -> Result<()> {
        let ttl = Duration::from_secs(QUEUED_MESSAGE_TTL_SECS);
        let mut state = self.state.lock().await;
        state.messages.insert(
            (chat_uuid.to_string(), message_id.to_string()),
            Expiring::new(message.clone(), ttl),
        );

        drop_expired(&mut state.queues, &chat_uuid.to_string());
        let queue = state
            .queues
            .entry(chat_uuid.to_string())
            .or_insert_with(|| Expiring::new(Vec::new(), ttl));
        queue.value.push(message_id.to_string());
        queue.refresh(ttl);
        Ok(())
    }

    async fn queued_messages(
        &self,
        chat_uuid: &str,
        recipient_participant: &str,
    ) -> Result<Vec<(String, QueuedMessage)>> {
        let mut state = self.state.lock().await;
        let ids = match live_entry(&mut state.queues, &chat_uuid.to_string()) {
            Some(queue) => queue.value.clone(),
            None => return Ok(Vec::new()),
        };

        let mut drained = Vec::new();
        for id in ids {
            let key = (chat_uuid.to_string(), id.clone());
            if let Some(entry) = live_entry(&mut state.messages, &key) {
                if entry.value.sender_participant != recipient_participant {
                    drained.push((id, entry.value.clone()));
                }
            }
        }
        Ok(drained)
    }

    async fn delete_queued_message(&self, chat_uuid: &str, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .messages
            .remove(&(chat_uuid.to_string(), message_id.to_string()));
        if let Some(queue) = state.queues.get_mut(chat_uuid) {
            if let Some(pos) = queue.value.iter().position(|id| id == message_id) {
                queue.value.remove(pos);
            }
        }
        Ok(())
    }

    async fn store_key_bundle(
        &self,
        device: &str,
        bundle: &StoredKeyBundle,
        prekeys: &[PreKey],
    ) -> Result<()> {
        let ttl = Duration::from_secs(KEY_BUNDLE_TTL_SECS);
        let mut state = self.state.lock().await;
        state
            .bundles
            .insert(device.to_string(), Expiring::new(bundle.clone(), ttl));
        let set: BTreeMap<u32, PreKey> = prekeys.iter().map(|pk| (pk.id, pk.clone())).collect();
        state
            .prekeys
            .insert(device.to_string(), Expiring::new(set, ttl));
        Ok(())
    }

    async fn add_prekeys(&self, device: &str, prekeys: &[PreKey]) -> Result<()> {
        let ttl = Duration::from_secs(KEY_BUNDLE_TTL_SECS);
        let mut state = self.state.lock().await;

        drop_expired(&mut state.prekeys, &device.to_string());
        let entry = state
            .prekeys
            .entry(device.to_string())
            .or_insert_with(|| Expiring::new(BTreeMap::new(), ttl));
        for pk in prekeys {
            entry.value.insert(pk.id, pk.clone());
        }
        entry.refresh(ttl);
        Ok(())
    }

    async fn take_key_bundle(&self, device: &str) -> Result<Option<KeyBundle>> {
        let mut state = self.state.lock().await;
        let stored = match live_entry(&mut state.bundles, &device.to_string()) {
            Some(entry) => entry.value.clone(),
            None => return Ok(None),
        };

        let prekey = live_entry(&mut state.prekeys, &device.to_string()).and_then(|entry| {
            let id = *entry.value.keys().next()?;
            entry.value.remove(&id)
        });

        Ok(Some(KeyBundle::from_stored(stored, prekey)))
    }

    async fn prekey_count(&self, device: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        Ok(live_entry(&mut state.prekeys, &device.to_string())
            .map(|e| e.value.len())
            .unwrap_or(0))
    }

    async fn refresh_key_bundle_ttl(&self, device: &str) -> Result<()> {
        let ttl = Duration::from_secs(KEY_BUNDLE_TTL_SECS);
        let mut state = self.state.lock().await;
        if let Some(entry) = live_entry(&mut state.bundles, &device.to_string()) {
            entry.refresh(ttl);
        }
        if let Some(entry) = live_entry(&mut state.prekeys, &device.to_string()) {
            entry.refresh(ttl);
        }
        Ok(())
    }

    async fn delete_key_bundle(&self, device: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.bundles.remove(device);
        state.prekeys.remove(device);
        Ok(())
    }

    async fn register_push(
        &self,
        chat_uuid: &str,
        participant_id: &str,
        token: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let in_chat = live_entry(&mut state.chats, &chat_uuid.to_string())
            .map(|e| {
                e.value.participant_a == participant_id || e.value.participant_b == participant_id
            })
            .unwrap_or(false);
        if !in_chat {
            return Err(StoreError::ParticipantNotInChat);
        }

        state.push.insert(
            (chat_uuid.to_string(), participant_id.to_string()),
            Expiring::new(
                PushRegistration {
                    token: token.to_string(),
                    created_at: Utc::now(),
                },
                Duration::from_secs(PUSH_TTL_SECS),
            ),
        );
        Ok(())
    }

    async fn push_token(&self, chat_uuid: &str, participant_id: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let key = (chat_uuid.to_string(), participant_id.to_string());
        Ok(live_entry(&mut state.push, &key).map(|e| e.value.token.clone()))
    }

    async fn unregister_push(&self, chat_uuid: &str, participant_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .push
            .remove(&(chat_uuid.to_string(), participant_id.to_string()));
        Ok(())
    }

    async fn burn_push_registrations(&self, participant_ids: &[String]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.push.len();
        state
            .push
            .retain(|(_, pid), _| !participant_ids.contains(pid));
        Ok(before - state.push.len())
    }

    async fn purge_chat_push(&self, chat_uuid: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.push.retain(|(chat, _), _| chat != chat_uuid);
        Ok(())
    }

    async fn check_rate_limit(&self, device: &str, limit: usize) -> Result<(usize, bool)> {
        let now = now_ms();
        let window_start = now - (RATE_WINDOW_SECS as i64) * 1000;

        let mut state = self.state.lock().await;
        let events = state.rate.entry(device.to_string()).or_default();
        events.retain(|&ts| ts >= window_start);

        if events.len() >= limit {
            return Ok((events.len(), false));
        }
        events.push(now);
        Ok((events.len(), true))
    }

    async fn record_message(&self, device: &str, content_hash: &str) -> Result<MessageVerdict> {
        let counter_ttl = Duration::from_secs(ABUSE_COUNTER_TTL_SECS);
        let now = now_ms();
        let mut state = self.state.lock().await;

        let hash_key = (device.to_string(), content_hash.to_string());
        drop_expired(&mut state.msghash, &hash_key);
        let counter = state
            .msghash
            .entry(hash_key)
            .or_insert_with(|| Expiring::new(0, counter_ttl));
        counter.value += 1;
        counter.refresh(counter_ttl);
        if counter.value >= DUPLICATE_CONTENT_LIMIT {
            return Ok(MessageVerdict::DuplicateContent);
        }

        let last = live_entry(&mut state.msgtiming, &device.to_string()).map(|e| e.value);
        if let Some(last) = last {
            if now - last < MIN_MESSAGE_GAP_MS {
                drop_expired(&mut state.botcount, &device.to_string());
                let bots = state
                    .botcount
                    .entry(device.to_string())
                    .or_insert_with(|| Expiring::new(0, counter_ttl));
                bots.value += 1;
                bots.refresh(counter_ttl);
                if bots.value >= BOT_CADENCE_LIMIT {
                    return Ok(MessageVerdict::BotCadence);
                }
            }
        }

        state
            .msgtiming
            .insert(device.to_string(), Expiring::new(now, Duration::from_secs(60)));
        Ok(MessageVerdict::Clean)
    }

    async fn is_banned(&self, device: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.bans.get(device).map(|b| b.reason.clone()))
    }

    async fn handle_abuse(&self, device: &str, reason: &str) -> Result<AbuseAction> {
        let mut state = self.state.lock().await;

        if state.bans.contains_key(device) {
            return Ok(AbuseAction::Banned);
        }

        let warned = live_entry(&mut state.warnings, &device.to_string())
            .map(|e| e.value.count >= 1)
            .unwrap_or(false);

        if warned {
            state.bans.insert(
                device.to_string(),
                Ban {
                    device_uuid: device.to_string(),
                    reason: reason.to_string(),
                    banned_at: Utc::now(),
                },
            );
            state.warnings.remove(device);
            state.rate.remove(device);
            return Ok(AbuseAction::Banned);
        }

        state.warnings.insert(
            device.to_string(),
            Expiring::new(
                Warning {
                    device_uuid: device.to_string(),
                    reason: reason.to_string(),
                    count: 1,
                    last_warning: Utc::now(),
                },
                Duration::from_secs(WARNING_TTL_SECS),
            ),
        );
        Ok(AbuseAction::Warned)
    }

    async fn ban_device(&self, device: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.bans.insert(
            device.to_string(),
            Ban {
                device_uuid: device.to_string(),
                reason: reason.to_string(),
                banned_at: Utc::now(),
            },
        );
        state.warnings.remove(device);
        state.rate.remove(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignedPreKey;

    fn chat_and_invite() -> (Chat, Invitation) {
        let chat = Chat {
            chat_uuid: "c1".into(),
            participant_a: "pA".into(),
            participant_a_secret: hash_secret("sA"),
            participant_a_device: "dev-A".into(),
            participant_b: String::new(),
            participant_b_secret: String::new(),
            participant_b_device: String::new(),
            ttl_seconds: 60,
            created_at: Utc::now(),
            status: ChatStatus::Pending,
        };
        let invite = Invitation {
            token: "t1".into(),
            chat_uuid: "c1".into(),
            creator_device_id: "dev-A".into(),
            ttl_seconds: 60,
            created_at: Utc::now(),
            used: false,
        };
        (chat, invite)
    }

    #[tokio::test]
    async fn test_join_activates_chat() {
        let store = MemoryStore::new();
        let (chat, invite) = chat_and_invite();
        store.create_chat(&chat, &invite).await.unwrap();

        let (joined, creator) = store.join_chat("t1", "dev-B", "pB", "sB").await.unwrap();
        assert_eq!(joined.status, ChatStatus::Active);
        assert_eq!(joined.participant_b, "pB");
        assert_eq!(joined.participant_b_device, "dev-B");
        assert_eq!(creator, "dev-A");

        assert!(store.validate_participant("c1", "pB", "sB").await.unwrap());
        assert!(!store.validate_participant("c1", "pB", "wrong").await.unwrap());
    }

    #[tokio::test]
    async fn test_join_rejects_reuse_and_self() {
        let store = MemoryStore::new();
        let (chat, invite) = chat_and_invite();
        store.create_chat(&chat, &invite).await.unwrap();

        let err = store.join_chat("t1", "dev-A", "pA", "sA").await.unwrap_err();
        assert!(matches!(err, StoreError::SameParticipantId));

        store.join_chat("t1", "dev-B", "pB", "sB").await.unwrap();

        let err = store.join_chat("t1", "dev-C", "pC", "sC").await.unwrap_err();
        assert!(matches!(err, StoreError::InvitationUsed));

        let err = store
            .join_chat("missing", "dev-C", "pC", "sC")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvitationNotFound));
    }

    #[tokio::test]
    async fn test_queue_preserves_fifo_and_skips_own() {
        let store = MemoryStore::new();
        for (id, sender) in [("m1", "pA"), ("m2", "pB"), ("m3", "pA")] {
            store
                .enqueue_message(
                    "c1",
                    id,
                    &QueuedMessage {
                        sender_participant: sender.into(),
                        sender_device_uuid: "dev".into(),
                        encrypted_content: format!("content-{id}"),
                    },
                )
                .await
                .unwrap();
        }

        let drained = store.queued_messages("c1", "pB").await.unwrap();
        let ids: Vec<&str> = drained.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["m1", "m3"]);

        store.delete_queued_message("c1", "m1").await.unwrap();
        let drained = store.queued_messages("c1", "pB").await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "m3");

        // idempotent delete
        store.delete_queued_message("c1", "m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_prekeys_consumed_once_each() {
        let store = MemoryStore::new();
        let bundle = StoredKeyBundle {
            registration_id: 7,
            identity_key: "ik".into(),
            signed_prekey: SignedPreKey {
                id: 1,
                public_key: "spk".into(),
                signature: "sig".into(),
            },
        };
        let prekeys: Vec<PreKey> = (1..=3)
            .map(|id| PreKey {
                id,
                public_key: format!("pk{id}"),
            })
            .collect();
        store.store_key_bundle("dev-T", &bundle, &prekeys).await.unwrap();
        assert_eq!(store.prekey_count("dev-T").await.unwrap(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let fetched = store.take_key_bundle("dev-T").await.unwrap().unwrap();
            seen.push(fetched.prekey.unwrap().id);
        }
        seen.sort_unstable();
        assert_eq!(seen, [1, 2, 3]);

        // exhausted: bundle still comes back, without a prekey
        let fetched = store.take_key_bundle("dev-T").await.unwrap().unwrap();
        assert!(fetched.prekey.is_none());
        assert_eq!(fetched.registration_id, 7);
    }

    #[tokio::test]
    async fn test_replenish_keeps_existing_prekeys() {
        let store = MemoryStore::new();
        let bundle = StoredKeyBundle {
            registration_id: 1,
            identity_key: "ik".into(),
            signed_prekey: SignedPreKey {
                id: 1,
                public_key: "spk".into(),
                signature: "sig".into(),
            },
        };
        store
            .store_key_bundle(
                "dev",
                &bundle,
                &[PreKey {
                    id: 1,
                    public_key: "pk1".into(),
                }],
            )
            .await
            .unwrap();
        store
            .add_prekeys(
                "dev",
                &[PreKey {
                    id: 2,
                    public_key: "pk2".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.prekey_count("dev").await.unwrap(), 2);

        // a second full registration replaces everything
        store
            .store_key_bundle(
                "dev",
                &bundle,
                &[PreKey {
                    id: 9,
                    public_key: "pk9".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.prekey_count("dev").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let (count, allowed) = store.check_rate_limit("dev", 5).await.unwrap();
            assert!(allowed, "send {i} should pass");
            assert_eq!(count, i + 1);
        }
        let (count, allowed) = store.check_rate_limit("dev", 5).await.unwrap();
        assert!(!allowed);
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_abuse_ladder_warn_then_ban() {
        let store = MemoryStore::new();
        assert_eq!(
            store.handle_abuse("dev", "rate_limit_exceeded").await.unwrap(),
            AbuseAction::Warned
        );
        assert!(store.is_banned("dev").await.unwrap().is_none());

        assert_eq!(
            store.handle_abuse("dev", "rate_limit_exceeded").await.unwrap(),
            AbuseAction::Banned
        );
        assert_eq!(
            store.is_banned("dev").await.unwrap().as_deref(),
            Some("rate_limit_exceeded")
        );

        // terminal: further violations stay banned
        assert_eq!(
            store.handle_abuse("dev", "whatever").await.unwrap(),
            AbuseAction::Banned
        );
    }

    #[tokio::test]
    async fn test_duplicate_content_verdict() {
        let store = MemoryStore::new();
        for _ in 0..9 {
            assert!(store
                .record_message("dev", "deadbeef")
                .await
                .unwrap()
                .is_clean());
        }
        assert_eq!(
            store.record_message("dev", "deadbeef").await.unwrap(),
            MessageVerdict::DuplicateContent
        );
        // a different hash is unaffected
        assert!(store
            .record_message("dev", "cafebabe")
            .await
            .unwrap()
            .is_clean());
    }

    #[tokio::test]
    async fn test_bot_cadence_verdict() {
        let store = MemoryStore::new();
        // distinct content, but sent back-to-back far under the human gap
        let mut tripped = false;
        for i in 0..40 {
            let verdict = store
                .record_message("dev", &format!("hash-{i}"))
                .await
                .unwrap();
            if verdict == MessageVerdict::BotCadence {
                tripped = true;
                break;
            }
        }
        assert!(tripped, "sub-500ms cadence must trip the counter");
    }

    #[tokio::test]
    async fn test_push_registration_lifecycle() {
        let store = MemoryStore::new();
        let (mut chat, invite) = chat_and_invite();
        chat.participant_b = "pB".into();
        chat.participant_b_device = "dev-B".into();
        chat.status = ChatStatus::Active;
        store.create_chat(&chat, &invite).await.unwrap();

        let err = store.register_push("c1", "pX", "tok").await.unwrap_err();
        assert!(matches!(err, StoreError::ParticipantNotInChat));

        store.register_push("c1", "pB", "tok-1").await.unwrap();
        assert_eq!(
            store.push_token("c1", "pB").await.unwrap().as_deref(),
            Some("tok-1")
        );

        store.unregister_push("c1", "pB").await.unwrap();
        assert!(store.push_token("c1", "pB").await.unwrap().is_none());

        store.register_push("c1", "pA", "tok-2").await.unwrap();
        store.register_push("c1", "pB", "tok-3").await.unwrap();
        let deleted = store
            .burn_push_registrations(&["pA".to_string(), "pB".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_purge_device_keeps_ban() {
        let store = MemoryStore::new();
        let sub = Subscription {
            plan: "1_day_solo".into(),
            status: "active".into(),
            expires_at: Utc::now() + chrono::Duration::days(1),
            created_at: Utc::now(),
        };
        store.put_device("dev", "key", &sub).await.unwrap();
        store.ban_device("dev", "abuse").await.unwrap();

        store.purge_device("dev").await.unwrap();
        assert!(store.public_key("dev").await.unwrap().is_none());
        assert!(store.subscription("dev").await.unwrap().is_none());
        assert!(store.is_banned("dev").await.unwrap().is_some());
    }
}
