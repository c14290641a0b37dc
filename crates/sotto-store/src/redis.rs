//! Redis backend.
//!
//! Two coordination disciplines, never mixed: multi-step invariants (the
//! invitation claim, the single-prekey consume, the prekey replace-all) run
//! as Lua scripts so they are atomic under concurrent clients; best-effort
//! work (TTL refresh, abuse counters) uses plain commands or pipelines.

use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use async_trait::async_trait;

use sotto_shared::constants::{
    ABUSE_COUNTER_TTL_SECS, BOT_CADENCE_LIMIT, CHAT_TTL_SECS, DUPLICATE_CONTENT_LIMIT,
    INVITE_USED_TTL_SECS, KEY_BUNDLE_TTL_SECS, MIN_MESSAGE_GAP_MS, PUSH_TTL_SECS,
    QUEUED_MESSAGE_TTL_SECS, RATE_WINDOW_SECS, WARNING_TTL_SECS,
};

use crate::error::{Result, StoreError};
use crate::keyspace;
use crate::store::{AbuseAction, MessageVerdict, Store};
use crate::types::{
    hash_secret, Ban, Chat, Invitation, KeyBundle, PreKey, PushRegistration, QueuedMessage,
    StoredKeyBundle, Subscription, Warning,
};

/// Claims an invitation and activates its chat in one step.
///
/// KEYS[1] = invite key; ARGV = joiner device, participant id, secret hash,
/// used-marker TTL. Returns `{code, chat_json, creator_device}` where code 1
/// is success and the negative codes map onto the join error taxonomy.
const JOIN_SCRIPT: &str = r#"
local inv_json = redis.call('GET', KEYS[1])
if not inv_json then
    return {-1, '', ''}
end
local inv = cjson.decode(inv_json)
if inv.used then
    return {-2, '', ''}
end
local chat_key = 'chat:' .. inv.chat_uuid
local chat_json = redis.call('GET', chat_key)
if not chat_json then
    return {-1, '', ''}
end
local chat = cjson.decode(chat_json)
if chat.status ~= 'pending' then
    return {-4, '', ''}
end
if chat.participant_a == ARGV[2] then
    return {-3, '', ''}
end
chat.participant_b = ARGV[2]
chat.participant_b_secret = ARGV[3]
chat.participant_b_device = ARGV[1]
chat.status = 'active'
redis.call('SET', chat_key, cjson.encode(chat), 'KEEPTTL')
inv.used = true
redis.call('SET', KEYS[1], cjson.encode(inv), 'EX', ARGV[4])
return {1, cjson.encode(chat), inv.creator_device_id}
"#;

/// Removes and returns one prekey from the hash, or nil when empty. Which
/// one is irrelevant: prekeys are interchangeable by protocol contract.
const CONSUME_PREKEY_SCRIPT: &str = r#"
local ids = redis.call('HKEYS', KEYS[1])
if #ids == 0 then
    return false
end
local id = ids[1]
local data = redis.call('HGET', KEYS[1], id)
redis.call('HDEL', KEYS[1], id)
return data
"#;

/// Replaces the whole prekey hash. ARGV[1] = TTL seconds, then id/json pairs.
const REPLACE_PREKEYS_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
for i = 2, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return (#ARGV - 1) / 2
"#;

pub struct RedisStore {
    conn: MultiplexedConnection,
    join_script: Script,
    consume_prekey_script: Script,
    replace_prekeys_script: Script,
}

impl RedisStore {
    /// Connects and verifies the server is reachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            conn,
            join_script: Script::new(JOIN_SCRIPT),
            consume_prekey_script: Script::new(CONSUME_PREKEY_SCRIPT),
            replace_prekeys_script: Script::new(REPLACE_PREKEYS_SCRIPT),
        })
    }

    /// Cheap per-operation handle; the multiplexed connection is designed to
    /// be cloned across tasks.
    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_device(
        &self,
        device: &str,
        public_key: &str,
        subscription: &Subscription,
    ) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.set(keyspace::pubkey(device), public_key).await?;

        let mut remaining = (subscription.expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            remaining = 3600;
        }
        let _: () = conn
            .set_ex(
                keyspace::subscription(device),
                serde_json::to_string(subscription)?,
                remaining as u64,
            )
            .await?;
        Ok(())
    }

    async fn public_key(&self, device: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(keyspace::pubkey(device)).await?)
    }

    async fn subscription(&self, device: &str) -> Result<Option<Subscription>> {
        self.get_json(&keyspace::subscription(device)).await
    }

    async fn purge_device(&self, device: &str) -> Result<()> {
        let mut conn = self.conn();
        let keys = vec![
            keyspace::subscription(device),
            keyspace::pubkey(device),
            keyspace::key_bundle(device),
            keyspace::prekeys(device),
            keyspace::rate(device),
            keyspace::warning(device),
            keyspace::message_timing(device),
            keyspace::bot_count(device),
        ];
        let _: i64 = conn.del(keys).await?;

        // abuse counters are keyed per content hash, so they need a scan;
        // the ban record, if any, deliberately survives the purge
        let hashes: Vec<String> = conn.keys(keyspace::message_hash_pattern(device)).await?;
        if !hashes.is_empty() {
            let _: i64 = conn.del(hashes).await?;
        }
        Ok(())
    }

    async fn create_chat(&self, chat: &Chat, invitation: &Invitation) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                keyspace::chat(&chat.chat_uuid),
                serde_json::to_string(chat)?,
                CHAT_TTL_SECS,
            )
            .await?;
        let _: () = conn
            .set_ex(
                keyspace::invite(&invitation.token),
                serde_json::to_string(invitation)?,
                CHAT_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    async fn chat(&self, chat_uuid: &str) -> Result<Option<Chat>> {
        self.get_json(&keyspace::chat(chat_uuid)).await
    }

    async fn delete_chat(&self, chat_uuid: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(keyspace::chat(chat_uuid)).await?;
        Ok(())
    }

    async fn join_chat(
        &self,
        token: &str,
        joiner_device: &str,
        participant_id: &str,
        participant_secret: &str,
    ) -> Result<(Chat, String)> {
        let mut conn = self.conn();
        let (code, chat_json, creator): (i64, String, String) = self
            .join_script
            .key(keyspace::invite(token))
            .arg(joiner_device)
            .arg(participant_id)
            .arg(hash_secret(participant_secret))
            .arg(INVITE_USED_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        match code {
            1 => {
                let chat: Chat = serde_json::from_str(&chat_json)?;
                Ok((chat, creator))
            }
            -2 => Err(StoreError::InvitationUsed),
            -3 => Err(StoreError::SameParticipantId),
            -4 => Err(StoreError::ChatNotPending),
            _ => Err(StoreError::InvitationNotFound),
        }
    }

    async fn validate_participant(
        &self,
        chat_uuid: &str,
        participant_id: &str,
        secret: &str,
    ) -> Result<bool> {
        Ok(self
            .chat(chat_uuid)
            .await?
            .map(|chat| chat.verify_secret(participant_id, secret))
            .unwrap_or(false))
    }

    async fn participant_for_device(
        &self,
        chat_uuid: &str,
        device: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .chat(chat_uuid)
            .await?
            .and_then(|chat| chat.participant_for_device(device).map(String::from)))
    }

    async fn enqueue_message(
        &self,
        chat_uuid: &str,
        message_id: &str,
        message: &QueuedMessage,
    ) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                keyspace::message(chat_uuid, message_id),
                serde_json::to_string(message)?,
                QUEUED_MESSAGE_TTL_SECS,
            )
            .await?;

        let queue_key = keyspace::message_queue(chat_uuid);
        let _: i64 = conn.rpush(&queue_key, message_id).await?;
        let _: bool = conn.expire(&queue_key, QUEUED_MESSAGE_TTL_SECS as i64).await?;
        Ok(())
    }

    async fn queued_messages(
        &self,
        chat_uuid: &str,
        recipient_participant: &str,
    ) -> Result<Vec<(String, QueuedMessage)>> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn
            .lrange(keyspace::message_queue(chat_uuid), 0, -1)
            .await?;

        let mut drained = Vec::new();
        for id in ids {
            let raw: Option<String> = conn.get(keyspace::message(chat_uuid, &id)).await?;
            let Some(raw) = raw else {
                continue; // entry expired under its own TTL
            };
            let message: QueuedMessage = serde_json::from_str(&raw)?;
            if message.sender_participant != recipient_participant {
                drained.push((id, message));
            }
        }
        Ok(drained)
    }

    async fn delete_queued_message(&self, chat_uuid: &str, message_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(keyspace::message(chat_uuid, message_id)).await?;
        let _: i64 = conn
            .lrem(keyspace::message_queue(chat_uuid), 1, message_id)
            .await?;
        Ok(())
    }

    async fn store_key_bundle(
        &self,
        device: &str,
        bundle: &StoredKeyBundle,
        prekeys: &[PreKey],
    ) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                keyspace::key_bundle(device),
                serde_json::to_string(bundle)?,
                KEY_BUNDLE_TTL_SECS,
            )
            .await?;

        let mut invocation = self.replace_prekeys_script.prepare_invoke();
        invocation.key(keyspace::prekeys(device)).arg(KEY_BUNDLE_TTL_SECS);
        for pk in prekeys {
            invocation.arg(pk.id).arg(serde_json::to_string(pk)?);
        }
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn add_prekeys(&self, device: &str, prekeys: &[PreKey]) -> Result<()> {
        if prekeys.is_empty() {
            return Ok(());
        }

        let key = keyspace::prekeys(device);
        let mut pipe = redis::pipe();
        for pk in prekeys {
            pipe.hset(&key, pk.id, serde_json::to_string(pk)?).ignore();
        }
        pipe.expire(&key, KEY_BUNDLE_TTL_SECS as i64).ignore();

        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn take_key_bundle(&self, device: &str) -> Result<Option<KeyBundle>> {
        let stored: Option<StoredKeyBundle> =
            self.get_json(&keyspace::key_bundle(device)).await?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        let mut conn = self.conn();
        let raw: Option<String> = self
            .consume_prekey_script
            .key(keyspace::prekeys(device))
            .invoke_async(&mut conn)
            .await?;
        let prekey = match raw {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(Some(KeyBundle::from_stored(stored, prekey)))
    }

    async fn prekey_count(&self, device: &str) -> Result<usize> {
        let mut conn = self.conn();
        Ok(conn.hlen(keyspace::prekeys(device)).await?)
    }

    async fn refresh_key_bundle_ttl(&self, device: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .expire(keyspace::key_bundle(device), KEY_BUNDLE_TTL_SECS as i64)
            .ignore()
            .expire(keyspace::prekeys(device), KEY_BUNDLE_TTL_SECS as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_key_bundle(&self, device: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn
            .del(vec![keyspace::key_bundle(device), keyspace::prekeys(device)])
            .await?;
        Ok(())
    }

    async fn register_push(
        &self,
        chat_uuid: &str,
        participant_id: &str,
        token: &str,
    ) -> Result<()> {
        let chat = self
            .chat(chat_uuid)
            .await?
            .ok_or(StoreError::ParticipantNotInChat)?;
        if chat.participant_a != participant_id && chat.participant_b != participant_id {
            return Err(StoreError::ParticipantNotInChat);
        }

        let registration = PushRegistration {
            token: token.to_string(),
            created_at: Utc::now(),
        };
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                keyspace::push(chat_uuid, participant_id),
                serde_json::to_string(&registration)?,
                PUSH_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    async fn push_token(&self, chat_uuid: &str, participant_id: &str) -> Result<Option<String>> {
        let registration: Option<PushRegistration> = self
            .get_json(&keyspace::push(chat_uuid, participant_id))
            .await?;
        Ok(registration.map(|r| r.token))
    }

    async fn unregister_push(&self, chat_uuid: &str, participant_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(keyspace::push(chat_uuid, participant_id)).await?;
        Ok(())
    }

    async fn burn_push_registrations(&self, participant_ids: &[String]) -> Result<usize> {
        let mut conn = self.conn();
        let mut deleted = 0usize;
        for participant_id in participant_ids {
            let keys: Vec<String> = conn
                .keys(keyspace::push_participant_pattern(participant_id))
                .await?;
            if !keys.is_empty() {
                let n: i64 = conn.del(keys).await?;
                deleted += n as usize;
            }
        }
        Ok(deleted)
    }

    async fn purge_chat_push(&self, chat_uuid: &str) -> Result<()> {
        let mut conn = self.conn();
        let keys: Vec<String> = conn.keys(keyspace::push_chat_pattern(chat_uuid)).await?;
        if !keys.is_empty() {
            let _: i64 = conn.del(keys).await?;
        }
        Ok(())
    }

    async fn check_rate_limit(&self, device: &str, limit: usize) -> Result<(usize, bool)> {
        let key = keyspace::rate(device);
        let now = Utc::now().timestamp_millis();
        let window_start = now - (RATE_WINDOW_SECS as i64) * 1000;

        let mut conn = self.conn();
        let _: i64 = conn.zrembyscore(&key, 0, window_start).await?;
        let count: usize = conn.zcard(&key).await?;
        if count >= limit {
            return Ok((count, false));
        }

        let _: i64 = conn.zadd(&key, now, now).await?;
        let _: bool = conn.expire(&key, RATE_WINDOW_SECS as i64).await?;
        Ok((count + 1, true))
    }

    async fn record_message(&self, device: &str, content_hash: &str) -> Result<MessageVerdict> {
        let mut conn = self.conn();

        let hash_key = keyspace::message_hash(device, content_hash);
        let count: i64 = conn.incr(&hash_key, 1).await?;
        let _: bool = conn.expire(&hash_key, ABUSE_COUNTER_TTL_SECS as i64).await?;
        if count >= DUPLICATE_CONTENT_LIMIT {
            return Ok(MessageVerdict::DuplicateContent);
        }

        let timing_key = keyspace::message_timing(device);
        let now = Utc::now().timestamp_millis();
        let last: Option<i64> = conn.get(&timing_key).await?;
        if let Some(last) = last {
            if now - last < MIN_MESSAGE_GAP_MS {
                let bot_key = keyspace::bot_count(device);
                let bots: i64 = conn.incr(&bot_key, 1).await?;
                let _: bool = conn.expire(&bot_key, ABUSE_COUNTER_TTL_SECS as i64).await?;
                if bots >= BOT_CADENCE_LIMIT {
                    return Ok(MessageVerdict::BotCadence);
                }
            }
        }

        let _: () = conn.set_ex(&timing_key, now, 60).await?;
        Ok(MessageVerdict::Clean)
    }

    async fn is_banned(&self, device: &str) -> Result<Option<String>> {
        let ban: Option<Ban> = self.get_json(&keyspace::ban(device)).await?;
        Ok(ban.map(|b| b.reason))
    }

    async fn handle_abuse(&self, device: &str, reason: &str) -> Result<AbuseAction> {
        if self.is_banned(device).await?.is_some() {
            return Ok(AbuseAction::Banned);
        }

        let warning: Option<Warning> = self.get_json(&keyspace::warning(device)).await?;
        if warning.map(|w| w.count >= 1).unwrap_or(false) {
            self.ban_device(device, reason).await?;
            return Ok(AbuseAction::Banned);
        }

        let warning = Warning {
            device_uuid: device.to_string(),
            reason: reason.to_string(),
            count: 1,
            last_warning: Utc::now(),
        };
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                keyspace::warning(device),
                serde_json::to_string(&warning)?,
                WARNING_TTL_SECS,
            )
            .await?;
        Ok(AbuseAction::Warned)
    }

    async fn ban_device(&self, device: &str, reason: &str) -> Result<()> {
        let ban = Ban {
            device_uuid: device.to_string(),
            reason: reason.to_string(),
            banned_at: Utc::now(),
        };
        let mut conn = self.conn();
        let _: () = conn
            .set(keyspace::ban(device), serde_json::to_string(&ban)?)
            .await?;
        let _: i64 = conn
            .del(vec![keyspace::warning(device), keyspace::rate(device)])
            .await?;
        Ok(())
    }
}
