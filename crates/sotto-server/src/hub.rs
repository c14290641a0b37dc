//! Connection multiplexer.
//!
//! Owns every live session and two routing tables: `device → session`
//! (exactly one per authenticated device, re-auth replaces) and
//! `(chat, participant) → device` (filled by `chat.register` after the
//! client proves knowledge of the participant secret). Routing never trusts
//! client-claimed identities: participants are validated against the chat
//! record before a table entry is written.
//!
//! The tables sit behind one read-write lock. Guards are never held across a
//! store round-trip; lookups copy what they need and release.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sotto_shared::constants::MAX_MESSAGE_SIZE;
use sotto_shared::protocol::{
    auth_reason, ban_reason, error_code, frame_type, AuthFailedPayload, AuthPayload,
    AuthSuccessPayload, BannedPayload, ChatJoinedPayload, ChatRegisterAckPayload,
    ChatRegisterPayload, ChatRegistration, Frame, MessageAckPayload, MessageDeliveredPayload,
    MessageReadAckPayload, MessageReadPayload, MessageReceivedPayload, MessageSendPayload,
    PushBurnAllAckPayload, PushBurnAllPayload, PushRegisterAckPayload, PushRegisterPayload,
    PushUnregisterAckPayload, PushUnregisterPayload, RateLimitWarningPayload,
    SubscriptionExpiredPayload, SubscriptionInfo, TypingIndicatorPayload, TypingPayload,
};
use sotto_store::{hash_content, AbuseAction, Chat, MessageVerdict, QueuedMessage, Store};

use crate::auth::{authenticate_device, AuthFailure};
use crate::push::PushGateway;
use crate::session::Session;

#[derive(Default)]
struct Routing {
    /// Every open connection, authenticated or not.
    sessions: HashMap<Uuid, Arc<Session>>,
    /// `device → session`; last writer wins on re-auth.
    devices: HashMap<String, Arc<Session>>,
    /// `(chat, participant) → device`, written only after credential proof.
    chat_participants: HashMap<(String, String), String>,
}

pub struct Hub {
    store: Arc<dyn Store>,
    push: Arc<dyn PushGateway>,
    rate_limit_per_minute: usize,
    renew_url: String,
    routing: RwLock<Routing>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn Store>,
        push: Arc<dyn PushGateway>,
        rate_limit_per_minute: usize,
        renew_url: String,
    ) -> Self {
        Self {
            store,
            push,
            rate_limit_per_minute,
            renew_url,
            routing: RwLock::new(Routing::default()),
        }
    }

    pub async fn register(&self, session: Arc<Session>) {
        let mut routing = self.routing.write().await;
        routing.sessions.insert(session.id(), session);
        debug!(connections = routing.sessions.len(), "Session registered");
    }

    /// Removes a session from every table. The device entry is only cleared
    /// if this session still owns it: after a re-auth the entry belongs to
    /// the newer session and must survive the old one's disconnect.
    pub async fn unregister(&self, session: &Arc<Session>) {
        let mut routing = self.routing.write().await;
        routing.sessions.remove(&session.id());

        if let Some(device) = session.device_uuid() {
            let owns = routing
                .devices
                .get(&device)
                .map(|current| current.id() == session.id())
                .unwrap_or(false);
            if owns {
                routing.devices.remove(&device);
                routing.chat_participants.retain(|_, dev| dev != &device);
                debug!(device = %device, "Device routing cleared");
            }
        }
    }

    pub async fn session_for_device(&self, device: &str) -> Option<Arc<Session>> {
        let routing = self.routing.read().await;
        routing.devices.get(device).cloned()
    }

    async fn route_participant(&self, chat_uuid: &str, participant_id: &str) -> Option<Arc<Session>> {
        let routing = self.routing.read().await;
        let device = routing
            .chat_participants
            .get(&(chat_uuid.to_string(), participant_id.to_string()))?;
        routing.devices.get(device).cloned()
    }

    /// Forcefully disconnects a device after an HTTP purge: every routing
    /// entry is scrubbed, the session gets a final typed error and its
    /// transport is closed.
    pub async fn disconnect_device(&self, device: &str) {
        let session = {
            let mut routing = self.routing.write().await;
            let Some(session) = routing.devices.remove(device) else {
                debug!(device = %device, "Purged device had no live session");
                return;
            };
            routing.sessions.remove(&session.id());
            routing.chat_participants.retain(|_, dev| dev != device);
            session
        };

        session.send_or_log(Frame::error(error_code::DEVICE_PURGED, "Device has been purged"));
        session.close();
        info!(device = %device, "Device disconnected after purge");
    }

    /// Emits a frame to both participants of a chat, whichever are live.
    /// Used for chat-level events originating from the HTTP surface.
    pub async fn broadcast_to_chat(&self, chat: &Chat, frame: Frame) {
        let routing = self.routing.read().await;
        for device in [&chat.participant_a_device, &chat.participant_b_device] {
            if device.is_empty() {
                continue;
            }
            if let Some(session) = routing.devices.get(device) {
                session.send_or_log(frame.clone());
            }
        }
    }

    /// Tells the chat creator their invitation was claimed, if they are
    /// connected.
    pub async fn notify_chat_joined(&self, creator_device: &str, payload: ChatJoinedPayload) {
        if let Some(session) = self.session_for_device(creator_device).await {
            session.send_or_log(Frame::new(frame_type::CHAT_JOINED, payload));
        }
    }

    pub async fn dispatch(&self, session: &Arc<Session>, frame: Frame) {
        match frame.kind.as_str() {
            frame_type::AUTH => self.handle_auth(session, &frame).await,
            frame_type::CHAT_REGISTER => self.handle_chat_register(session, &frame).await,
            frame_type::MESSAGE_SEND => self.handle_message_send(session, &frame).await,
            frame_type::MESSAGE_READ => self.handle_message_read(session, &frame).await,
            frame_type::TYPING_START | frame_type::TYPING_STOP => {
                self.handle_typing(session, &frame).await
            }
            frame_type::PUSH_REGISTER => self.handle_push_register(session, &frame).await,
            frame_type::PUSH_UNREGISTER => self.handle_push_unregister(session, &frame).await,
            frame_type::PUSH_BURN_ALL => self.handle_push_burn_all(session, &frame).await,
            frame_type::PING => {}
            other => {
                debug!(kind = %other, "Unknown frame type");
                session.send_or_log(Frame::error(error_code::UNKNOWN_TYPE, "Unknown message type"));
            }
        }
    }

    async fn handle_auth(&self, session: &Arc<Session>, frame: &Frame) {
        let Ok(payload) = frame.decode_payload::<AuthPayload>() else {
            session.send_or_log(Frame::new(
                frame_type::AUTH_FAILED,
                AuthFailedPayload {
                    reason: auth_reason::INVALID_PAYLOAD.to_string(),
                },
            ));
            return;
        };

        debug!(device = %payload.device_uuid, "Auth attempt");

        let subscription = match authenticate_device(
            self.store.as_ref(),
            &payload.device_uuid,
            payload.timestamp,
            &payload.signature,
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(failure) => {
                let reply = match failure {
                    AuthFailure::Banned(reason) => {
                        Frame::new(frame_type::BANNED, BannedPayload { reason })
                    }
                    AuthFailure::SubscriptionExpired => Frame::new(
                        frame_type::SUBSCRIPTION_EXPIRED,
                        SubscriptionExpiredPayload {
                            renew_url: self.renew_url.clone(),
                        },
                    ),
                    AuthFailure::TimestampExpired => Frame::new(
                        frame_type::AUTH_FAILED,
                        AuthFailedPayload {
                            reason: auth_reason::TIMESTAMP_EXPIRED.to_string(),
                        },
                    ),
                    AuthFailure::DeviceNotFound => Frame::new(
                        frame_type::AUTH_FAILED,
                        AuthFailedPayload {
                            reason: auth_reason::DEVICE_NOT_FOUND.to_string(),
                        },
                    ),
                    AuthFailure::InvalidSignature => Frame::new(
                        frame_type::AUTH_FAILED,
                        AuthFailedPayload {
                            reason: auth_reason::INVALID_SIGNATURE.to_string(),
                        },
                    ),
                };
                session.send_or_log(reply);
                return;
            }
        };

        session.set_authenticated(&payload.device_uuid);
        {
            let mut routing = self.routing.write().await;
            // last writer wins; a superseded session keeps running until its
            // transport dies, it just stops receiving routed frames
            routing
                .devices
                .insert(payload.device_uuid.clone(), session.clone());
        }

        info!(device = %payload.device_uuid, "Authenticated");

        session.send_or_log(Frame::new(
            frame_type::AUTH_SUCCESS,
            AuthSuccessPayload {
                // chat membership is client-held; the list is always empty
                chats: Vec::new(),
                subscription: SubscriptionInfo {
                    plan: subscription.plan,
                    expires_at: subscription.expires_at,
                },
            },
        ));
    }

    async fn handle_chat_register(&self, session: &Arc<Session>, frame: &Frame) {
        if !session.is_authed() {
            session.send_or_log(Frame::error(
                error_code::NOT_AUTHENTICATED,
                "Must authenticate first",
            ));
            return;
        }
        let Ok(payload) = frame.decode_payload::<ChatRegisterPayload>() else {
            session.send_or_log(Frame::error(
                error_code::INVALID_PAYLOAD,
                "Invalid chat.register payload",
            ));
            return;
        };
        let Some(device) = session.device_uuid() else {
            return;
        };

        let mut registered = 0;
        let mut failed = 0;
        let mut accepted: Vec<ChatRegistration> = Vec::new();

        for registration in payload.chats {
            let valid = self
                .store
                .validate_participant(
                    &registration.chat_uuid,
                    &registration.participant_id,
                    &registration.participant_secret,
                )
                .await
                .unwrap_or(false);

            if valid {
                let mut routing = self.routing.write().await;
                routing.chat_participants.insert(
                    (
                        registration.chat_uuid.clone(),
                        registration.participant_id.clone(),
                    ),
                    device.clone(),
                );
                registered += 1;
                accepted.push(registration);
            } else {
                debug!(chat = %registration.chat_uuid, "Chat registration failed validation");
                failed += 1;
            }
        }

        // deliver anything queued while this participant was offline
        for registration in &accepted {
            let queued = self
                .store
                .queued_messages(&registration.chat_uuid, &registration.participant_id)
                .await
                .unwrap_or_default();

            for (message_id, message) in queued {
                let delivery = Frame::new(
                    frame_type::MESSAGE_RECEIVED,
                    MessageReceivedPayload {
                        chat_uuid: registration.chat_uuid.clone(),
                        message_id: message_id.clone(),
                        sender_uuid: message.sender_participant.clone(),
                        sender_device_uuid: message.sender_device_uuid.clone(),
                        encrypted_content: message.encrypted_content.clone(),
                        timestamp: Utc::now().timestamp(),
                    },
                );
                match session.send(delivery) {
                    Ok(()) => {
                        self.send_delivery_confirmation(
                            &registration.chat_uuid,
                            &message_id,
                            &message.sender_participant,
                        )
                        .await;
                    }
                    Err(err) => {
                        debug!(message = %message_id, error = %err, "Queued delivery dropped");
                    }
                }
            }
        }

        session.send_or_log(Frame::new(
            frame_type::CHAT_REGISTER_ACK,
            ChatRegisterAckPayload { registered, failed },
        ));
    }

    async fn handle_message_send(&self, session: &Arc<Session>, frame: &Frame) {
        if !session.is_authed() {
            session.send_or_log(Frame::error(
                error_code::NOT_AUTHENTICATED,
                "Must authenticate first",
            ));
            return;
        }
        let Ok(payload) = frame.decode_payload::<MessageSendPayload>() else {
            session.send_or_log(Frame::error(
                error_code::INVALID_PAYLOAD,
                "Invalid message payload",
            ));
            return;
        };
        let Some(device) = session.device_uuid() else {
            return;
        };

        // rate gate first; a denied send does no further work
        let (count, allowed) = self
            .store
            .check_rate_limit(&device, self.rate_limit_per_minute)
            .await
            .unwrap_or((0, true));
        if !allowed {
            warn!(device = %device, current = count, "Rate limit exceeded");
            if self.escalate_abuse(&device, "rate_limit_exceeded").await {
                session.send_or_log(Frame::new(
                    frame_type::BANNED,
                    BannedPayload {
                        reason: ban_reason::RATE_LIMIT_ABUSE.to_string(),
                    },
                ));
                self.close_session(session).await;
                return;
            }
            session.send_or_log(Frame::new(
                frame_type::RATE_LIMIT_WARNING,
                RateLimitWarningPayload {
                    current: count,
                    limit: self.rate_limit_per_minute,
                },
            ));
            return;
        }

        let valid = self
            .store
            .validate_participant(
                &payload.chat_uuid,
                &payload.participant_id,
                &payload.participant_secret,
            )
            .await
            .unwrap_or(false);
        if !valid {
            // forged credentials on an authenticated session count as abuse
            if self.escalate_abuse(&device, "invalid_credentials").await {
                session.send_or_log(Frame::new(
                    frame_type::BANNED,
                    BannedPayload {
                        reason: ban_reason::ABUSE.to_string(),
                    },
                ));
                self.close_session(session).await;
                return;
            }
            session.send_or_log(Frame::error(
                error_code::INVALID_CREDENTIALS,
                "Invalid participant credentials",
            ));
            return;
        }

        let Some(chat) = self.store.chat(&payload.chat_uuid).await.unwrap_or(None) else {
            session.send_or_log(Frame::error(error_code::CHAT_NOT_FOUND, "Chat not found"));
            return;
        };
        let recipient_participant = chat.other_participant(&payload.participant_id).to_string();

        // size is checked on the decoded bytes; the content itself stays opaque
        let content = match BASE64.decode(&payload.encrypted_content) {
            Ok(content) if content.len() <= MAX_MESSAGE_SIZE => content,
            _ => {
                if self.escalate_abuse(&device, "oversize_message").await {
                    session.send_or_log(Frame::new(
                        frame_type::BANNED,
                        BannedPayload {
                            reason: ban_reason::ABUSE.to_string(),
                        },
                    ));
                    self.close_session(session).await;
                    return;
                }
                session.send_or_log(Frame::error(
                    error_code::MESSAGE_TOO_LARGE,
                    "Message exceeds 10KB limit",
                ));
                return;
            }
        };

        let verdict = self
            .store
            .record_message(&device, &hash_content(&content))
            .await
            .unwrap_or(MessageVerdict::Clean);
        if !verdict.is_clean() {
            let reason = match verdict {
                MessageVerdict::DuplicateContent => "duplicate_content",
                _ => "bot_cadence",
            };
            if self.escalate_abuse(&device, reason).await {
                session.send_or_log(Frame::new(
                    frame_type::BANNED,
                    BannedPayload {
                        reason: ban_reason::ABUSE.to_string(),
                    },
                ));
                self.close_session(session).await;
                return;
            }
        }

        match self
            .route_participant(&payload.chat_uuid, &recipient_participant)
            .await
        {
            Some(recipient) => {
                let delivery = Frame::new(
                    frame_type::MESSAGE_RECEIVED,
                    MessageReceivedPayload {
                        chat_uuid: payload.chat_uuid.clone(),
                        message_id: payload.message_id.clone(),
                        sender_uuid: payload.participant_id.clone(),
                        // the recipient needs the sender's device for its
                        // cryptographic session, not just the participant id
                        sender_device_uuid: device.clone(),
                        encrypted_content: payload.encrypted_content.clone(),
                        timestamp: Utc::now().timestamp(),
                    },
                );
                match recipient.send(delivery) {
                    Ok(()) => {
                        self.send_delivery_confirmation(
                            &payload.chat_uuid,
                            &payload.message_id,
                            &payload.participant_id,
                        )
                        .await;
                    }
                    Err(err) => {
                        debug!(message = %payload.message_id, error = %err, "Live delivery dropped");
                    }
                }
            }
            None => {
                let queued = QueuedMessage {
                    sender_participant: payload.participant_id.clone(),
                    sender_device_uuid: device.clone(),
                    encrypted_content: payload.encrypted_content.clone(),
                };
                if let Err(err) = self
                    .store
                    .enqueue_message(&payload.chat_uuid, &payload.message_id, &queued)
                    .await
                {
                    warn!(message = %payload.message_id, error = %err, "Failed to queue message");
                } else {
                    debug!(chat = %payload.chat_uuid, message = %payload.message_id, "Message queued");
                }
                self.send_blind_wake(&payload.chat_uuid, &recipient_participant)
                    .await;
            }
        }

        session.send_or_log(Frame::new(
            frame_type::MESSAGE_ACK,
            MessageAckPayload {
                chat_uuid: payload.chat_uuid,
                message_id: payload.message_id,
            },
        ));
    }

    async fn handle_message_read(&self, session: &Arc<Session>, frame: &Frame) {
        if !session.is_authed() {
            return;
        }
        let Ok(payload) = frame.decode_payload::<MessageReadPayload>() else {
            return;
        };
        let Some(device) = session.device_uuid() else {
            return;
        };

        if let Err(err) = self
            .store
            .delete_queued_message(&payload.chat_uuid, &payload.message_id)
            .await
        {
            debug!(message = %payload.message_id, error = %err, "Queued message cleanup failed");
        }

        let Some(chat) = self.store.chat(&payload.chat_uuid).await.unwrap_or(None) else {
            return;
        };
        // resolve our identity from the chat record, never from the client
        let Some(reader_participant) = chat.participant_for_device(&device) else {
            return;
        };
        let other_participant = chat.other_participant(reader_participant);

        if let Some(other) = self
            .route_participant(&payload.chat_uuid, other_participant)
            .await
        {
            other.send_or_log(Frame::new(
                frame_type::MESSAGE_READ_ACK,
                MessageReadAckPayload {
                    chat_uuid: payload.chat_uuid,
                    message_id: payload.message_id,
                },
            ));
        }
    }

    async fn handle_typing(&self, session: &Arc<Session>, frame: &Frame) {
        if !session.is_authed() {
            return;
        }
        let Ok(payload) = frame.decode_payload::<TypingPayload>() else {
            return;
        };

        let valid = self
            .store
            .validate_participant(
                &payload.chat_uuid,
                &payload.participant_id,
                &payload.participant_secret,
            )
            .await
            .unwrap_or(false);
        if !valid {
            return;
        }

        let Some(chat) = self.store.chat(&payload.chat_uuid).await.unwrap_or(None) else {
            return;
        };
        let other_participant = chat.other_participant(&payload.participant_id);

        if let Some(other) = self
            .route_participant(&payload.chat_uuid, other_participant)
            .await
        {
            other.send_or_log(Frame::new(
                frame_type::TYPING_INDICATOR,
                TypingIndicatorPayload {
                    chat_uuid: payload.chat_uuid,
                },
            ));
        }
    }

    /// Push registration authorizes from payload credentials instead of
    /// session auth: clients send it during reconnect windows, possibly
    /// before (or without) re-authenticating. The exception stays confined
    /// to the push frames.
    async fn handle_push_register(&self, session: &Arc<Session>, frame: &Frame) {
        let Ok(payload) = frame.decode_payload::<PushRegisterPayload>() else {
            return;
        };
        if payload.participant_id.is_empty() || payload.participant_secret.is_empty() {
            return;
        }

        let valid = self
            .store
            .validate_participant(
                &payload.chat_uuid,
                &payload.participant_id,
                &payload.participant_secret,
            )
            .await
            .unwrap_or(false);
        if !valid {
            debug!(chat = %payload.chat_uuid, "Push registration rejected");
            return;
        }

        let result = self
            .store
            .register_push(&payload.chat_uuid, &payload.participant_id, &payload.fcm_token)
            .await;
        if let Err(err) = &result {
            debug!(chat = %payload.chat_uuid, error = %err, "Push registration store failure");
        }

        if session.is_authed() {
            session.send_or_log(Frame::new(
                frame_type::PUSH_REGISTER_ACK,
                PushRegisterAckPayload {
                    chat_uuid: payload.chat_uuid,
                    success: result.is_ok(),
                },
            ));
        }
    }

    async fn handle_push_unregister(&self, session: &Arc<Session>, frame: &Frame) {
        let Ok(payload) = frame.decode_payload::<PushUnregisterPayload>() else {
            return;
        };
        if payload.participant_id.is_empty() || payload.participant_secret.is_empty() {
            return;
        }

        let valid = self
            .store
            .validate_participant(
                &payload.chat_uuid,
                &payload.participant_id,
                &payload.participant_secret,
            )
            .await
            .unwrap_or(false);
        if !valid {
            return;
        }

        let result = self
            .store
            .unregister_push(&payload.chat_uuid, &payload.participant_id)
            .await;

        if session.is_authed() {
            session.send_or_log(Frame::new(
                frame_type::PUSH_UNREGISTER_ACK,
                PushUnregisterAckPayload {
                    chat_uuid: payload.chat_uuid,
                    success: result.is_ok(),
                },
            ));
        }
    }

    /// Wipes every push registration for the caller's participant IDs; used
    /// on wake-token rotation, when all previous registrations are invalid.
    async fn handle_push_burn_all(&self, session: &Arc<Session>, frame: &Frame) {
        if !session.is_authed() {
            return;
        }
        let Ok(payload) = frame.decode_payload::<PushBurnAllPayload>() else {
            session.send_or_log(Frame::new(
                frame_type::PUSH_BURN_ALL_ACK,
                PushBurnAllAckPayload { deleted: 0 },
            ));
            return;
        };

        let deleted = self
            .store
            .burn_push_registrations(&payload.participant_ids)
            .await
            .unwrap_or(0);

        session.send_or_log(Frame::new(
            frame_type::PUSH_BURN_ALL_ACK,
            PushBurnAllAckPayload { deleted },
        ));
    }

    /// Tells the sender their message reached the recipient, if the sender
    /// is still routable.
    async fn send_delivery_confirmation(
        &self,
        chat_uuid: &str,
        message_id: &str,
        sender_participant: &str,
    ) {
        if let Some(sender) = self.route_participant(chat_uuid, sender_participant).await {
            sender.send_or_log(Frame::new(
                frame_type::MESSAGE_DELIVERED,
                MessageDeliveredPayload {
                    chat_uuid: chat_uuid.to_string(),
                    message_id: message_id.to_string(),
                },
            ));
        }
    }

    async fn send_blind_wake(&self, chat_uuid: &str, recipient_participant: &str) {
        let token = self
            .store
            .push_token(chat_uuid, recipient_participant)
            .await
            .unwrap_or(None);
        match token {
            Some(token) => self.push.send_blind_wake(&token).await,
            None => debug!(chat = %chat_uuid, "No wake token registered for recipient"),
        }
    }

    /// Runs the warn→ban ladder; returns `true` when the device is banned
    /// and the session must be closed.
    async fn escalate_abuse(&self, device: &str, reason: &str) -> bool {
        matches!(
            self.store
                .handle_abuse(device, reason)
                .await
                .unwrap_or(AbuseAction::Warned),
            AbuseAction::Banned
        )
    }

    async fn close_session(&self, session: &Arc<Session>) {
        self.unregister(session).await;
        session.close();
    }
}
