//! End-to-end hub scenarios over the in-memory store.
//!
//! Sessions are constructed directly (no real transport): dispatching a
//! frame and reading the session's outbound channel exercises the same code
//! the WebSocket tasks drive in production.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use tokio::sync::mpsc::Receiver;

use sotto_server::auth::compute_signature;
use sotto_server::hub::Hub;
use sotto_server::push::PushGateway;
use sotto_server::session::Session;
use sotto_shared::protocol::{
    frame_type, AuthFailedPayload, AuthPayload, BannedPayload, ChatRegisterAckPayload,
    ChatRegisterPayload, ChatRegistration, ErrorPayload, Frame, MessageReadPayload,
    MessageReceivedPayload, MessageSendPayload, PushBurnAllAckPayload, PushBurnAllPayload,
    PushRegisterPayload, RateLimitWarningPayload, TypingIndicatorPayload, TypingPayload,
};
use sotto_store::{
    hash_secret, Chat, ChatStatus, Invitation, MemoryStore, Store, Subscription,
};

#[derive(Default)]
struct RecordingPush {
    wakes: Mutex<Vec<String>>,
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn send_blind_wake(&self, token: &str) {
        self.wakes.lock().unwrap().push(token.to_string());
    }
}

struct TestEnv {
    store: Arc<MemoryStore>,
    hub: Arc<Hub>,
    push: Arc<RecordingPush>,
}

impl TestEnv {
    fn with_rate_limit(rate_limit: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(RecordingPush::default());
        let hub = Arc::new(Hub::new(
            store.clone(),
            push.clone(),
            rate_limit,
            "https://sotto.app".to_string(),
        ));
        Self { store, hub, push }
    }

    fn new() -> Self {
        Self::with_rate_limit(120)
    }

    async fn activate_device(&self, device: &str, key: &str) {
        let now = Utc::now();
        self.store
            .put_device(
                device,
                key,
                &Subscription {
                    plan: "1_month_solo".into(),
                    status: "active".into(),
                    expires_at: now + Duration::days(30),
                    created_at: now,
                },
            )
            .await
            .unwrap();
    }

    /// Seeds an active chat `c1` between `pA@dev-A` and `pB@dev-B`, the way
    /// the HTTP create/join handlers would.
    async fn seed_active_chat(&self) {
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
        let invitation = Invitation {
            token: "t1".into(),
            chat_uuid: "c1".into(),
            creator_device_id: "dev-A".into(),
            ttl_seconds: 60,
            created_at: Utc::now(),
            used: false,
        };
        self.store.create_chat(&chat, &invitation).await.unwrap();
        let (joined, creator) = self
            .store
            .join_chat("t1", "dev-B", "pB", "sB")
            .await
            .unwrap();
        assert_eq!(joined.status, ChatStatus::Active);
        assert_eq!(creator, "dev-A");
    }

    async fn open_session(&self) -> (Arc<Session>, Receiver<Frame>) {
        let (session, rx) = Session::new();
        self.hub.register(session.clone()).await;
        (session, rx)
    }

    async fn auth(&self, session: &Arc<Session>, device: &str, key: &str) {
        let timestamp = Utc::now().timestamp();
        let frame = Frame::new(
            frame_type::AUTH,
            AuthPayload {
                device_uuid: device.to_string(),
                signature: compute_signature(key, device, timestamp),
                timestamp,
            },
        );
        self.hub.dispatch(session, frame).await;
    }

    async fn register_chat(
        &self,
        session: &Arc<Session>,
        chat_uuid: &str,
        participant_id: &str,
        secret: &str,
    ) {
        let frame = Frame::new(
            frame_type::CHAT_REGISTER,
            ChatRegisterPayload {
                chats: vec![ChatRegistration {
                    chat_uuid: chat_uuid.to_string(),
                    participant_id: participant_id.to_string(),
                    participant_secret: secret.to_string(),
                }],
            },
        );
        self.hub.dispatch(session, frame).await;
    }

    async fn send_message(
        &self,
        session: &Arc<Session>,
        message_id: &str,
        participant_id: &str,
        secret: &str,
        content: &[u8],
    ) {
        let frame = Frame::new(
            frame_type::MESSAGE_SEND,
            MessageSendPayload {
                chat_uuid: "c1".into(),
                message_id: message_id.to_string(),
                encrypted_content: BASE64.encode(content),
                participant_id: participant_id.to_string(),
                participant_secret: secret.to_string(),
            },
        );
        self.hub.dispatch(session, frame).await;
    }
}

fn next_frame(rx: &mut Receiver<Frame>) -> Frame {
    rx.try_recv().expect("expected a pending frame")
}

fn expect_frame(rx: &mut Receiver<Frame>, kind: &str) -> Frame {
    let frame = next_frame(rx);
    assert_eq!(frame.kind, kind, "unexpected frame {frame:?}");
    frame
}

fn drain(rx: &mut Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

// ─── S1: happy path two-party exchange ───

#[tokio::test]
async fn test_two_party_exchange() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    let (bob, mut bob_rx) = env.open_session().await;

    env.auth(&alice, "dev-A", "k_alice").await;
    expect_frame(&mut alice_rx, frame_type::AUTH_SUCCESS);
    env.auth(&bob, "dev-B", "k_bob").await;
    expect_frame(&mut bob_rx, frame_type::AUTH_SUCCESS);

    env.register_chat(&alice, "c1", "pA", "sA").await;
    let ack: ChatRegisterAckPayload = expect_frame(&mut alice_rx, frame_type::CHAT_REGISTER_ACK)
        .decode_payload()
        .unwrap();
    assert_eq!(ack.registered, 1);
    assert_eq!(ack.failed, 0);

    env.register_chat(&bob, "c1", "pB", "sB").await;
    expect_frame(&mut bob_rx, frame_type::CHAT_REGISTER_ACK);

    env.send_message(&alice, "m1", "pA", "sA", b"hello").await;

    let received: MessageReceivedPayload = expect_frame(&mut bob_rx, frame_type::MESSAGE_RECEIVED)
        .decode_payload()
        .unwrap();
    assert_eq!(received.chat_uuid, "c1");
    assert_eq!(received.message_id, "m1");
    assert_eq!(received.sender_uuid, "pA");
    assert_eq!(received.sender_device_uuid, "dev-A");
    assert_eq!(received.encrypted_content, BASE64.encode(b"hello"));

    let alice_frames = drain(&mut alice_rx);
    let kinds: Vec<&str> = alice_frames.iter().map(|f| f.kind.as_str()).collect();
    assert!(kinds.contains(&frame_type::MESSAGE_ACK));
    assert!(kinds.contains(&frame_type::MESSAGE_DELIVERED));
}

// ─── S2: offline queueing and drain on register ───

#[tokio::test]
async fn test_offline_queueing_delivers_once_on_register() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    // Bob registered a wake token earlier, then went offline
    env.store.register_push("c1", "pB", "bob-token").await.unwrap();

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    expect_frame(&mut alice_rx, frame_type::AUTH_SUCCESS);
    env.register_chat(&alice, "c1", "pA", "sA").await;
    expect_frame(&mut alice_rx, frame_type::CHAT_REGISTER_ACK);

    env.send_message(&alice, "m2", "pA", "sA", b"queued hello").await;
    expect_frame(&mut alice_rx, frame_type::MESSAGE_ACK);

    // queued, and the blind wake fired at Bob's token
    assert_eq!(*env.push.wakes.lock().unwrap(), vec!["bob-token".to_string()]);

    // Bob reconnects and registers
    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    expect_frame(&mut bob_rx, frame_type::AUTH_SUCCESS);
    env.register_chat(&bob, "c1", "pB", "sB").await;

    let received: MessageReceivedPayload = expect_frame(&mut bob_rx, frame_type::MESSAGE_RECEIVED)
        .decode_payload()
        .unwrap();
    assert_eq!(received.message_id, "m2");
    assert_eq!(received.encrypted_content, BASE64.encode(b"queued hello"));
    assert_eq!(received.sender_device_uuid, "dev-A");
    expect_frame(&mut bob_rx, frame_type::CHAT_REGISTER_ACK);
    assert!(bob_rx.try_recv().is_err(), "exactly one delivery");

    // Alice is routable, so she hears about the delivery
    let delivered = expect_frame(&mut alice_rx, frame_type::MESSAGE_DELIVERED);
    let payload: sotto_shared::protocol::MessageDeliveredPayload =
        delivered.decode_payload().unwrap();
    assert_eq!(payload.message_id, "m2");
}

// ─── Read receipts ───

#[tokio::test]
async fn test_read_receipt_deletes_and_acks() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    // message for Bob sits in the queue
    env.send_message(&alice, "m3", "pA", "sA", b"read me").await;
    drain(&mut alice_rx);
    assert_eq!(env.store.queued_messages("c1", "pB").await.unwrap().len(), 1);

    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    env.register_chat(&bob, "c1", "pB", "sB").await;
    drain(&mut bob_rx);
    // the register drain confirmed delivery to Alice; clear that first
    drain(&mut alice_rx);

    let read = Frame::new(
        frame_type::MESSAGE_READ,
        MessageReadPayload {
            chat_uuid: "c1".into(),
            message_id: "m3".into(),
        },
    );
    env.hub.dispatch(&bob, read.clone()).await;

    assert!(env.store.queued_messages("c1", "pB").await.unwrap().is_empty());
    let ack = expect_frame(&mut alice_rx, frame_type::MESSAGE_READ_ACK);
    let payload: sotto_shared::protocol::MessageReadAckPayload = ack.decode_payload().unwrap();
    assert_eq!(payload.message_id, "m3");

    // replay: the deletion is a no-op
    env.hub.dispatch(&bob, read).await;
    assert!(env.store.queued_messages("c1", "pB").await.unwrap().is_empty());
}

// ─── Typing indicators ───

#[tokio::test]
async fn test_typing_indicator_reaches_peer_only() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    env.register_chat(&bob, "c1", "pB", "sB").await;
    drain(&mut bob_rx);

    let typing = Frame::new(
        frame_type::TYPING_START,
        TypingPayload {
            chat_uuid: "c1".into(),
            participant_id: "pA".into(),
            participant_secret: "sA".into(),
        },
    );
    env.hub.dispatch(&alice, typing).await;

    let indicator: TypingIndicatorPayload = expect_frame(&mut bob_rx, frame_type::TYPING_INDICATOR)
        .decode_payload()
        .unwrap();
    assert_eq!(indicator.chat_uuid, "c1");
    assert!(alice_rx.try_recv().is_err(), "no echo to the typist");

    // wrong credentials are silently dropped
    let forged = Frame::new(
        frame_type::TYPING_START,
        TypingPayload {
            chat_uuid: "c1".into(),
            participant_id: "pA".into(),
            participant_secret: "wrong".into(),
        },
    );
    env.hub.dispatch(&alice, forged).await;
    assert!(bob_rx.try_recv().is_err());
}

// ─── S5: rate limit escalation ───

#[tokio::test]
async fn test_rate_limit_warning_then_ban() {
    let env = TestEnv::with_rate_limit(5);
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    for i in 0..5 {
        env.send_message(&alice, &format!("m{i}"), "pA", "sA", format!("body {i}").as_bytes())
            .await;
        expect_frame(&mut alice_rx, frame_type::MESSAGE_ACK);
    }

    // sixth send trips the window: warning, nothing routed or queued
    env.send_message(&alice, "m5", "pA", "sA", b"over the line").await;
    let warning: RateLimitWarningPayload =
        expect_frame(&mut alice_rx, frame_type::RATE_LIMIT_WARNING)
            .decode_payload()
            .unwrap();
    assert_eq!(warning.current, 5);
    assert_eq!(warning.limit, 5);
    assert!(env.store.queued_messages("c1", "pB").await.unwrap().len() == 5);

    // a second burst inside the warning window escalates to a permanent ban
    env.send_message(&alice, "m6", "pA", "sA", b"again").await;
    let banned: BannedPayload = expect_frame(&mut alice_rx, frame_type::BANNED)
        .decode_payload()
        .unwrap();
    assert_eq!(banned.reason, "rate_limit_abuse");
    assert_eq!(
        env.store.is_banned("dev-A").await.unwrap().as_deref(),
        Some("rate_limit_exceeded")
    );

    // the banned device cannot re-authenticate
    let (retry, mut retry_rx) = env.open_session().await;
    env.auth(&retry, "dev-A", "k_alice").await;
    expect_frame(&mut retry_rx, frame_type::BANNED);
}

// ─── S6: purge invalidates routing ───

#[tokio::test]
async fn test_purge_invalidates_routing_and_auth() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    env.register_chat(&bob, "c1", "pB", "sB").await;
    drain(&mut bob_rx);

    // what the DELETE /device/purge handler does
    env.store.purge_device("dev-A").await.unwrap();
    env.hub.disconnect_device("dev-A").await;

    let error: ErrorPayload = expect_frame(&mut alice_rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "device_purged");

    // Bob's next message routes as offline and lands in the queue
    env.send_message(&bob, "m9", "pB", "sB", b"anyone there?").await;
    expect_frame(&mut bob_rx, frame_type::MESSAGE_ACK);
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(env.store.queued_messages("c1", "pA").await.unwrap().len(), 1);

    // and the purged device can no longer authenticate
    let (retry, mut retry_rx) = env.open_session().await;
    env.auth(&retry, "dev-A", "k_alice").await;
    let failed: AuthFailedPayload = expect_frame(&mut retry_rx, frame_type::AUTH_FAILED)
        .decode_payload()
        .unwrap();
    assert_eq!(failed.reason, "device_not_found");
}

// ─── Re-auth replaces routing ───

#[tokio::test]
async fn test_reauth_routes_to_newest_session() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (old, mut old_rx) = env.open_session().await;
    env.auth(&old, "dev-A", "k_alice").await;
    drain(&mut old_rx);

    let (new, mut new_rx) = env.open_session().await;
    env.auth(&new, "dev-A", "k_alice").await;
    env.register_chat(&new, "c1", "pA", "sA").await;
    drain(&mut new_rx);

    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    env.register_chat(&bob, "c1", "pB", "sB").await;
    drain(&mut bob_rx);

    env.send_message(&bob, "m1", "pB", "sB", b"to alice").await;

    expect_frame(&mut new_rx, frame_type::MESSAGE_RECEIVED);
    assert!(old_rx.try_recv().is_err(), "superseded session gets nothing");

    // the old session's eventual disconnect must not break the new routing
    env.hub.unregister(&old).await;
    env.send_message(&bob, "m2", "pB", "sB", b"still there?").await;
    expect_frame(&mut new_rx, frame_type::MESSAGE_RECEIVED);
}

// ─── Boundaries and rejections ───

#[tokio::test]
async fn test_ciphertext_size_boundary() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    env.send_message(&alice, "max", "pA", "sA", &vec![0xAB; 10_240]).await;
    expect_frame(&mut alice_rx, frame_type::MESSAGE_ACK);

    // one byte over: rejected, and the first strike is a warning
    env.send_message(&alice, "over", "pA", "sA", &vec![0xAB; 10_241]).await;
    let error: ErrorPayload = expect_frame(&mut alice_rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "message_too_large");
    assert!(env.store.is_banned("dev-A").await.unwrap().is_none());

    // malformed base64 is the second policy strike and escalates to a ban
    let frame = Frame::new(
        frame_type::MESSAGE_SEND,
        MessageSendPayload {
            chat_uuid: "c1".into(),
            message_id: "bad".into(),
            encrypted_content: "not base64 !!!".into(),
            participant_id: "pA".into(),
            participant_secret: "sA".into(),
        },
    );
    env.hub.dispatch(&alice, frame).await;
    expect_frame(&mut alice_rx, frame_type::BANNED);
    assert!(env.store.is_banned("dev-A").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unauthenticated_frames_rejected() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (session, mut rx) = env.open_session().await;

    env.send_message(&session, "m1", "pA", "sA", b"hi").await;
    let error: ErrorPayload = expect_frame(&mut rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "not_authenticated");

    env.register_chat(&session, "c1", "pA", "sA").await;
    let error: ErrorPayload = expect_frame(&mut rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "not_authenticated");

    // ping is absorbed, unknown types get a typed error
    env.hub.dispatch(&session, Frame::bare(frame_type::PING)).await;
    assert!(rx.try_recv().is_err());
    env.hub.dispatch(&session, Frame::bare("made.up")).await;
    let error: ErrorPayload = expect_frame(&mut rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "unknown_type");
}

#[tokio::test]
async fn test_invalid_sender_credentials() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    drain(&mut alice_rx);

    env.send_message(&alice, "m1", "pA", "wrong-secret", b"hi").await;
    let error: ErrorPayload = expect_frame(&mut alice_rx, frame_type::ERROR)
        .decode_payload()
        .unwrap();
    assert_eq!(error.code, "invalid_credentials");

    // forged credentials on an authed session are a policy strike:
    // a repeat inside the warning window bans the device
    env.send_message(&alice, "m2", "pA", "wrong-secret", b"hi").await;
    expect_frame(&mut alice_rx, frame_type::BANNED);
    assert!(env.store.is_banned("dev-A").await.unwrap().is_some());
}

// ─── Push frames ───

#[tokio::test]
async fn test_push_register_works_without_session_auth() {
    let env = TestEnv::new();
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    // an unauthenticated (reconnecting) session may still register push,
    // because the payload itself carries participant credentials
    let (session, mut rx) = env.open_session().await;
    let frame = Frame::new(
        frame_type::PUSH_REGISTER,
        PushRegisterPayload {
            chat_uuid: "c1".into(),
            fcm_token: "tok-unauth".into(),
            participant_id: "pB".into(),
            participant_secret: "sB".into(),
        },
    );
    env.hub.dispatch(&session, frame).await;

    assert_eq!(
        env.store.push_token("c1", "pB").await.unwrap().as_deref(),
        Some("tok-unauth")
    );
    // no ack for an unauthenticated session
    assert!(rx.try_recv().is_err());

    // bad payload credentials leave no registration behind
    let forged = Frame::new(
        frame_type::PUSH_REGISTER,
        PushRegisterPayload {
            chat_uuid: "c1".into(),
            fcm_token: "tok-evil".into(),
            participant_id: "pA".into(),
            participant_secret: "nope".into(),
        },
    );
    env.hub.dispatch(&session, forged).await;
    assert!(env.store.push_token("c1", "pA").await.unwrap().is_none());
}

#[tokio::test]
async fn test_push_unregister_and_burn_all() {
    let env = TestEnv::new();
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (bob, mut bob_rx) = env.open_session().await;
    env.auth(&bob, "dev-B", "k_bob").await;
    drain(&mut bob_rx);

    let register = Frame::new(
        frame_type::PUSH_REGISTER,
        PushRegisterPayload {
            chat_uuid: "c1".into(),
            fcm_token: "tok-1".into(),
            participant_id: "pB".into(),
            participant_secret: "sB".into(),
        },
    );
    env.hub.dispatch(&bob, register).await;
    expect_frame(&mut bob_rx, frame_type::PUSH_REGISTER_ACK);

    let unregister = Frame::new(
        frame_type::PUSH_UNREGISTER,
        sotto_shared::protocol::PushUnregisterPayload {
            chat_uuid: "c1".into(),
            participant_id: "pB".into(),
            participant_secret: "sB".into(),
        },
    );
    env.hub.dispatch(&bob, unregister).await;
    expect_frame(&mut bob_rx, frame_type::PUSH_UNREGISTER_ACK);
    assert!(env.store.push_token("c1", "pB").await.unwrap().is_none());

    // burn-all sweeps registrations across chats by participant id
    env.store.register_push("c1", "pB", "tok-2").await.unwrap();
    let burn = Frame::new(
        frame_type::PUSH_BURN_ALL,
        PushBurnAllPayload {
            participant_ids: vec!["pB".into()],
        },
    );
    env.hub.dispatch(&bob, burn).await;
    let ack: PushBurnAllAckPayload = expect_frame(&mut bob_rx, frame_type::PUSH_BURN_ALL_ACK)
        .decode_payload()
        .unwrap();
    assert_eq!(ack.deleted, 1);
}

#[tokio::test]
async fn test_offline_send_without_token_fires_no_wake() {
    let env = TestEnv::new();
    env.activate_device("dev-A", "k_alice").await;
    env.activate_device("dev-B", "k_bob").await;
    env.seed_active_chat().await;

    let (alice, mut alice_rx) = env.open_session().await;
    env.auth(&alice, "dev-A", "k_alice").await;
    env.register_chat(&alice, "c1", "pA", "sA").await;
    drain(&mut alice_rx);

    env.send_message(&alice, "m1", "pA", "sA", b"into the void").await;
    expect_frame(&mut alice_rx, frame_type::MESSAGE_ACK);
    assert!(env.push.wakes.lock().unwrap().is_empty());
}
