//! HTTP side channel and WebSocket upgrade.
//!
//! The HTTP surface mutates the chat registry and the key bundle store; its
//! effects interlock with the hub (`chat.joined` on join, `chat.expired`
//! broadcast on delete, force-disconnect on purge).

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Extension, Json, Router};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use sotto_shared::constants::VALID_CHAT_MESSAGE_TTLS;
use sotto_shared::protocol::{frame_type, ChatExpiredPayload, ChatJoinedPayload, Frame};
use sotto_store::{
    hash_secret, Chat, ChatStatus, Invitation, PreKey, SignedPreKey, Store, StoredKeyBundle,
};

use crate::auth::{device_auth_middleware, rate_limit_middleware, AuthedDevice};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Arc<Hub>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let origins = state.config.cors_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            origins.iter().any(|allowed| allowed == origin)
                || origin.starts_with("http://localhost:")
                || origin.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let public = Router::new()
        .route("/health", get(health))
        .route("/keys/register", post(register_keys_public))
        .route("/ws", get(ws_upgrade));

    let authed = Router::new()
        .route("/chat/create", post(create_chat))
        .route("/chat/join", post(join_chat))
        .route("/chat/list", get(list_chats))
        .route("/chat/{chat_uuid}", delete(delete_chat))
        .route("/subscription/status", get(subscription_status))
        .route("/keys/{device_uuid}", get(fetch_key_bundle))
        .route("/keys/replenish", post(replenish_keys))
        .route("/keys/count", get(prekey_count))
        .route("/device/purge", delete(purge_device))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            device_auth_middleware,
        ));

    public
        .merge(authed)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting relay server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    ws.max_message_size(state.config.message_max_size)
        .on_upgrade(move |socket| session::run(socket, hub))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: i64,
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            time: Utc::now().timestamp(),
        })
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": "store unavailable",
            })),
        )
            .into_response(),
    }
}

// ─── Chats ───

#[derive(Deserialize)]
struct CreateChatRequest {
    ttl: u32,
    participant_id: String,
    participant_secret: String,
}

#[derive(Serialize)]
struct CreateChatResponse {
    chat_uuid: String,
    invitation_token: String,
    ttl: u32,
    participant_id: String,
}

async fn create_chat(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<CreateChatResponse>, ServerError> {
    if !VALID_CHAT_MESSAGE_TTLS.contains(&req.ttl) {
        return Err(ServerError::BadRequest(
            "invalid TTL, must be 5, 30, 60, 180, or 300".into(),
        ));
    }
    if req.participant_id.is_empty() || req.participant_secret.is_empty() {
        return Err(ServerError::BadRequest("missing participant credentials".into()));
    }

    let chat_uuid = Uuid::new_v4().to_string();
    let invitation_token = generate_invitation_token();
    let now = Utc::now();

    let chat = Chat {
        chat_uuid: chat_uuid.clone(),
        participant_a: req.participant_id.clone(),
        participant_a_secret: hash_secret(&req.participant_secret),
        participant_a_device: device,
        participant_b: String::new(),
        participant_b_secret: String::new(),
        participant_b_device: String::new(),
        ttl_seconds: req.ttl,
        created_at: now,
        status: ChatStatus::Pending,
    };
    let invitation = Invitation {
        token: invitation_token.clone(),
        chat_uuid: chat_uuid.clone(),
        creator_device_id: chat.participant_a_device.clone(),
        ttl_seconds: req.ttl,
        created_at: now,
        used: false,
    };

    state.store.create_chat(&chat, &invitation).await?;
    info!(chat = %chat_uuid, "Chat created");

    Ok(Json(CreateChatResponse {
        chat_uuid,
        invitation_token,
        ttl: req.ttl,
        participant_id: req.participant_id,
    }))
}

#[derive(Deserialize)]
struct JoinChatRequest {
    invitation_token: String,
    participant_id: String,
    participant_secret: String,
}

#[derive(Serialize)]
struct JoinChatResponse {
    chat_uuid: String,
    ttl: u32,
    other_device_uuid: String,
    participant_id: String,
}

async fn join_chat(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
    Json(req): Json<JoinChatRequest>,
) -> Result<Json<JoinChatResponse>, ServerError> {
    let (chat, creator_device) = state
        .store
        .join_chat(
            &req.invitation_token,
            &device,
            &req.participant_id,
            &req.participant_secret,
        )
        .await?;

    info!(chat = %chat.chat_uuid, "Chat joined");

    state
        .hub
        .notify_chat_joined(
            &creator_device,
            ChatJoinedPayload {
                chat_uuid: chat.chat_uuid.clone(),
                participant_id: req.participant_id.clone(),
                joiner_device_uuid: device,
            },
        )
        .await;

    Ok(Json(JoinChatResponse {
        chat_uuid: chat.chat_uuid,
        ttl: chat.ttl_seconds,
        other_device_uuid: creator_device,
        participant_id: req.participant_id,
    }))
}

/// Deliberate stub: chat membership is client-held, and a server-side
/// device→chats index would re-create exactly the linkage the participant
/// model exists to prevent.
async fn list_chats() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "chats": [] }))
}

#[derive(Deserialize)]
struct DeleteChatRequest {
    participant_id: String,
    participant_secret: String,
}

async fn delete_chat(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
    Path(chat_uuid): Path<String>,
    Json(req): Json<DeleteChatRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let chat = state
        .store
        .chat(&chat_uuid)
        .await?
        .ok_or_else(|| ServerError::NotFound("chat not found".into()))?;

    let is_member = chat.participant_for_device(&device).is_some()
        || state
            .store
            .validate_participant(&chat_uuid, &req.participant_id, &req.participant_secret)
            .await
            .unwrap_or(false);
    if !is_member {
        return Err(ServerError::NotParticipant);
    }

    state.store.purge_chat_push(&chat_uuid).await?;

    // notify both sides before the record disappears
    state
        .hub
        .broadcast_to_chat(
            &chat,
            Frame::new(
                frame_type::CHAT_EXPIRED,
                ChatExpiredPayload {
                    chat_uuid: chat_uuid.clone(),
                    reason: "deleted_by_participant".into(),
                },
            ),
        )
        .await;

    state.store.delete_chat(&chat_uuid).await?;
    info!(chat = %chat_uuid, "Chat deleted");

    Ok(Json(serde_json::json!({ "success": true })))
}

// ─── Subscription ───

async fn subscription_status(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let sub = state
        .store
        .subscription(&device)
        .await?
        .ok_or_else(|| ServerError::NotFound("subscription not found".into()))?;

    Ok(Json(serde_json::json!({
        "plan": sub.plan,
        "status": sub.status,
        "expires_at": sub.expires_at.timestamp(),
    })))
}

// ─── Key bundles ───

#[derive(Deserialize)]
struct RegisterKeysRequest {
    device_uuid: String,
    registration_id: u32,
    identity_key: String,
    signed_prekey: SignedPreKey,
    prekeys: Vec<PreKey>,
}

/// Public on purpose: key registration happens right after activation,
/// before the client can sign requests. Gated on an active subscription.
async fn register_keys_public(
    State(state): State<AppState>,
    Json(req): Json<RegisterKeysRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let active = state
        .store
        .subscription(&req.device_uuid)
        .await
        .unwrap_or(None)
        .map(|sub| sub.is_active())
        .unwrap_or(false);
    if !active {
        return Err(ServerError::SubscriptionExpired {
            renew_url: state.config.renew_url.clone(),
        });
    }

    let bundle = StoredKeyBundle {
        registration_id: req.registration_id,
        identity_key: req.identity_key,
        signed_prekey: req.signed_prekey,
    };
    state
        .store
        .store_key_bundle(&req.device_uuid, &bundle, &req.prekeys)
        .await?;

    info!(prekeys = req.prekeys.len(), "Key bundle registered");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn fetch_key_bundle(
    State(state): State<AppState>,
    Path(device_uuid): Path<String>,
) -> Result<Json<sotto_store::KeyBundle>, ServerError> {
    let bundle = state
        .store
        .take_key_bundle(&device_uuid)
        .await?
        .ok_or_else(|| ServerError::NotFound("key bundle not found".into()))?;
    Ok(Json(bundle))
}

#[derive(Deserialize)]
struct ReplenishKeysRequest {
    prekeys: Vec<PreKey>,
}

async fn replenish_keys(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
    Json(req): Json<ReplenishKeysRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.store.add_prekeys(&device, &req.prekeys).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn prekey_count(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let count = state.store.prekey_count(&device).await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

// ─── Device lifecycle ───

async fn purge_device(
    State(state): State<AppState>,
    Extension(AuthedDevice(device)): Extension<AuthedDevice>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.store.purge_device(&device).await?;
    state.hub.disconnect_device(&device).await;

    info!("Device purged");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// 20 random bytes, hex, dash-grouped for human transport.
fn generate_invitation_token() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let h = hex::encode(bytes);
    format!("{}-{}-{}-{}", &h[..8], &h[8..12], &h[12..16], &h[16..20])
}
