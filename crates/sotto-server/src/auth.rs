//! Device session proof and the HTTP auth/rate-limit middleware.
//!
//! The key stored at activation doubles as a shared HMAC key: a client
//! proves possession by signing `<device_uuid>:<timestamp>`. The same scheme
//! guards the WebSocket `auth` frame and the `X-Device-UUID` /
//! `X-Timestamp` / `X-Signature` HTTP headers. The key is confidential:
//! it is never logged and never returned by any endpoint.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use sotto_shared::constants::AUTH_MAX_SKEW_SECS;

use crate::api::AppState;
use crate::error::ServerError;

type HmacSha256 = Hmac<Sha256>;

/// Device UUID proven by the auth middleware, for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthedDevice(pub String);

/// Hex HMAC-SHA256 over `<device_uuid>:<timestamp>`.
pub fn compute_signature(key: &str, device_uuid: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(format!("{device_uuid}:{timestamp}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature check.
pub fn verify_signature(key: &str, device_uuid: &str, timestamp: i64, signature: &str) -> bool {
    let expected = compute_signature(key, device_uuid, timestamp);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

pub fn timestamp_in_window(timestamp: i64) -> bool {
    (Utc::now().timestamp() - timestamp).abs() <= AUTH_MAX_SKEW_SECS
}

/// Why a session proof was rejected. The WebSocket path maps these onto
/// `auth.failed` / `banned` / `subscription.expired` frames, the HTTP path
/// onto status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    Banned(String),
    TimestampExpired,
    DeviceNotFound,
    InvalidSignature,
    SubscriptionExpired,
}

/// Full device check shared by the WebSocket auth frame and the HTTP
/// middleware, in a fixed order: ban → skew → key lookup → signature →
/// subscription. Store failures degrade to the nearest rejection rather
/// than leaking backend detail.
pub async fn authenticate_device(
    store: &dyn sotto_store::Store,
    device_uuid: &str,
    timestamp: i64,
    signature: &str,
) -> Result<sotto_store::Subscription, AuthFailure> {
    if let Some(reason) = store.is_banned(device_uuid).await.unwrap_or(None) {
        return Err(AuthFailure::Banned(reason));
    }

    if !timestamp_in_window(timestamp) {
        return Err(AuthFailure::TimestampExpired);
    }

    let public_key = store
        .public_key(device_uuid)
        .await
        .unwrap_or(None)
        .ok_or(AuthFailure::DeviceNotFound)?;

    if !verify_signature(&public_key, device_uuid, timestamp, signature) {
        return Err(AuthFailure::InvalidSignature);
    }

    match store.subscription(device_uuid).await.unwrap_or(None) {
        Some(sub) if sub.is_active() => Ok(sub),
        _ => Err(AuthFailure::SubscriptionExpired),
    }
}

/// Middleware for the authenticated route group.
pub async fn device_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    fn header(req: &Request, name: &str) -> Option<String> {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    let device_uuid = header(&req, "x-device-uuid").ok_or(ServerError::MissingAuthHeaders)?;
    let timestamp_raw = header(&req, "x-timestamp").ok_or(ServerError::MissingAuthHeaders)?;
    let signature = header(&req, "x-signature").ok_or(ServerError::MissingAuthHeaders)?;

    let timestamp: i64 = timestamp_raw
        .parse()
        .map_err(|_| ServerError::InvalidTimestamp)?;

    authenticate_device(state.store.as_ref(), &device_uuid, timestamp, &signature)
        .await
        .map_err(|failure| match failure {
            AuthFailure::Banned(reason) => ServerError::DeviceBanned { reason },
            AuthFailure::TimestampExpired => ServerError::TimestampExpired,
            AuthFailure::DeviceNotFound => ServerError::DeviceNotFound,
            AuthFailure::InvalidSignature => ServerError::InvalidSignature,
            AuthFailure::SubscriptionExpired => ServerError::SubscriptionExpired {
                renew_url: state.config.renew_url.clone(),
            },
        })?;

    req.extensions_mut().insert(AuthedDevice(device_uuid));
    Ok(next.run(req).await)
}

/// Per-device rate limit for the authenticated route group; runs after
/// [`device_auth_middleware`] and annotates responses with the remaining
/// budget.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(AuthedDevice(device_uuid)) = req.extensions().get::<AuthedDevice>().cloned() else {
        return Ok(next.run(req).await);
    };

    let limit = state.config.rate_limit_per_minute;
    // A store failure here fails open: rate limiting is protective, not
    // load-bearing for correctness.
    let (count, allowed) = state
        .store
        .check_rate_limit(&device_uuid, limit)
        .await
        .unwrap_or((0, true));

    if !allowed {
        tracing::warn!(device = %device_uuid, current = count, "HTTP rate limit exceeded");
        return Err(ServerError::RateLimited {
            current: count,
            limit,
        });
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&limit.saturating_sub(count).to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_known_shape() {
        // the proof is HMAC(key, "<device>:<ts>"), hex encoded
        let sig = compute_signature("k_alice", "dev-A", 1_700_000_000);
        assert_eq!(sig.len(), 64);
        assert!(verify_signature("k_alice", "dev-A", 1_700_000_000, &sig));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let sig = compute_signature("k_alice", "dev-A", 1_700_000_000);
        assert!(!verify_signature("k_alice", "dev-A", 1_700_000_001, &sig));
        assert!(!verify_signature("k_alice", "dev-B", 1_700_000_000, &sig));
        assert!(!verify_signature("other_key", "dev-A", 1_700_000_000, &sig));
    }

    #[test]
    fn test_timestamp_window_boundary() {
        let now = Utc::now().timestamp();
        assert!(timestamp_in_window(now));
        assert!(timestamp_in_window(now - 300));
        assert!(timestamp_in_window(now + 300));
        assert!(!timestamp_in_window(now - 301));
        assert!(!timestamp_in_window(now + 301));
    }
}
