//! Blind wake push seam.
//!
//! When a recipient is offline the hub pokes their chat-scoped token so the
//! app reconnects and drains the queue. The payload is a bare
//! `{type: "wake"}` marker: no chat, sender or content metadata ever reaches
//! the push vendor. Vendor dispatch itself lives behind this trait; the
//! relay ships only a no-op implementation.

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Fires a metadata-free wake-up at the given token. Best-effort:
    /// failures are the gateway's to swallow, the hub never retries.
    async fn send_blind_wake(&self, token: &str);
}

/// Stand-in gateway for deployments without a push vendor.
pub struct NoopPush;

#[async_trait]
impl PushGateway for NoopPush {
    async fn send_blind_wake(&self, token: &str) {
        // log length only; tokens are routing secrets
        debug!(token_len = token.len(), "Blind wake suppressed (no push gateway)");
    }
}
