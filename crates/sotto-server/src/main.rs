use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sotto_server::api::{self, AppState};
use sotto_server::config::{ServerConfig, StoreBackend};
use sotto_server::hub::Hub;
use sotto_server::push::{NoopPush, PushGateway};
use sotto_store::{MemoryStore, RedisStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sotto_server=debug")),
        )
        .init();

    info!("Starting sotto relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        backend = ?config.store_backend,
        rate_limit = config.rate_limit_per_minute,
        "Loaded configuration"
    );

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("failed to connect to redis")?,
        ),
        StoreBackend::Memory => {
            warn!("Using the in-memory store; state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let push: Arc<dyn PushGateway> = Arc::new(NoopPush);

    let hub = Arc::new(Hub::new(
        store.clone(),
        push,
        config.rate_limit_per_minute,
        config.renew_url.clone(),
    ));

    let http_addr = config.http_addr;
    let state = AppState {
        store,
        hub,
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "HTTP server failed");
                return Err(err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
