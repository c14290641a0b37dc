use std::net::SocketAddr;

use sotto_shared::constants::{DEFAULT_RATE_LIMIT_PER_MINUTE, MAX_MESSAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_minute: usize,
    pub message_max_size: usize,
    pub renew_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            store_backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            cors_origins: Vec::new(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            message_max_size: MAX_MESSAGE_SIZE,
            renew_url: "https://sotto.app".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(backend) = std::env::var("STORE_BACKEND") {
            match backend.as_str() {
                "redis" => config.store_backend = StoreBackend::Redis,
                "memory" => config.store_backend = StoreBackend::Memory,
                other => {
                    tracing::warn!(value = %other, "Unknown STORE_BACKEND, using redis");
                }
            }
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            if let Ok(n) = val.parse::<usize>() {
                config.rate_limit_per_minute = n;
            } else {
                tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_MINUTE, using default");
            }
        }

        if let Ok(val) = std::env::var("MESSAGE_MAX_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.message_max_size = n;
            }
        }

        if let Ok(url) = std::env::var("RENEW_URL") {
            config.renew_url = url;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit_per_minute, 120);
        assert_eq!(config.message_max_size, 10_240);
    }
}
