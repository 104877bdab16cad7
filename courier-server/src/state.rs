//! Shared server state.

use crate::auth::{StaticTokenVerifier, TokenVerifier};
use crate::settings::{Settings, StoreKind};
use courier_log::{error, info, warn};
use courier_queue::{MemoryStore, Queue, RedisStore};
use courier_redis::{RedisConfig, RedisService};
use std::sync::Arc;

pub struct AppState {
    /// `None` when no store is configured; queue routes answer 503.
    pub queue: Option<Queue>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub max_page_size: usize,
}

impl AppState {
    pub fn new(queue: Option<Queue>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            queue,
            verifier,
            max_page_size: 500,
        }
    }

    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max;
        self
    }

    /// Build the store described by `settings`. A Redis store is created
    /// without blocking on the server being reachable.
    pub async fn from_settings(settings: &Settings) -> Self {
        let verifier = StaticTokenVerifier::new(&settings.api_tokens);
        if verifier.is_empty() {
            warn!("no api_tokens configured; every queue request will be rejected");
        }

        Self::new(open_queue(settings).await, Arc::new(verifier))
            .with_max_page_size(settings.max_page_size)
    }
}

async fn open_queue(settings: &Settings) -> Option<Queue> {
    let config = settings.queue_config();

    match settings.store {
        StoreKind::Memory => {
            warn!("using the in-memory store; messages are lost on restart");
            Some(Queue::with_config(Arc::new(MemoryStore::new()), config))
        }
        StoreKind::Redis => {
            let Some(url) = &settings.redis_url else {
                warn!("redis_url is not set; queue endpoints will answer 503");
                return None;
            };

            let mut builder = RedisConfig::from_env()
                .unwrap_or_else(RedisConfig::builder)
                .url(url.clone());
            if std::env::var("REDIS_TLS").is_ok() {
                builder = builder.tls(true);
            }
            let redis_config = builder.build();

            let redis = match RedisService::connect_lazy(redis_config) {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    error!("invalid Redis configuration: {}", e);
                    return None;
                }
            };

            match redis.health_check().await {
                Ok(()) => info!("connected to {}", redis.config().display_url()),
                Err(e) => warn!(
                    "Redis at {} is not reachable yet: {}",
                    redis.config().display_url(),
                    e
                ),
            }

            let store = RedisStore::new(redis, settings.queue_prefix.clone());
            Some(Queue::with_config(Arc::new(store), config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redis_without_url_is_unconfigured() {
        let settings = Settings::default();
        let state = AppState::from_settings(&settings).await;
        assert!(state.queue.is_none());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let settings = Settings {
            store: StoreKind::Memory,
            max_page_size: 20,
            ..Settings::default()
        };
        let state = AppState::from_settings(&settings).await;
        assert_eq!(state.queue.unwrap().store_type(), "memory");
        assert_eq!(state.max_page_size, 20);
    }
}
