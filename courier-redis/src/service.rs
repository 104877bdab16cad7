//! Shared Redis handle.

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Owns the connection pool; cheap to share behind an `Arc`.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Create the pool without connecting.
    pub fn connect_lazy(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build_lazy()?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(())
    }

    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    /// Run a Lua script on a pooled connection.
    pub async fn run_script<T: redis::FromRedisValue>(
        &self,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> Result<T> {
        let mut conn = self.get().await?;
        let value: T = invocation.invoke_async(&mut *conn).await?;
        Ok(value)
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_connect_and_ping() {
        let config = RedisConfig::builder().url("redis://localhost:6379").build();
        let redis = RedisService::connect(config).await.unwrap();
        redis.health_check().await.unwrap();
        assert!(redis.pool_stats().connections >= 1);
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let config = RedisConfig::builder()
            .url("redis://127.0.0.1:1")
            .connection_timeout(std::time::Duration::from_millis(200))
            .build();
        let redis = RedisService::connect_lazy(config).unwrap();
        assert!(redis.health_check().await.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_lazy_pool_rejects_bad_url() {
        let config = RedisConfig::new("not a url");
        assert!(matches!(
            RedisService::connect_lazy(config),
            Err(RedisError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_unavailable() {
        let config = RedisConfig::builder()
            .url("redis://127.0.0.1:1")
            .connection_timeout(std::time::Duration::from_millis(200))
            .build();
        let err = match RedisService::connect(config).await {
            Ok(_) => panic!("port 1 should refuse connections"),
            Err(e) => e,
        };
        assert!(err.is_unavailable());
    }
}
