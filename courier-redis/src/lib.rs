//! # Courier Redis
//!
//! Pooled Redis access for the queue store.
//!
//! ```rust,ignore
//! use courier_redis::{RedisConfig, RedisService};
//!
//! let config = RedisConfig::builder().url("redis://localhost:6379").pool_size(8).build();
//! let redis = RedisService::connect(config).await?;
//! redis.health_check().await?;
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};

pub use redis;
