// Courier - reliable webhook delivery queue
//
// Producers push opaque payloads, consumers pop and acknowledge them, and
// failed deliveries are retried with exponential backoff until they land in
// a dead-letter queue for manual requeue or purge.

// Re-export the queue
pub use courier_queue::*;

pub use courier_log;
pub use courier_redis;

#[cfg(feature = "server")]
pub use courier_config;

#[cfg(feature = "server")]
pub use courier_core;

#[cfg(feature = "server")]
pub use courier_server;

// Re-export common dependencies
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;
