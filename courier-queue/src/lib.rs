//! Reliable webhook delivery queue.
//!
//! Messages move between three places:
//! - **main**: ready, delivered in push order
//! - **delayed**: waiting for a due time (deferred pushes and retries)
//! - **dead-letter**: out of retries, waiting for an operator
//!
//! Failed deliveries back off `min(300, 2^attempts)` seconds and are
//! dead-lettered once `attempts >= max_attempts`.
//!
//! ## Quick Start
//!
//! ```
//! use courier_queue::{FailOutcome, ManualClock, MemoryStore, PushRequest, Queue};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let clock = Arc::new(ManualClock::new(0));
//! let queue = Queue::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
//!
//! queue.push(PushRequest::new(json!({"x": 1}))).await.unwrap();
//! let message = queue.pop().await.unwrap().unwrap();
//! assert_eq!(message.payload, json!({"x": 1}));
//!
//! let outcome = queue.fail(message.id, None).await.unwrap();
//! assert_eq!(outcome, FailOutcome::Retry { attempts: 1, delay_seconds: 2 });
//!
//! clock.advance(2);
//! assert_eq!(queue.stats().await.unwrap().main.size, 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Redis
//!
//! ```rust,ignore
//! use courier_queue::{Queue, RedisStore};
//! use courier_redis::{RedisConfig, RedisService};
//! use std::sync::Arc;
//!
//! let redis = Arc::new(RedisService::connect(RedisConfig::new("redis://localhost:6379")).await?);
//! let queue = Queue::new(Arc::new(RedisStore::new(redis, "courier:webhooks")));
//! ```

pub mod clock;
pub mod error;
pub mod message;
pub mod queue;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use message::{
    BackoffPolicy, DEFAULT_BACKOFF_CAP_SECONDS, DEFAULT_IDEMPOTENCY_TTL_SECONDS,
    DEFAULT_MAX_ATTEMPTS, IdempotencyKey, Message, MessageId,
};
pub use queue::{DepthStats, MainStats, PushRequest, Queue, QueueConfig, QueueStats};
pub use store::{
    DeadLetterPage, Depths, FailOutcome, MemoryStore, PushOutcome, QueueStore, RedisStore,
    RequeueOutcome,
};
pub use worker::{MessageHandler, Worker, WorkerConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::message::{Message, MessageId};
    pub use crate::queue::{PushRequest, Queue, QueueConfig, QueueStats};
    pub use crate::store::{FailOutcome, MemoryStore, QueueStore, RedisStore, RequeueOutcome};
    pub use crate::worker::{Worker, WorkerConfig};
}
