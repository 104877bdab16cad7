//! Message records and retry policy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Unique message identifier.
pub type MessageId = Uuid;

/// Default retry budget for a pushed message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default ceiling for retry delays, in seconds.
pub const DEFAULT_BACKOFF_CAP_SECONDS: u64 = 300;

/// How long an idempotency key is remembered, in seconds.
pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 24 * 60 * 60;

/// A queued unit of work. The payload is carried as-is and never inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub payload: Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Message {
    /// A fresh record with a new id and zero attempts.
    pub fn new(payload: Value, max_attempts: u32, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            max_attempts,
            enqueued_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// True once another failure would not be retried.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Exponential retry delay: `min(cap, 2^attempts)` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub cap_seconds: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            cap_seconds: DEFAULT_BACKOFF_CAP_SECONDS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(cap_seconds: u64) -> Self {
        Self { cap_seconds }
    }

    /// Delay before retrying a message that has failed `attempts` times.
    pub fn delay_for_attempt(&self, attempts: u32) -> u64 {
        1u64.checked_shl(attempts)
            .unwrap_or(u64::MAX)
            .min(self.cap_seconds)
    }
}

/// A caller-supplied deduplication key, stored only as a SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub hash: String,
    pub ttl_seconds: u64,
}

impl IdempotencyKey {
    pub fn new(raw: &str, ttl_seconds: u64) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        Self {
            hash: hex::encode(digest),
            ttl_seconds,
        }
    }
}
