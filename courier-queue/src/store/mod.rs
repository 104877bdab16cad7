//! Queue storage backends
//!
//! - **Memory**: single-process store guarded by one mutex
//! - **Redis**: shared store where each compound operation is a Lua script
//!
//! Every method is atomic with respect to concurrent callers: a message id
//! is never observed in two of main/delayed/dead-letter at once.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::QueueResult;
use crate::message::{BackoffPolicy, IdempotencyKey, Message, MessageId};
use async_trait::async_trait;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub id: MessageId,
    /// The idempotency key was already live; nothing was enqueued.
    pub duplicate: bool,
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled into the delayed set.
    Retry { attempts: u32, delay_seconds: u64 },
    /// Retry budget exhausted; moved to the dead-letter list.
    DeadLettered { attempts: u32 },
    /// No record for this id.
    Unknown,
    /// The id is still in main, delayed or the dead-letter list, so it was
    /// never popped or its failure was already recorded.
    NotInFlight,
}

/// Result of a dead-letter requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    Requeued { delay_seconds: u64 },
    /// The id is not in the dead-letter list.
    Unknown,
}

/// Raw membership counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Depths {
    pub main: u64,
    pub delayed: u64,
    pub dead: u64,
    /// `enqueued_at` of the next message to pop.
    pub oldest_enqueued_at: Option<i64>,
}

/// A page of dead-lettered messages in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeadLetterPage {
    pub total: u64,
    pub items: Vec<Message>,
}

/// Storage backend for the queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create the record and place it in main (no delay) or delayed.
    /// With a live idempotency key, return the original id instead.
    async fn push(
        &self,
        message: Message,
        delay_seconds: u64,
        idempotency: Option<IdempotencyKey>,
    ) -> QueueResult<PushOutcome>;

    /// Move every delayed id with `due <= now` into main, earliest first.
    /// Returns the number promoted.
    async fn promote_due(&self, now: i64) -> QueueResult<u64>;

    /// Take the oldest id from main and stamp `updated_at`.
    async fn pop(&self, now: i64) -> QueueResult<Option<Message>>;

    /// Delete the record and drop the id from whichever list holds it.
    /// Deleting a missing id succeeds.
    async fn delete(&self, id: MessageId) -> QueueResult<()>;

    /// Count a failure, then reschedule or dead-letter. Only popped ids
    /// that sit in none of main/delayed/dead-letter are eligible.
    async fn fail(
        &self,
        id: MessageId,
        error: Option<&str>,
        now: i64,
        backoff: BackoffPolicy,
    ) -> QueueResult<FailOutcome>;

    async fn dead_letters(&self, limit: usize, offset: usize) -> QueueResult<DeadLetterPage>;

    /// Move one dead-lettered id back to main, or to delayed when
    /// `delay_seconds > 0`. Attempts are kept.
    async fn requeue(
        &self,
        id: MessageId,
        delay_seconds: u64,
        now: i64,
    ) -> QueueResult<RequeueOutcome>;

    /// Remove one dead-lettered message, or all of them, with their records.
    async fn purge(&self, id: Option<MessageId>) -> QueueResult<u64>;

    async fn depths(&self) -> QueueResult<Depths>;

    /// Store type name for health output and logs.
    fn store_type(&self) -> &'static str;
}
