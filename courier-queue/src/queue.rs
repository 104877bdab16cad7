//! Queue facade: validation, clock and retry policy on top of a store.

use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::message::{
    BackoffPolicy, DEFAULT_IDEMPOTENCY_TTL_SECONDS, DEFAULT_MAX_ATTEMPTS, IdempotencyKey, Message,
    MessageId,
};
use crate::store::{DeadLetterPage, FailOutcome, PushOutcome, QueueStore, RequeueOutcome};
use courier_log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Used when a push does not set `max_attempts`.
    pub default_max_attempts: u32,

    pub backoff: BackoffPolicy,

    /// Lifetime of idempotency keys, in seconds.
    pub idempotency_ttl_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
        }
    }
}

impl QueueConfig {
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_backoff_cap(mut self, cap_seconds: u64) -> Self {
        self.backoff = BackoffPolicy::new(cap_seconds);
        self
    }

    pub fn with_idempotency_ttl(mut self, seconds: u64) -> Self {
        self.idempotency_ttl_seconds = seconds;
        self
    }
}

/// Input for [`Queue::push`].
///
/// ```
/// use courier_queue::PushRequest;
/// use serde_json::json;
///
/// let request = PushRequest::new(json!({"event": "donation.created"}))
///     .max_attempts(3)
///     .delay_seconds(30)
///     .idempotency_key("donation-8812");
///
/// assert_eq!(request.max_attempts, Some(3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub payload: Value,
    pub max_attempts: Option<i64>,
    pub delay_seconds: Option<i64>,
    pub idempotency_key: Option<String>,
}

impl PushRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay_seconds(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Depths and age of the oldest ready message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub main: MainStats,
    pub delayed: DepthStats,
    pub dlq: DepthStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MainStats {
    pub size: u64,
    pub oldest_age_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthStats {
    pub size: u64,
}

/// Handle to a webhook delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl Queue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    pub fn with_config(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store_type(&self) -> &'static str {
        self.store.store_type()
    }

    /// Enqueue a payload, optionally deferred and deduplicated.
    pub async fn push(&self, request: PushRequest) -> QueueResult<PushOutcome> {
        if request.payload.is_null() {
            return Err(QueueError::validation("payload is required"));
        }

        let max_attempts = match request.max_attempts {
            None => self.config.default_max_attempts,
            Some(n) if n >= 1 => u32::try_from(n)
                .map_err(|_| QueueError::validation("max_attempts is too large"))?,
            Some(_) => return Err(QueueError::validation("max_attempts must be at least 1")),
        };

        let delay_seconds = non_negative("delay_seconds", request.delay_seconds)?;

        let idempotency = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| IdempotencyKey::new(key, self.config.idempotency_ttl_seconds));

        let message = Message::new(request.payload, max_attempts, self.clock.now());
        let outcome = self.store.push(message, delay_seconds, idempotency).await?;

        if outcome.duplicate {
            debug!("duplicate push resolved to message {}", outcome.id);
        } else {
            debug!(
                "pushed message {} (max_attempts={}, delay={}s)",
                outcome.id, max_attempts, delay_seconds
            );
        }

        Ok(outcome)
    }

    /// Promote due messages, then take the oldest ready one.
    pub async fn pop(&self) -> QueueResult<Option<Message>> {
        let now = self.clock.now();
        self.store.promote_due(now).await?;
        let message = self.store.pop(now).await?;

        if let Some(message) = &message {
            debug!("popped message {} (attempts={})", message.id, message.attempts);
        }

        Ok(message)
    }

    /// Delete a delivered message, wherever it sits. Unknown ids succeed.
    pub async fn ack(&self, id: MessageId) -> QueueResult<()> {
        self.store.delete(id).await?;
        debug!("acked message {}", id);
        Ok(())
    }

    /// Record a failed delivery.
    pub async fn fail(&self, id: MessageId, error: Option<&str>) -> QueueResult<FailOutcome> {
        let outcome = self
            .store
            .fail(id, error, self.clock.now(), self.config.backoff)
            .await?;

        match outcome {
            FailOutcome::Retry {
                attempts,
                delay_seconds,
            } => debug!(
                "message {} failed (attempt {}), retrying in {}s",
                id, attempts, delay_seconds
            ),
            FailOutcome::DeadLettered { attempts } => {
                warn!("message {} dead-lettered after {} attempts", id, attempts)
            }
            FailOutcome::Unknown => debug!("fail for unknown message {}", id),
            FailOutcome::NotInFlight => {
                debug!("fail for message {} that is not in flight", id)
            }
        }

        Ok(outcome)
    }

    /// Promote due messages, then report depths.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let now = self.clock.now();
        self.store.promote_due(now).await?;
        let depths = self.store.depths().await?;

        Ok(QueueStats {
            main: MainStats {
                size: depths.main,
                oldest_age_seconds: depths
                    .oldest_enqueued_at
                    .map(|enqueued_at| now.saturating_sub(enqueued_at).max(0)),
            },
            delayed: DepthStats {
                size: depths.delayed,
            },
            dlq: DepthStats { size: depths.dead },
        })
    }

    pub async fn dead_letters(&self, limit: usize, offset: usize) -> QueueResult<DeadLetterPage> {
        self.store.dead_letters(limit, offset).await
    }

    /// Move a dead-lettered message back into circulation.
    /// The attempt count is not reset.
    pub async fn requeue(
        &self,
        id: MessageId,
        delay_seconds: Option<i64>,
    ) -> QueueResult<RequeueOutcome> {
        let delay_seconds = non_negative("delay_seconds", delay_seconds)?;
        let outcome = self
            .store
            .requeue(id, delay_seconds, self.clock.now())
            .await?;

        if let RequeueOutcome::Requeued { delay_seconds } = outcome {
            info!("requeued dead-lettered message {} (delay={}s)", id, delay_seconds);
        }

        Ok(outcome)
    }

    /// Purge one dead-lettered message, or all with `None`.
    pub async fn purge(&self, id: Option<MessageId>) -> QueueResult<u64> {
        let purged = self.store.purge(id).await?;
        if purged > 0 {
            info!("purged {} dead-lettered message(s)", purged);
        }
        Ok(purged)
    }
}

fn non_negative(field: &str, value: Option<i64>) -> QueueResult<u64> {
    match value {
        None => Ok(0),
        Some(n) => u64::try_from(n)
            .map_err(|_| QueueError::validation(format!("{} must not be negative", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue() -> (Queue, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let queue = Queue::new(store.clone()).with_clock(clock.clone());
        (queue, store, clock)
    }

    #[tokio::test]
    async fn test_validation_rejects_before_mutation() {
        let (queue, store, _) = queue();

        let null_payload = queue.push(PushRequest::new(Value::Null)).await;
        let zero_attempts = queue.push(PushRequest::new(json!(1)).max_attempts(0)).await;
        let negative_delay = queue.push(PushRequest::new(json!(1)).delay_seconds(-1)).await;

        for result in [null_payload, zero_attempts, negative_delay] {
            assert!(result.unwrap_err().is_validation());
        }
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_default_max_attempts_from_config() {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::with_config(
            store,
            QueueConfig::default().with_default_max_attempts(2),
        );

        queue.push(PushRequest::new(json!({}))).await.unwrap();
        assert_eq!(queue.pop().await.unwrap().unwrap().max_attempts, 2);
    }

    #[tokio::test]
    async fn test_blank_idempotency_key_is_ignored() {
        let (queue, _, _) = queue();
        let a = queue
            .push(PushRequest::new(json!(1)).idempotency_key("  "))
            .await
            .unwrap();
        let b = queue
            .push(PushRequest::new(json!(1)).idempotency_key("  "))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_requeue_rejects_negative_delay() {
        let (queue, _, _) = queue();
        let err = queue
            .requeue(MessageId::new_v4(), Some(-5))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_oldest_age() {
        let (queue, _, clock) = queue();
        assert_eq!(queue.stats().await.unwrap().main.oldest_age_seconds, None);

        queue.push(PushRequest::new(json!("a"))).await.unwrap();
        clock.advance(7);
        queue.push(PushRequest::new(json!("b"))).await.unwrap();
        clock.advance(3);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.main.size, 2);
        assert_eq!(stats.main.oldest_age_seconds, Some(10));
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let (queue, _, _) = queue();
        let value = serde_json::to_value(queue.stats().await.unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "main": {"size": 0, "oldest_age_seconds": null},
                "delayed": {"size": 0},
                "dlq": {"size": 0}
            })
        );
    }

    #[tokio::test]
    async fn test_custom_backoff_cap() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let queue = Queue::with_config(store, QueueConfig::default().with_backoff_cap(3))
            .with_clock(clock.clone());

        let id = queue
            .push(PushRequest::new(json!(1)).max_attempts(10))
            .await
            .unwrap()
            .id;
        queue.pop().await.unwrap();

        assert_eq!(
            queue.fail(id, None).await.unwrap(),
            FailOutcome::Retry { attempts: 1, delay_seconds: 2 }
        );
        clock.advance(2);
        queue.pop().await.unwrap().unwrap();
        assert_eq!(
            queue.fail(id, None).await.unwrap(),
            FailOutcome::Retry { attempts: 2, delay_seconds: 3 }
        );
    }
}
