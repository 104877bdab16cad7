//! In-memory queue store.

use crate::error::QueueResult;
use crate::message::{BackoffPolicy, IdempotencyKey, Message, MessageId};
use crate::store::{
    DeadLetterPage, Depths, FailOutcome, PushOutcome, QueueStore, RequeueOutcome,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Which membership list holds an id. Popped ids have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Main,
    Delayed(i64),
    Dead,
}

#[derive(Default)]
struct State {
    /// Front is the head (newest), back is the tail (next to pop).
    main: VecDeque<MessageId>,
    /// Ordered by due time, then id.
    delayed: BTreeSet<(i64, MessageId)>,
    dead: VecDeque<MessageId>,
    records: HashMap<MessageId, Message>,
    slots: HashMap<MessageId, Slot>,
    /// Digest -> (id, expires_at).
    idempotency: HashMap<String, (MessageId, i64)>,
    /// (expires_at, digest), drained in expiry order.
    expiries: BTreeSet<(i64, String)>,
}

impl State {
    fn enqueue(&mut self, id: MessageId) {
        self.main.push_front(id);
        self.slots.insert(id, Slot::Main);
    }

    fn schedule(&mut self, id: MessageId, due: i64) {
        self.delayed.insert((due, id));
        self.slots.insert(id, Slot::Delayed(due));
    }

    fn bury(&mut self, id: MessageId) {
        self.dead.push_back(id);
        self.slots.insert(id, Slot::Dead);
    }

    /// Take the id out of its membership list, if any.
    fn unlink(&mut self, id: MessageId) -> Option<Slot> {
        let slot = self.slots.remove(&id)?;
        match slot {
            Slot::Main => remove_id(&mut self.main, id),
            Slot::Delayed(due) => {
                self.delayed.remove(&(due, id));
            }
            Slot::Dead => remove_id(&mut self.dead, id),
        }
        Some(slot)
    }

    fn expire_keys(&mut self, now: i64) {
        while let Some((expires_at, _)) = self.expiries.first() {
            if *expires_at > now {
                break;
            }
            let Some((expires_at, hash)) = self.expiries.pop_first() else {
                break;
            };
            if self
                .idempotency
                .get(&hash)
                .is_some_and(|(_, current)| *current == expires_at)
            {
                self.idempotency.remove(&hash);
            }
        }
    }
}

fn remove_id(list: &mut VecDeque<MessageId>, id: MessageId) {
    if let Some(index) = list.iter().position(|existing| *existing == id) {
        list.remove(index);
    }
}

/// Single-process store. Every operation holds one lock for its whole
/// duration.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including popped but unacknowledged ones.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(
        &self,
        message: Message,
        delay_seconds: u64,
        idempotency: Option<IdempotencyKey>,
    ) -> QueueResult<PushOutcome> {
        let now = message.enqueued_at;
        let mut state = self.state.lock();
        state.expire_keys(now);

        if let Some(key) = &idempotency
            && let Some(&(id, _)) = state.idempotency.get(&key.hash)
        {
            return Ok(PushOutcome {
                id,
                duplicate: true,
            });
        }

        let id = message.id;
        state.records.insert(id, message);
        if delay_seconds > 0 {
            state.schedule(id, now.saturating_add_unsigned(delay_seconds));
        } else {
            state.enqueue(id);
        }

        if let Some(key) = idempotency {
            let expires_at = now.saturating_add_unsigned(key.ttl_seconds);
            state.expiries.insert((expires_at, key.hash.clone()));
            state.idempotency.insert(key.hash, (id, expires_at));
        }

        Ok(PushOutcome {
            id,
            duplicate: false,
        })
    }

    async fn promote_due(&self, now: i64) -> QueueResult<u64> {
        let mut state = self.state.lock();
        let mut promoted = 0;

        while let Some(&(due, id)) = state.delayed.first() {
            if due > now {
                break;
            }
            state.delayed.pop_first();
            state.enqueue(id);
            promoted += 1;
        }

        Ok(promoted)
    }

    async fn pop(&self, now: i64) -> QueueResult<Option<Message>> {
        let mut state = self.state.lock();

        let Some(id) = state.main.pop_back() else {
            return Ok(None);
        };
        state.slots.remove(&id);

        Ok(state.records.get_mut(&id).map(|record| {
            record.updated_at = now;
            record.clone()
        }))
    }

    async fn delete(&self, id: MessageId) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.unlink(id);
        state.records.remove(&id);
        Ok(())
    }

    async fn fail(
        &self,
        id: MessageId,
        error: Option<&str>,
        now: i64,
        backoff: BackoffPolicy,
    ) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock();

        if state.slots.contains_key(&id) {
            return Ok(FailOutcome::NotInFlight);
        }

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(FailOutcome::Unknown);
        };

        record.attempts = record.attempts.saturating_add(1);
        if let Some(error) = error {
            record.last_error = Some(error.to_string());
        }
        record.updated_at = now;

        let attempts = record.attempts;
        if record.is_exhausted() {
            state.bury(id);
            return Ok(FailOutcome::DeadLettered { attempts });
        }

        let delay_seconds = backoff.delay_for_attempt(attempts);
        state.schedule(id, now.saturating_add_unsigned(delay_seconds));
        Ok(FailOutcome::Retry {
            attempts,
            delay_seconds,
        })
    }

    async fn dead_letters(&self, limit: usize, offset: usize) -> QueueResult<DeadLetterPage> {
        let state = self.state.lock();
        let items = state
            .dead
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| state.records.get(id).cloned())
            .collect();

        Ok(DeadLetterPage {
            total: state.dead.len() as u64,
            items,
        })
    }

    async fn requeue(
        &self,
        id: MessageId,
        delay_seconds: u64,
        now: i64,
    ) -> QueueResult<RequeueOutcome> {
        let mut state = self.state.lock();

        if state.slots.get(&id) != Some(&Slot::Dead) {
            return Ok(RequeueOutcome::Unknown);
        }
        state.unlink(id);

        if let Some(record) = state.records.get_mut(&id) {
            record.updated_at = now;
        }

        if delay_seconds > 0 {
            state.schedule(id, now.saturating_add_unsigned(delay_seconds));
        } else {
            state.enqueue(id);
        }

        Ok(RequeueOutcome::Requeued { delay_seconds })
    }

    async fn purge(&self, id: Option<MessageId>) -> QueueResult<u64> {
        let mut state = self.state.lock();

        match id {
            Some(id) => {
                if state.slots.get(&id) != Some(&Slot::Dead) {
                    return Ok(0);
                }
                state.unlink(id);
                state.records.remove(&id);
                Ok(1)
            }
            None => {
                let dead: Vec<MessageId> = state.dead.drain(..).collect();
                for id in &dead {
                    state.slots.remove(id);
                    state.records.remove(id);
                }
                Ok(dead.len() as u64)
            }
        }
    }

    async fn depths(&self) -> QueueResult<Depths> {
        let state = self.state.lock();
        let oldest_enqueued_at = state
            .main
            .back()
            .and_then(|id| state.records.get(id))
            .map(|record| record.enqueued_at);

        Ok(Depths {
            main: state.main.len() as u64,
            delayed: state.delayed.len() as u64,
            dead: state.dead.len() as u64,
            oldest_enqueued_at,
        })
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
