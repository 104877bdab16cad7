//! Redis queue store
//!
//! Key layout under a prefix:
//!
//! | Key | Type | Contents |
//! |---|---|---|
//! | `{prefix}:main` | list | ready ids, pushed at the head, popped from the tail |
//! | `{prefix}:delayed` | sorted set | id scored by due time |
//! | `{prefix}:dlq` | list | dead-lettered ids in arrival order |
//! | `{prefix}:msg:{id}` | hash | message record, plus `slot` naming the list that holds the id |
//! | `{prefix}:idem:{sha256}` | string | id, expires with `EX` |
//!
//! Compound operations run as Lua scripts so they are atomic on the server.

use crate::error::{QueueError, QueueResult};
use crate::message::{BackoffPolicy, IdempotencyKey, Message, MessageId};
use crate::store::{
    DeadLetterPage, Depths, FailOutcome, PushOutcome, QueueStore, RequeueOutcome,
};
use async_trait::async_trait;
use courier_log::{debug, warn};
use courier_redis::RedisService;
use redis::Script;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const PUSH: &str = r#"
local id = ARGV[1]
local has_key = #KEYS >= 4

if has_key then
    local existing = redis.call('GET', KEYS[4])
    if existing then
        return {existing, 1}
    end
end

local now = tonumber(ARGV[4])
redis.call('HSET', KEYS[3],
    'id', id,
    'payload', ARGV[2],
    'attempts', 0,
    'max_attempts', ARGV[3],
    'enqueued_at', now,
    'updated_at', now)

local delay = tonumber(ARGV[5])
if delay > 0 then
    redis.call('ZADD', KEYS[2], now + delay, id)
    redis.call('HSET', KEYS[3], 'slot', 'delayed')
else
    redis.call('LPUSH', KEYS[1], id)
    redis.call('HSET', KEYS[3], 'slot', 'main')
end

if has_key then
    redis.call('SET', KEYS[4], id, 'EX', ARGV[6])
end

return {id, 0}
"#;

const PROMOTE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
    redis.call('LPUSH', KEYS[2], id)
    redis.call('ZREM', KEYS[1], id)
    local key = ARGV[2] .. id
    if redis.call('EXISTS', key) == 1 then
        redis.call('HSET', key, 'slot', 'main')
    end
end
return #due
"#;

const POP: &str = r#"
local id = redis.call('RPOP', KEYS[1])
if not id then
    return false
end

local key = ARGV[1] .. id
if redis.call('EXISTS', key) == 0 then
    return false
end

redis.call('HSET', key, 'updated_at', ARGV[2])
redis.call('HDEL', key, 'slot')
return redis.call('HGETALL', key)
"#;

const FAIL: &str = r#"
local key = KEYS[3]
if redis.call('EXISTS', key) == 0 then
    return {-1, 0, 0}
end

local slot = redis.call('HGET', key, 'slot')
if slot and slot ~= '' then
    return {-2, 0, 0}
end

local now = tonumber(ARGV[2])
local attempts = redis.call('HINCRBY', key, 'attempts', 1)
if ARGV[5] == '1' then
    redis.call('HSET', key, 'last_error', ARGV[4])
end
redis.call('HSET', key, 'updated_at', now)

local max_attempts = tonumber(redis.call('HGET', key, 'max_attempts')) or 1
if attempts >= max_attempts then
    redis.call('RPUSH', KEYS[2], ARGV[1])
    redis.call('HSET', key, 'slot', 'dlq')
    return {1, attempts, 0}
end

local cap = tonumber(ARGV[3])
local delay = cap
if attempts < 53 then
    delay = math.min(cap, 2 ^ attempts)
end
delay = math.floor(delay)
redis.call('ZADD', KEYS[1], now + delay, ARGV[1])
redis.call('HSET', key, 'slot', 'delayed')
return {0, attempts, delay}
"#;

const REQUEUE: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end

local now = tonumber(ARGV[2])
local delay = tonumber(ARGV[3])
local slot = 'main'
if delay > 0 then
    redis.call('ZADD', KEYS[3], now + delay, ARGV[1])
    slot = 'delayed'
else
    redis.call('LPUSH', KEYS[2], ARGV[1])
end

if redis.call('EXISTS', KEYS[4]) == 1 then
    redis.call('HSET', KEYS[4], 'updated_at', now, 'slot', slot)
end
return 1
"#;

const DELETE: &str = r#"
local slot = redis.call('HGET', KEYS[1], 'slot')
if slot == 'main' then
    redis.call('LREM', KEYS[2], 0, ARGV[1])
elseif slot == 'delayed' then
    redis.call('ZREM', KEYS[3], ARGV[1])
elseif slot == 'dlq' then
    redis.call('LREM', KEYS[4], 0, ARGV[1])
end
return redis.call('DEL', KEYS[1])
"#;

const PURGE: &str = r#"
if ARGV[2] then
    local removed = redis.call('LREM', KEYS[1], 1, ARGV[2])
    if removed > 0 then
        redis.call('DEL', ARGV[1] .. ARGV[2])
    end
    return removed
end

local ids = redis.call('LRANGE', KEYS[1], 0, -1)
for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[1] .. id)
end
redis.call('DEL', KEYS[1])
return #ids
"#;

const DEPTHS: &str = r#"
local oldest = -1
local tail = redis.call('LINDEX', KEYS[1], -1)
if tail then
    oldest = tonumber(redis.call('HGET', ARGV[1] .. tail, 'enqueued_at')) or -1
end
return {
    redis.call('LLEN', KEYS[1]),
    redis.call('ZCARD', KEYS[2]),
    redis.call('LLEN', KEYS[3]),
    oldest,
}
"#;

struct Scripts {
    push: Script,
    promote: Script,
    pop: Script,
    delete: Script,
    fail: Script,
    requeue: Script,
    purge: Script,
    depths: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            push: Script::new(PUSH),
            promote: Script::new(PROMOTE),
            pop: Script::new(POP),
            delete: Script::new(DELETE),
            fail: Script::new(FAIL),
            requeue: Script::new(REQUEUE),
            purge: Script::new(PURGE),
            depths: Script::new(DEPTHS),
        }
    }
}

/// Redis-backed queue store, safe to share between any number of
/// producer and consumer processes.
pub struct RedisStore {
    redis: Arc<RedisService>,
    prefix: String,
    scripts: Scripts,
}

impl RedisStore {
    pub fn new(redis: Arc<RedisService>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            scripts: Scripts::load(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn msg_prefix(&self) -> String {
        self.key("msg:")
    }

    fn msg_key(&self, id: MessageId) -> String {
        format!("{}{}", self.msg_prefix(), id)
    }

    async fn invoke<T: redis::FromRedisValue>(
        &self,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> QueueResult<T> {
        Ok(self.redis.run_script(invocation).await?)
    }
}

/// Rebuild a message from a flattened `HGETALL` reply.
fn decode_record(
    fallback_id: Option<MessageId>,
    fields: HashMap<String, String>,
) -> Option<Message> {
    let id = fields
        .get("id")
        .and_then(|raw| raw.parse().ok())
        .or(fallback_id)?;

    let number = |name: &str| -> i64 {
        fields
            .get(name)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    };

    let payload = match fields.get("payload") {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(target: "courier::store", "message {} has an unreadable payload: {}", id, e);
            Value::Object(Default::default())
        }),
        None => Value::Object(Default::default()),
    };

    Some(Message {
        id,
        payload,
        attempts: u32::try_from(number("attempts")).unwrap_or_default(),
        max_attempts: u32::try_from(number("max_attempts")).unwrap_or(1),
        enqueued_at: number("enqueued_at"),
        updated_at: number("updated_at"),
        last_error: fields.get("last_error").cloned(),
    })
}

fn pairs(flat: Vec<String>) -> HashMap<String, String> {
    let mut fields = HashMap::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(name, value);
    }
    fields
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(
        &self,
        message: Message,
        delay_seconds: u64,
        idempotency: Option<IdempotencyKey>,
    ) -> QueueResult<PushOutcome> {
        let payload = serde_json::to_string(&message.payload)?;

        let mut invocation = self.scripts.push.prepare_invoke();
        invocation
            .key(self.key("main"))
            .key(self.key("delayed"))
            .key(self.msg_key(message.id));
        let ttl = match &idempotency {
            Some(key) => {
                invocation.key(self.key(&format!("idem:{}", key.hash)));
                key.ttl_seconds.max(1)
            }
            None => 0,
        };
        invocation
            .arg(message.id.to_string())
            .arg(payload)
            .arg(message.max_attempts)
            .arg(message.enqueued_at)
            .arg(delay_seconds)
            .arg(ttl);

        let (id, duplicate): (String, i64) = self.invoke(&invocation).await?;
        let id = id.parse::<MessageId>().map_err(|e| {
            QueueError::Store(format!("stored idempotency id is invalid: {}", e))
        })?;

        Ok(PushOutcome {
            id,
            duplicate: duplicate == 1,
        })
    }

    async fn promote_due(&self, now: i64) -> QueueResult<u64> {
        let mut invocation = self.scripts.promote.prepare_invoke();
        invocation
            .key(self.key("delayed"))
            .key(self.key("main"))
            .arg(now)
            .arg(self.msg_prefix());
        let promoted: u64 = self.invoke(&invocation).await?;
        if promoted > 0 {
            debug!(target: "courier::store", "promoted {} delayed message(s)", promoted);
        }
        Ok(promoted)
    }

    async fn pop(&self, now: i64) -> QueueResult<Option<Message>> {
        let mut invocation = self.scripts.pop.prepare_invoke();
        invocation
            .key(self.key("main"))
            .arg(self.msg_prefix())
            .arg(now);

        let reply: Option<Vec<String>> = self.invoke(&invocation).await?;
        Ok(reply.and_then(|flat| decode_record(None, pairs(flat))))
    }

    async fn delete(&self, id: MessageId) -> QueueResult<()> {
        let mut invocation = self.scripts.delete.prepare_invoke();
        invocation
            .key(self.msg_key(id))
            .key(self.key("main"))
            .key(self.key("delayed"))
            .key(self.key("dlq"))
            .arg(id.to_string());
        let _: i64 = self.invoke(&invocation).await?;
        Ok(())
    }

    async fn fail(
        &self,
        id: MessageId,
        error: Option<&str>,
        now: i64,
        backoff: BackoffPolicy,
    ) -> QueueResult<FailOutcome> {
        let mut invocation = self.scripts.fail.prepare_invoke();
        invocation
            .key(self.key("delayed"))
            .key(self.key("dlq"))
            .key(self.msg_key(id))
            .arg(id.to_string())
            .arg(now)
            .arg(backoff.cap_seconds)
            .arg(error.unwrap_or_default())
            .arg(if error.is_some() { "1" } else { "0" });

        let (state, attempts, delay): (i64, i64, i64) = self.invoke(&invocation).await?;
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);

        Ok(match state {
            -1 => FailOutcome::Unknown,
            -2 => FailOutcome::NotInFlight,
            1 => FailOutcome::DeadLettered { attempts },
            _ => FailOutcome::Retry {
                attempts,
                delay_seconds: u64::try_from(delay).unwrap_or_default(),
            },
        })
    }

    async fn dead_letters(&self, limit: usize, offset: usize) -> QueueResult<DeadLetterPage> {
        let dlq = self.key("dlq");
        let mut conn = self.redis.get().await?;

        if limit == 0 {
            let total: u64 = redis::cmd("LLEN").arg(&dlq).query_async(&mut *conn).await?;
            return Ok(DeadLetterPage {
                total,
                items: Vec::new(),
            });
        }

        let stop = offset.saturating_add(limit) - 1;
        let (total, ids): (u64, Vec<String>) = redis::pipe()
            .atomic()
            .cmd("LLEN")
            .arg(&dlq)
            .cmd("LRANGE")
            .arg(&dlq)
            .arg(offset)
            .arg(stop)
            .query_async(&mut *conn)
            .await?;

        if ids.is_empty() {
            return Ok(DeadLetterPage {
                total,
                items: Vec::new(),
            });
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HGETALL").arg(format!("{}{}", self.msg_prefix(), id));
        }
        let records: Vec<HashMap<String, String>> = pipe.query_async(&mut *conn).await?;

        let items = ids
            .iter()
            .zip(records)
            .filter(|(_, fields)| !fields.is_empty())
            .filter_map(|(id, fields)| decode_record(id.parse().ok(), fields))
            .collect();

        Ok(DeadLetterPage { total, items })
    }

    async fn requeue(
        &self,
        id: MessageId,
        delay_seconds: u64,
        now: i64,
    ) -> QueueResult<RequeueOutcome> {
        let mut invocation = self.scripts.requeue.prepare_invoke();
        invocation
            .key(self.key("dlq"))
            .key(self.key("main"))
            .key(self.key("delayed"))
            .key(self.msg_key(id))
            .arg(id.to_string())
            .arg(now)
            .arg(delay_seconds);

        let moved: i64 = self.invoke(&invocation).await?;
        Ok(if moved == 1 {
            RequeueOutcome::Requeued { delay_seconds }
        } else {
            RequeueOutcome::Unknown
        })
    }

    async fn purge(&self, id: Option<MessageId>) -> QueueResult<u64> {
        let mut invocation = self.scripts.purge.prepare_invoke();
        invocation.key(self.key("dlq")).arg(self.msg_prefix());
        if let Some(id) = id {
            invocation.arg(id.to_string());
        }
        self.invoke(&invocation).await
    }

    async fn depths(&self) -> QueueResult<Depths> {
        let mut invocation = self.scripts.depths.prepare_invoke();
        invocation
            .key(self.key("main"))
            .key(self.key("delayed"))
            .key(self.key("dlq"))
            .arg(self.msg_prefix());

        let (main, delayed, dead, oldest): (u64, u64, u64, i64) =
            self.invoke(&invocation).await?;

        Ok(Depths {
            main,
            delayed,
            dead,
            oldest_enqueued_at: (oldest >= 0).then_some(oldest),
        })
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
