//! Queue HTTP handlers.

use crate::auth::authorize;
use crate::envelope::{self, queue_error};
use crate::state::AppState;
use courier_core::{Error, HttpRequest, HttpResponse, Router, handler};
use courier_queue::{FailOutcome, MessageId, PushRequest, Queue, RequeueOutcome};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Page size when `limit` is omitted.
const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct PushBody {
    payload: Option<Value>,
    max_attempts: Option<i64>,
    delay_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FailBody {
    id: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequeueBody {
    id: String,
    delay_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PurgeBody {
    id: Option<String>,
}

/// Build the router for every endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    let s = state.clone();
    router.get("/health", handler(move |_req| health(s.clone())));

    let s = state.clone();
    router.post("/queue/push", handler(move |req| push(s.clone(), req)));
    let s = state.clone();
    router.post("/queue/pop", handler(move |req| pop(s.clone(), req)));
    let s = state.clone();
    router.post("/queue/ack", handler(move |req| ack(s.clone(), req)));
    let s = state.clone();
    router.post("/queue/fail", handler(move |req| fail(s.clone(), req)));
    let s = state.clone();
    router.get("/queue/stats", handler(move |req| stats(s.clone(), req)));
    let s = state.clone();
    router.get("/queue/dlq/list", handler(move |req| dlq_list(s.clone(), req)));
    let s = state.clone();
    router.post("/queue/dlq/requeue", handler(move |req| dlq_requeue(s.clone(), req)));
    let s = state;
    router.post("/queue/dlq/purge", handler(move |req| dlq_purge(s.clone(), req)));

    router
}

/// Authorize, then hand back the queue or a 503.
async fn guard<'a>(state: &'a AppState, req: &HttpRequest) -> Result<&'a Queue, Error> {
    authorize(state.verifier.as_ref(), req).await?;
    state
        .queue
        .as_ref()
        .ok_or_else(|| Error::ServiceUnavailable("queue store is not configured".to_string()))
}

fn parse_id(raw: &str) -> Result<MessageId, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid message id '{}'", raw)))
}

fn query_usize(req: &HttpRequest, name: &str) -> Result<Option<usize>, Error> {
    match req.query(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Validation(format!("{} must be a non-negative integer", name))),
    }
}

async fn health(state: Arc<AppState>) -> Result<HttpResponse, Error> {
    let store = state.queue.as_ref().map(Queue::store_type);
    envelope::ok(
        json!({
            "status": "ok",
            "queue_configured": store.is_some(),
            "store": store,
        }),
        "ok",
    )
}

async fn push(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let body: PushBody = req.json()?;

    let payload = body
        .payload
        .ok_or_else(|| Error::Validation("payload is required".to_string()))?;

    let mut request = PushRequest::new(payload);
    request.max_attempts = body.max_attempts;
    request.delay_seconds = body.delay_seconds;
    request.idempotency_key = req.header("idempotency-key").map(str::to_string);

    let outcome = queue.push(request).await.map_err(queue_error)?;
    let message = if outcome.duplicate {
        "duplicate, existing message returned"
    } else {
        "queued"
    };

    envelope::ok(json!({"id": outcome.id, "duplicate": outcome.duplicate}), message)
}

async fn pop(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;

    match queue.pop().await.map_err(queue_error)? {
        Some(message) => envelope::ok(message, "ok"),
        None => envelope::ok(Value::Null, "no message available"),
    }
}

async fn ack(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let body: IdBody = req.json()?;
    let id = parse_id(&body.id)?;

    queue.ack(id).await.map_err(queue_error)?;
    envelope::ok(Value::Null, "acknowledged")
}

async fn fail(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let body: FailBody = req.json()?;
    let id = parse_id(&body.id)?;

    match queue
        .fail(id, body.error.as_deref())
        .await
        .map_err(queue_error)?
    {
        FailOutcome::Retry { delay_seconds, .. } => {
            envelope::ok(json!({"delay": delay_seconds}), "retry scheduled")
        }
        FailOutcome::DeadLettered { .. } => {
            envelope::ok(json!({"dlq": true}), "moved to dead-letter queue")
        }
        FailOutcome::Unknown => envelope::soft_failure("unknown message id"),
        FailOutcome::NotInFlight => envelope::soft_failure("message is not in flight"),
    }
}

async fn stats(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let stats = queue.stats().await.map_err(queue_error)?;
    envelope::ok(stats, "ok")
}

async fn dlq_list(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let limit = query_usize(&req, "limit")?
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(state.max_page_size);
    let offset = query_usize(&req, "offset")?.unwrap_or(0);

    let page = queue
        .dead_letters(limit, offset)
        .await
        .map_err(queue_error)?;
    envelope::ok(json!({"total": page.total, "items": page.items}), "ok")
}

async fn dlq_requeue(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let body: RequeueBody = req.json()?;
    let id = parse_id(&body.id)?;

    match queue
        .requeue(id, body.delay_seconds)
        .await
        .map_err(queue_error)?
    {
        RequeueOutcome::Requeued { delay_seconds } => envelope::ok(
            json!({"id": id, "delay_seconds": delay_seconds}),
            "requeued",
        ),
        RequeueOutcome::Unknown => envelope::soft_failure("unknown message id"),
    }
}

async fn dlq_purge(state: Arc<AppState>, req: HttpRequest) -> Result<HttpResponse, Error> {
    let queue = guard(&state, &req).await?;
    let body: PurgeBody = req.json_or_empty()?;
    let id = body
        .id
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_id)
        .transpose()?;

    let purged = queue.purge(id).await.map_err(queue_error)?;
    if id.is_some() && purged == 0 {
        return envelope::soft_failure("unknown message id");
    }
    envelope::ok(json!({"purged": purged}), "purged")
}
