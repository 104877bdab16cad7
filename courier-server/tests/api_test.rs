//! HTTP surface tests, dispatched in-process.

use courier_core::{Application, HttpRequest, HttpResponse};
use courier_queue::{ManualClock, MemoryStore, Queue};
use courier_server::{AppState, StaticTokenVerifier, build_application};
use serde_json::{Value, json};
use std::sync::Arc;

const TOKEN: &str = "test-token";

struct Harness {
    app: Application,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let queue = Queue::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
    let state = AppState::new(Some(queue), Arc::new(StaticTokenVerifier::new([TOKEN])))
        .with_max_page_size(3);
    Harness {
        app: build_application(Arc::new(state)),
        clock,
    }
}

fn authed(method: &str, path: &str) -> HttpRequest {
    HttpRequest::new(method, path).with_header("Authorization", format!("Bearer {}", TOKEN))
}

async fn call(app: &Application, req: HttpRequest) -> (u16, Value) {
    let resp: HttpResponse = app.dispatch(req).await;
    let body = resp.json().unwrap_or(Value::Null);
    (resp.status, body)
}

async fn post(app: &Application, path: &str, body: Value) -> (u16, Value) {
    call(app, authed("POST", path).with_json(&body).unwrap()).await
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let h = harness();
    let (status, body) = call(&h.app, HttpRequest::new("GET", "/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["store"], "memory");
    assert_eq!(body["data"]["queue_configured"], true);
}

#[tokio::test]
async fn test_queue_routes_require_bearer_token() {
    let h = harness();

    let (status, body) = call(&h.app, HttpRequest::new("POST", "/queue/pop")).await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());

    let req = HttpRequest::new("GET", "/queue/stats").with_header("Authorization", "Bearer wrong");
    let (status, _) = call(&h.app, req).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_unconfigured_queue_answers_503() {
    let state = AppState::new(None, Arc::new(StaticTokenVerifier::new([TOKEN])));
    let app = build_application(Arc::new(state));

    let (status, body) = call(&app, authed("GET", "/queue/stats")).await;
    assert_eq!(status, 503);
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, HttpRequest::new("GET", "/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["queue_configured"], false);
}

#[tokio::test]
async fn test_push_pop_fail_stats_scenario() {
    let h = harness();

    let (status, body) = post(&h.app, "/queue/push", json!({"payload": {"x": 1}})).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = post(&h.app, "/queue/pop", json!({})).await;
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["payload"], json!({"x": 1}));
    assert_eq!(body["data"]["attempts"], 0);

    let (_, body) = post(&h.app, "/queue/fail", json!({"id": id})).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["delay"], 2);

    let (_, body) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(body["data"]["delayed"]["size"], 1);
    assert_eq!(body["data"]["main"]["size"], 0);
    assert!(body["data"]["main"]["oldest_age_seconds"].is_null());

    h.clock.advance(2);
    let (_, body) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(body["data"]["main"]["size"], 1);
    assert_eq!(body["data"]["delayed"]["size"], 0);
}

#[tokio::test]
async fn test_pop_on_empty_queue_returns_null() {
    let h = harness();
    let (status, body) = call(&h.app, authed("POST", "/queue/pop")).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_idempotency_key_header() {
    let h = harness();
    let push = || {
        authed("POST", "/queue/push")
            .with_header("Idempotency-Key", "donation-99")
            .with_json(&json!({"payload": {"amount": 25}}))
            .unwrap()
    };

    let (_, first) = call(&h.app, push()).await;
    let (_, second) = call(&h.app, push()).await;
    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(second["data"]["duplicate"], true);

    let (_, stats) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(stats["data"]["main"]["size"], 1);
}

#[tokio::test]
async fn test_push_validation() {
    let h = harness();

    for body in [
        json!({}),
        json!({"payload": null}),
        json!({"payload": 1, "max_attempts": 0}),
        json!({"payload": 1, "delay_seconds": -3}),
    ] {
        let (status, resp) = post(&h.app, "/queue/push", body.clone()).await;
        assert_eq!(status, 400, "body {} should be rejected", body);
        assert_eq!(resp["success"], false);
    }

    let req = authed("POST", "/queue/push").with_body("{not json");
    let (status, _) = call(&h.app, req).await;
    assert_eq!(status, 400);

    let (_, stats) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(stats["data"]["main"]["size"], 0);
}

#[tokio::test]
async fn test_unknown_ids_are_soft_failures() {
    let h = harness();
    let unknown = "6f1c1b8e-4a3e-4d7e-9a51-0f3f4e1c2b7a";

    for path in ["/queue/fail", "/queue/dlq/requeue", "/queue/dlq/purge"] {
        let (status, body) = post(&h.app, path, json!({"id": unknown})).await;
        assert_eq!(status, 200, "{}", path);
        assert_eq!(body["success"], false, "{}", path);
        assert_eq!(body["message"], "unknown message id");
    }

    let (status, body) = post(&h.app, "/queue/ack", json!({"id": unknown})).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (status, _) = post(&h.app, "/queue/ack", json!({"id": "not-a-uuid"})).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_repeated_fail_is_a_soft_failure() {
    let h = harness();

    let (_, body) = post(&h.app, "/queue/push", json!({"payload": 1, "max_attempts": 2})).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    post(&h.app, "/queue/pop", json!({})).await;

    let (_, body) = post(&h.app, "/queue/fail", json!({"id": id})).await;
    assert_eq!(body["data"]["delay"], 2);

    let (status, body) = post(&h.app, "/queue/fail", json!({"id": id})).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "message is not in flight");

    h.clock.advance(2);
    post(&h.app, "/queue/pop", json!({})).await;
    let (_, body) = post(&h.app, "/queue/fail", json!({"id": id})).await;
    assert_eq!(body["data"]["dlq"], true);
    let (_, body) = post(&h.app, "/queue/fail", json!({"id": id})).await;
    assert_eq!(body["success"], false);

    h.clock.advance(600);
    let (_, body) = post(&h.app, "/queue/pop", json!({})).await;
    assert!(body["data"].is_null());
    let (_, body) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(body["data"]["dlq"]["size"], 1);
}

#[tokio::test]
async fn test_dead_letter_list_requeue_purge() {
    let h = harness();

    let mut ids = Vec::new();
    for n in 0..4 {
        let (_, body) = post(
            &h.app,
            "/queue/push",
            json!({"payload": {"n": n}, "max_attempts": 1}),
        )
        .await;
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
        post(&h.app, "/queue/pop", json!({})).await;
        let (_, body) = post(
            &h.app,
            "/queue/fail",
            json!({"id": ids[n], "error": "HTTP 410"}),
        )
        .await;
        assert_eq!(body["data"]["dlq"], true);
        assert_eq!(body["message"], "moved to dead-letter queue");
    }

    // limit is capped by max_page_size
    let (_, body) = call(&h.app, authed("GET", "/queue/dlq/list?limit=100")).await;
    assert_eq!(body["data"]["total"], 4);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 3);

    let (_, body) = call(&h.app, authed("GET", "/queue/dlq/list?limit=2&offset=1")).await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items[0]["id"], ids[1]);
    assert_eq!(items[0]["last_error"], "HTTP 410");
    assert_eq!(items[1]["id"], ids[2]);

    let (status, _) = call(&h.app, authed("GET", "/queue/dlq/list?limit=-1")).await;
    assert_eq!(status, 400);

    let (_, body) = post(&h.app, "/queue/dlq/requeue", json!({"id": ids[0]})).await;
    assert_eq!(body["data"], json!({"id": ids[0], "delay_seconds": 0}));
    let (_, body) = post(&h.app, "/queue/pop", json!({})).await;
    assert_eq!(body["data"]["id"], ids[0]);
    assert_eq!(body["data"]["attempts"], 1);

    let (_, body) = post(&h.app, "/queue/dlq/purge", json!({"id": ids[1]})).await;
    assert_eq!(body["data"]["purged"], 1);

    let (_, body) = call(&h.app, authed("POST", "/queue/dlq/purge")).await;
    assert_eq!(body["data"]["purged"], 2);

    let (_, body) = call(&h.app, authed("GET", "/queue/stats")).await;
    assert_eq!(body["data"]["dlq"]["size"], 0);
}

#[tokio::test]
async fn test_unknown_route_uses_envelope() {
    let h = harness();
    let (status, body) = call(&h.app, authed("GET", "/queue/nope")).await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
}
