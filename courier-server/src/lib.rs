//! HTTP service for the Courier webhook delivery queue.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/health` | unauthenticated |
//! | POST | `/queue/push` | `{payload, max_attempts?, delay_seconds?}` + `Idempotency-Key` |
//! | POST | `/queue/pop` | |
//! | POST | `/queue/ack` | `{id}` |
//! | POST | `/queue/fail` | `{id, error?}` |
//! | GET | `/queue/stats` | |
//! | GET | `/queue/dlq/list` | `?limit&offset` |
//! | POST | `/queue/dlq/requeue` | `{id, delay_seconds?}` |
//! | POST | `/queue/dlq/purge` | `{id?}` |
//!
//! Every `/queue/*` route needs `Authorization: Bearer <token>`. Responses
//! are wrapped as `{success, data, message}`.

pub mod auth;
pub mod envelope;
pub mod routes;
pub mod settings;
pub mod state;

pub use auth::{StaticTokenVerifier, TokenVerifier};
pub use settings::{Settings, StoreKind};
pub use state::AppState;

use courier_core::Application;
use std::sync::Arc;

/// Wire the routes and envelope error rendering into an application.
pub fn build_application(state: Arc<AppState>) -> Application {
    Application::new(routes::router(state))
        .with_error_renderer(Arc::new(envelope::error_response))
}
