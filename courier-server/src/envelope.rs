//! Uniform response body: `{success, data, message}`.

use courier_core::{Error, HttpResponse};
use courier_queue::QueueError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

/// 200 with `success: true`.
pub fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Result<HttpResponse, Error> {
    HttpResponse::ok().with_json(&Envelope {
        success: true,
        data: Some(data),
        message: message.into(),
    })
}

/// 200 with `success: false`: the request was valid but had no effect.
pub fn soft_failure(message: impl Into<String>) -> Result<HttpResponse, Error> {
    HttpResponse::ok().with_json(&Envelope::<Value> {
        success: false,
        data: None,
        message: message.into(),
    })
}

/// Error renderer installed on the application.
pub fn error_response(err: &Error) -> HttpResponse {
    let body = Envelope::<Value> {
        success: false,
        data: None,
        message: err.detail(),
    };
    HttpResponse::new(err.status_code())
        .with_json(&body)
        .unwrap_or_else(|_| HttpResponse::internal_server_error())
}

/// Map queue errors onto HTTP errors.
pub fn queue_error(err: QueueError) -> Error {
    match err {
        QueueError::StoreUnavailable(m) => {
            Error::ServiceUnavailable(format!("queue store unavailable: {}", m))
        }
        QueueError::Validation(m) => Error::Validation(m),
        other => Error::Internal(other.to_string()),
    }
}
