//! HTTP plumbing for Courier: request/response types, a small router and
//! a hyper server with graceful shutdown.

pub mod application;
pub mod error;
pub mod http;
pub mod method;
pub mod routing;

pub use application::{Application, DEFAULT_MAX_BODY_BYTES, ErrorRenderer};
pub use error::Error;
pub use http::{HttpRequest, HttpResponse, Json};
pub use method::HttpMethod;
pub use routing::{HandlerFn, Route, Router, handler};
