// HTTP server

use crate::{Error, HttpRequest, HttpResponse, Router};
use courier_log::{debug, error, info, warn};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Turns a routing or handler error into a response.
pub type ErrorRenderer = Arc<dyn Fn(&Error) -> HttpResponse + Send + Sync>;

/// Default request body limit (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// The HTTP application: a router plus server settings.
#[derive(Clone)]
pub struct Application {
    router: Arc<Router>,
    error_renderer: ErrorRenderer,
    max_body_bytes: usize,
    shutdown_timeout: Duration,
}

impl Application {
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            error_renderer: Arc::new(default_error_response),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_error_renderer(mut self, renderer: ErrorRenderer) -> Self {
        self.error_renderer = renderer;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// How long in-flight connections may drain after shutdown starts.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Route a request and render any error as a response.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        let method = request.method.clone();
        let path = request.path.clone();

        match self.router.route(request).await {
            Ok(resp) => {
                debug!("{} {} -> {}", method, path, resp.status);
                resp
            }
            Err(err) => {
                if err.is_server_error() {
                    error!("{} {} failed: {}", method, path, err);
                } else {
                    debug!("{} {} rejected: {}", method, path, err);
                }
                (self.error_renderer)(&err)
            }
        }
    }

    /// Serve until ctrl-c.
    pub async fn listen(self, addr: SocketAddr) -> Result<(), Error> {
        self.listen_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `signal` resolves, then stop accepting and let open
    /// connections finish.
    pub async fn listen_with_shutdown(
        self,
        addr: SocketAddr,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on http://{}", listener.local_addr()?);
        self.serve(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let graceful = GracefulShutdown::new();
        let app = Arc::new(self);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let service_app = app.clone();
                    let service = service_fn(move |req: Request<IncomingBody>| {
                        let app = service_app.clone();
                        async move { Ok::<_, Infallible>(app.handle(req).await) }
                    });

                    let conn = graceful.watch(http1::Builder::new().serve_connection(io, service));
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            debug!("connection from {} ended with error: {}", peer, err);
                        }
                    });
                }
                _ = &mut signal => {
                    info!("shutdown signal received, draining connections");
                    break;
                }
            }
        }

        drop(listener);
        tokio::select! {
            _ = graceful.shutdown() => info!("all connections closed"),
            _ = tokio::time::sleep(app.shutdown_timeout) => {
                warn!(
                    "timed out after {:?} waiting for connections to close",
                    app.shutdown_timeout
                );
            }
        }

        Ok(())
    }

    async fn handle(&self, req: Request<IncomingBody>) -> Response<Full<bytes::Bytes>> {
        let method = req.method().to_string();
        let path = match req.uri().path_and_query() {
            Some(pq) => pq.as_str().to_string(),
            None => req.uri().path().to_string(),
        };

        let mut request = HttpRequest::new(method, path);
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                request.headers.insert(name.to_string(), value.to_string());
            }
        }

        let response = match Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(body) => {
                request.body = body.to_bytes().to_vec();
                self.dispatch(request).await
            }
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                (self.error_renderer)(&Error::PayloadTooLarge(format!(
                    "body exceeds {} bytes",
                    self.max_body_bytes
                )))
            }
            Err(e) => (self.error_renderer)(&Error::BadRequest(e.to_string())),
        };

        into_hyper(response)
    }
}

fn default_error_response(err: &Error) -> HttpResponse {
    let status = err.status_code();
    let body = serde_json::json!({
        "error": err.to_string(),
        "status": status,
    });
    HttpResponse::new(status)
        .with_json(&body)
        .unwrap_or_else(|_| HttpResponse::internal_server_error())
}

fn into_hyper(response: HttpResponse) -> Response<Full<bytes::Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }

    builder
        .body(Full::new(bytes::Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!("invalid response: {}", e);
            let mut fallback = Response::new(Full::new(bytes::Bytes::new()));
            *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::handler;
    use serde_json::{Value, json};

    fn app() -> Application {
        let mut router = Router::new();
        router.get(
            "/health",
            handler(|_req| async { HttpResponse::ok().with_json(&json!({"status": "ok"})) }),
        );
        router.get(
            "/down",
            handler(|_req| async { Err(Error::ServiceUnavailable("no store".into())) }),
        );
        Application::new(router)
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let resp = app().dispatch(HttpRequest::new("GET", "/health")).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_dispatch_renders_errors() {
        let resp = app().dispatch(HttpRequest::new("GET", "/down")).await;
        assert_eq!(resp.status, 503);
        let body: Value = resp.json().unwrap();
        assert_eq!(body["status"], 503);

        let resp = app().dispatch(HttpRequest::new("GET", "/nope")).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_custom_error_renderer() {
        let app = app().with_error_renderer(Arc::new(|err| {
            HttpResponse::new(err.status_code()).with_body(err.detail().into_bytes())
        }));
        let resp = app.dispatch(HttpRequest::new("GET", "/down")).await;
        assert_eq!(resp.body, b"no store");
    }

    #[tokio::test]
    async fn test_serve_stops_on_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(app().serve(listener, async {
            rx.await.ok();
        }));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
