//! # HTTP Server
//!
//! HTTP/1 server adapter built on Hyper and Tokio. Feeds connections into a
//! [`Dispatcher`] and writes back whatever arrives on the completion channel.
//!
//! ## Key Features
//!
//! - Graceful shutdown on CTRL+C with a bounded drain period
//! - Request body size limit (413)
//! - Per-request completion timeout (503); the context then sees a closed
//!   connection
//! - Methods outside the supported set answer 501

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// How long a request may take to complete (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP server for one sealed application
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Seal a router and wrap it in a server
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self::from_dispatcher(Arc::new(router.build()))
    }

    /// Serve an already sealed application
    #[must_use]
    pub fn from_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher,
        }
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Set the per-request completion timeout
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.config.request_timeout = timeout;
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The sealed application
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Open the listening socket
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound.
    pub fn listen(&self) -> Result<TcpListener> {
        let addr = self.config.address;
        let bind_error = |source| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        #[cfg(not(windows))]
        {
            socket.set_reuseport(true).map_err(bind_error)?;
        }
        socket.bind(addr).map_err(bind_error)?;
        socket.listen(1024).map_err(bind_error)
    }

    /// Start the server with graceful shutdown on CTRL+C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound, or the
    /// accept error that stopped the loop.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.listen()?;
        self.run(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns the accept error that stopped the loop.
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(address = %addr, routes = self.dispatcher.table().len(), "Server listening");

        let active = Arc::new(AtomicUsize::new(0));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let config = self.config.clone();
                    let keep_alive = config.keep_alive;
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            let config = config.clone();
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let version = req.version();

                                let response = handle_request(req, &dispatcher, &config, remote_addr).await;
                                info!(
                                    remote = %remote_addr,
                                    method = %method,
                                    path = %path,
                                    version = ?version,
                                    status = response.status().as_u16(),
                                    "Request completed"
                                );
                                Ok::<_, Infallible>(response.into_hyper())
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!(remote = %remote_addr, error = %err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with open connections"
            );
        }
        Ok(())
    }

    /// Execute a request directly without network stack
    pub async fn test_request(&self, request: Request) -> Response {
        if request.body().len() > self.config.max_body_size {
            return Response::status_only(StatusCode::PAYLOAD_TOO_LARGE);
        }
        respond(&self.dispatcher, request, self.config.request_timeout).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C handler; shutdown by signal disabled");
        std::future::pending::<()>().await;
    }
}

/// Core request processing logic (network agnostic)
async fn respond(dispatcher: &Arc<Dispatcher>, request: Request, timeout: Duration) -> Response {
    let request = if request.header("x-request-id").is_none() {
        request.with_header("x-request-id", &generate_request_id())
    } else {
        request
    };
    let request_id = request.header("x-request-id").unwrap_or_default().to_string();
    let path = request.path().to_string();

    let (tx, rx) = oneshot::channel();
    if catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch_with(request, tx))).is_err() {
        error!(path = %path, request_id = %request_id, "Fatal error escaped request handling");
    }

    let response = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => {
            warn!(path = %path, request_id = %request_id, "Request finished without a response");
            Response::status_only(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => {
            warn!(path = %path, request_id = %request_id, timeout_ms = timeout.as_millis(), "Request timed out");
            Response::status_only(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    if response.header("x-request-id").is_some() {
        response
    } else {
        response.with_header("x-request-id", &request_id)
    }
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    dispatcher: &Arc<Dispatcher>,
    config: &ServerConfig,
    remote_addr: SocketAddr,
) -> Response {
    match Request::from_hyper_with_limit(req, config.max_body_size).await {
        Ok(request) => {
            respond(dispatcher, request.with_remote_addr(remote_addr), config.request_timeout).await
        }
        Err(e) => {
            let status = match e {
                Error::UnsupportedMethod(_) | Error::PayloadTooLarge { .. } => e.status_code(),
                _ => StatusCode::BAD_REQUEST,
            };
            warn!(remote = %remote_addr, error = %e, status = status.as_u16(), "Rejected request");
            Response::status_only(status)
        }
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Outcome;
    use crate::router::Method;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn app() -> Server {
        let mut router = Router::new();
        router.get("/", |_| Ok(Outcome::render("hello"))).unwrap();
        router
            .get("/hang", |_| Ok(Outcome::detach(|ctx| {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(300));
                    drop(ctx);
                });
            })))
            .unwrap();
        Server::new(router)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_request_gets_request_id() {
        let server = app();
        let resp = server.test_request(Request::new(Method::Get, "/")).await;
        assert_eq!(resp.body_str(), Some("hello"));
        assert!(resp.header("x-request-id").is_some());

        let req = Request::new(Method::Get, "/").with_header("x-request-id", "abc");
        assert_eq!(server.test_request(req).await.header("x-request-id"), Some("abc"));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let mut server = app();
        server.set_max_body_size(4);
        let req = Request::new(Method::Post, "/").with_body("too long");
        assert_eq!(server.test_request(req).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_request_timeout_is_503() {
        let mut server = app();
        server.set_request_timeout(Duration::from_millis(50));
        let resp = server.test_request(Request::new(Method::Get, "/hang")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_fatal_error_still_answers() {
        let mut router = Router::new();
        router.get("/panic", |_| panic!("kaboom")).unwrap();
        let server = Server::new(router);
        let resp = server.test_request(Request::new(Method::Get, "/panic")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_serves_over_tcp_and_shuts_down() {
        let server = Arc::new(app().bind(([127, 0, 0, 1], 0).into()));
        let listener = server.listen().unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            running
                .run(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("hello"));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"BREW / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 501"));

        stop_tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[test]
    fn test_bind_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();

        let server = app().bind(addr);
        // reuseport may let the bind through on some platforms
        if let Err(err) = server.listen() {
            assert!(matches!(err, Error::BindError { .. }));
        }
    }
}
