//! # Middleware System
//!
//! Request interception for logging, timing, CORS, etc.
//!
//! Router-wide middleware runs before route-level middleware. `before` hooks
//! run in registration order ahead of the handler; any of them may halt the
//! chain by returning [`MiddlewareResult::Respond`]. `after` hooks run in
//! reverse order once the handler (or a dispatched task) returned, before the
//! dispatcher sends its implicit response.

use crate::context::Context;
use crate::error::HandlerError;
use crate::route::Outcome;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Middleware trait for request interception
pub trait Middleware: Send + Sync {
    /// Called before the request handler
    ///
    /// Can inspect or modify the context, or halt the chain.
    ///
    /// # Errors
    ///
    /// An error halts the chain and goes to the error handler.
    fn before(&self, _ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
        Ok(MiddlewareResult::Continue)
    }

    /// Called after the request handler
    fn after(&self, _ctx: &mut Context) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of a `before` hook
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// Skip the rest of the chain and the handler, finishing with this outcome
    Respond(Outcome),
}

/// Ordered middleware list
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Append every middleware of another chain
    pub fn extend(&mut self, other: &Self) {
        self.middlewares.extend(other.middlewares.iter().cloned());
    }

    /// Run `before` hooks in order, stopping at the first that halts
    ///
    /// # Errors
    ///
    /// Returns the first error a hook raised.
    pub fn run_before(&self, ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
        for mw in &self.middlewares {
            match mw.before(ctx)? {
                MiddlewareResult::Continue => {}
                halt @ MiddlewareResult::Respond(_) => {
                    debug!(middleware = mw.name(), "Middleware halted the chain");
                    return Ok(halt);
                }
            }
        }
        Ok(MiddlewareResult::Continue)
    }

    /// Run `after` hooks in reverse order
    pub fn run_after(&self, ctx: &mut Context) {
        for mw in self.middlewares.iter().rev() {
            mw.after(ctx);
        }
    }

    /// Middleware names in execution order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.middlewares.iter().map(|mw| mw.name())
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Logging middleware - logs requests as structured events
#[derive(Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn before(&self, ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
        let request_id = ctx.header("x-request-id").value_or("-").to_string();
        if self.log_headers {
            info!(
                method = %ctx.method(),
                path = %ctx.path_string(),
                request_id = %request_id,
                headers = ?ctx.header_map(),
                "Request received"
            );
        } else {
            info!(
                method = %ctx.method(),
                path = %ctx.path_string(),
                request_id = %request_id,
                "Request received"
            );
        }
        Ok(MiddlewareResult::Continue)
    }

    fn after(&self, ctx: &mut Context) {
        let request_id = ctx.header("x-request-id").value_or("-").to_string();
        info!(
            method = %ctx.method(),
            path = %ctx.path_string(),
            status = ctx.status().as_u16(),
            request_id = %request_id,
            "Request handled"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// Start instant stored in the context by [`TimingMiddleware`]
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Timing middleware - measures handler duration
///
/// Adds a `Server-Timing` header when the response has not been sent yet.
#[derive(Debug, Default)]
pub struct TimingMiddleware;

impl TimingMiddleware {
    /// Create a new timing middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for TimingMiddleware {
    fn before(&self, ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
        ctx.set_attribute(RequestStart(Instant::now()));
        Ok(MiddlewareResult::Continue)
    }

    fn after(&self, ctx: &mut Context) {
        let Some(RequestStart(start)) = ctx.remove_attribute::<RequestStart>() else {
            return;
        };
        let duration = start.elapsed();
        debug!(
            method = %ctx.method(),
            path = %ctx.path_string(),
            duration_ms = %duration.as_millis(),
            "Request timing"
        );
        if !ctx.is_response_started() {
            let value = format!("app;dur={:.3}", duration.as_secs_f64() * 1000.0);
            ctx.set_header("server-timing", &value);
        }
    }

    fn name(&self) -> &'static str {
        "TimingMiddleware"
    }
}

/// CORS middleware - adds Cross-Origin Resource Sharing headers
///
/// Headers are staged in `before`, so they go out with whatever response
/// the handler sends.
#[derive(Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
        ctx.set_header("access-control-allow-origin", &self.allow_origin);
        ctx.set_header("access-control-allow-methods", &self.allow_methods);
        ctx.set_header("access-control-allow-headers", &self.allow_headers);
        Ok(MiddlewareResult::Continue)
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::request::Request;
    use crate::router::Method;
    use hyper::StatusCode;

    struct Halt;

    impl Middleware for Halt {
        fn before(&self, ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
            ctx.set_status(StatusCode::FORBIDDEN);
            Ok(MiddlewareResult::Respond(Outcome::Done))
        }

        fn name(&self) -> &'static str {
            "Halt"
        }
    }

    struct Fails;

    impl Middleware for Fails {
        fn before(&self, _ctx: &mut Context) -> Result<MiddlewareResult, HandlerError> {
            Err(HandlerError::msg("nope"))
        }
    }

    fn ctx() -> Context {
        Context::detached(Request::new(Method::Get, "/mw"))
    }

    #[test]
    fn test_middleware_chain_empty() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_middleware_chain_add() {
        let mut chain = MiddlewareChain::new();
        chain.add(LoggingMiddleware::new());
        chain.add(TimingMiddleware::new());

        assert!(!chain.is_empty());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["LoggingMiddleware", "TimingMiddleware"]);
    }

    #[test]
    fn test_halting_middleware_stops_chain() {
        let mut chain = MiddlewareChain::new();
        chain.add(Halt);
        chain.add(Fails);

        let mut ctx = ctx();
        let result = chain.run_before(&mut ctx).unwrap();
        assert!(matches!(result, MiddlewareResult::Respond(Outcome::Done)));
        assert_eq!(ctx.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_failing_middleware_propagates() {
        let mut chain = MiddlewareChain::new();
        chain.add(Fails);
        chain.add(Halt);

        let mut ctx = ctx();
        assert!(chain.run_before(&mut ctx).is_err());
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[test]
    fn test_timing_sets_server_timing_header() {
        let mut chain = MiddlewareChain::new();
        chain.add(TimingMiddleware::new());

        let mut ctx = ctx();
        chain.run_before(&mut ctx).unwrap();
        assert!(ctx.attribute::<RequestStart>().is_some());

        chain.run_after(&mut ctx);
        assert!(ctx.attribute::<RequestStart>().is_none());
        assert!(ctx.response_header("server-timing").is_some_and(|v| v.starts_with("app;dur=")));
    }

    #[test]
    fn test_cors_middleware_default() {
        let mw = CorsMiddleware::new();
        assert_eq!(mw.origin(), "*");
    }

    #[test]
    fn test_cors_middleware_stages_headers() {
        let mw = CorsMiddleware::new().allow_origin("https://example.com");
        let mut ctx = ctx();
        mw.before(&mut ctx).unwrap();
        assert_eq!(ctx.response_header("access-control-allow-origin"), Some("https://example.com"));
    }
}
