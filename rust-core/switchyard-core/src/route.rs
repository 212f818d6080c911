//! # Routes and Handler Outcomes
//!
//! A [`Route`] ties one compiled pattern and one method to a handler, plus
//! the per-route middleware, codecs and error-handler override. Routes are
//! mutable only while the [`Router`](crate::Router) builder owns them.
//!
//! Handlers return an [`Outcome`] telling the dispatcher how the request
//! continues:
//!
//! - `Render(model)` - negotiate a renderer and send the model
//! - `Done` - the handler wrote the response itself, or an empty one is sent
//! - `Dispatch` - move the context to a worker executor and run a task there
//! - `Detach` - move the context into a callback that completes it later

use crate::codec::{Model, Parser, Renderer};
use crate::context::Context;
use crate::dispatch::ErrorHandler;
use crate::error::HandlerError;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::pattern::RoutePattern;
use crate::router::Method;
use hyper::StatusCode;
use std::fmt;
use std::sync::Arc;

/// What a handler or task returns
pub type HandlerResult = Result<Outcome, HandlerError>;

/// Request handler
pub type Handler = Arc<dyn Fn(&mut Context) -> HandlerResult + Send + Sync>;

/// Work moved to an executor together with the context
pub type Task = Box<dyn FnOnce(&mut Context) -> HandlerResult + Send>;

/// Callback that takes ownership of a detached context
pub type DetachFn = Box<dyn FnOnce(Context) + Send>;

/// How a request continues after its handler returned
pub enum Outcome {
    /// Render this model through content negotiation
    Render(Model),
    /// Nothing more to do; an empty response is sent if none was
    Done,
    /// Continue on a worker executor (`None` selects the default one)
    Dispatch {
        /// Named executor
        executor: Option<String>,
        /// Work to run with the context
        task: Task,
    },
    /// Ownership of the context leaves the dispatcher
    Detach(DetachFn),
}

impl Outcome {
    /// Render a model
    pub fn render(model: impl Into<Model>) -> Self {
        Self::Render(model.into())
    }

    /// Continue on the default worker executor
    pub fn dispatch<F>(task: F) -> Self
    where
        F: FnOnce(&mut Context) -> HandlerResult + Send + 'static,
    {
        Self::Dispatch {
            executor: None,
            task: Box::new(task),
        }
    }

    /// Continue on a named worker executor
    pub fn dispatch_to<F>(executor: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(&mut Context) -> HandlerResult + Send + 'static,
    {
        Self::Dispatch {
            executor: Some(executor.into()),
            task: Box::new(task),
        }
    }

    /// Hand the context to a callback; the caller completes it later
    pub fn detach<F>(callback: F) -> Self
    where
        F: FnOnce(Context) + Send + 'static,
    {
        Self::Detach(Box::new(callback))
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(model) => f.debug_tuple("Render").field(model).finish(),
            Self::Done => f.write_str("Done"),
            Self::Dispatch { executor, .. } => f
                .debug_struct("Dispatch")
                .field("executor", executor)
                .finish_non_exhaustive(),
            Self::Detach(_) => f.write_str("Detach"),
        }
    }
}

/// One registered route
pub struct Route {
    method: Method,
    pattern: RoutePattern,
    handler: Handler,
    middleware: MiddlewareChain,
    parsers: Vec<Arc<dyn Parser>>,
    renderers: Vec<Arc<dyn Renderer>>,
    error_handler: Option<ErrorHandler>,
}

impl Route {
    pub(crate) fn new(method: Method, pattern: RoutePattern, handler: Handler) -> Self {
        Self {
            method,
            pattern,
            handler,
            middleware: MiddlewareChain::new(),
            parsers: Vec::new(),
            renderers: Vec::new(),
            error_handler: None,
        }
    }

    /// Append a route-level middleware
    pub fn middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.add(middleware);
        self
    }

    /// Register a parser that takes precedence over router-level parsers
    pub fn parser<P: Parser + 'static>(&mut self, parser: P) -> &mut Self {
        self.parsers.push(Arc::new(parser));
        self
    }

    /// Register a renderer that takes precedence over router-level renderers
    pub fn renderer<R: Renderer + 'static>(&mut self, renderer: R) -> &mut Self {
        self.renderers.push(Arc::new(renderer));
        self
    }

    /// Override the router-wide error handler for this route
    pub fn error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Compiled pattern
    #[must_use]
    pub const fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    /// Handler
    #[must_use]
    pub const fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Middleware chain, router-wide entries first once sealed
    #[must_use]
    pub const fn middleware_chain(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Parsers in lookup order
    #[must_use]
    pub fn parsers(&self) -> &[Arc<dyn Parser>] {
        &self.parsers
    }

    /// Renderers in negotiation order
    #[must_use]
    pub fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.renderers
    }

    /// Route-level error handler, if any
    #[must_use]
    pub const fn error_handler_override(&self) -> Option<&ErrorHandler> {
        self.error_handler.as_ref()
    }

    pub(crate) fn inherit(
        &mut self,
        middleware: &MiddlewareChain,
        parsers: &[Arc<dyn Parser>],
        renderers: &[Arc<dyn Renderer>],
    ) {
        let mut chain = middleware.clone();
        chain.extend(&self.middleware);
        self.middleware = chain;

        self.parsers.extend(parsers.iter().cloned());
        self.renderers.extend(renderers.iter().cloned());
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.raw())
            .field("middleware", &self.middleware.len())
            .field("parsers", &self.parsers.len())
            .field("renderers", &self.renderers.len())
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonParser, TextParser, TextRenderer};
    use crate::middleware::{LoggingMiddleware, TimingMiddleware};
    use crate::pattern::compile;

    fn route(pattern: &str) -> Route {
        let compiled = compile(pattern, true, true).unwrap();
        let handler: Handler = Arc::new(|_: &mut Context| Ok(Outcome::Done));
        Route::new(Method::Get, compiled, handler)
    }

    #[test]
    fn test_route_accessors() {
        let r = route("/users/:id");
        assert_eq!(r.method(), Method::Get);
        assert_eq!(r.pattern().raw(), "/users/:id");
        assert!(r.middleware_chain().is_empty());
        assert!(r.error_handler_override().is_none());
    }

    #[test]
    fn test_inherit_puts_router_middleware_first() {
        let mut r = route("/");
        r.middleware(TimingMiddleware::new());

        let mut router_chain = MiddlewareChain::new();
        router_chain.add(LoggingMiddleware::new());
        r.inherit(&router_chain, &[], &[]);

        let names: Vec<_> = r.middleware_chain().names().collect();
        assert_eq!(names, vec!["LoggingMiddleware", "TimingMiddleware"]);
    }

    #[test]
    fn test_route_codecs_take_precedence() {
        let mut r = route("/");
        r.parser(JsonParser);

        let router_parsers: Vec<Arc<dyn Parser>> = vec![Arc::new(TextParser)];
        let router_renderers: Vec<Arc<dyn Renderer>> = vec![Arc::new(TextRenderer)];
        r.inherit(&MiddlewareChain::new(), &router_parsers, &router_renderers);

        let media: Vec<_> = r.parsers().iter().map(|p| p.media_type().essence().to_string()).collect();
        assert_eq!(media, vec!["application/json", "text/plain"]);
        assert_eq!(r.renderers().len(), 1);
    }

    #[test]
    fn test_outcome_debug() {
        assert_eq!(format!("{:?}", Outcome::Done), "Done");
        let outcome = Outcome::dispatch_to("io", |_| Ok(Outcome::Done));
        assert!(format!("{outcome:?}").contains("io"));
        assert_eq!(format!("{:?}", Outcome::render("hi")), r#"Render(Text("hi"))"#);
    }
}
