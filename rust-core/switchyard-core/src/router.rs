//! # Router and Route Table
//!
//! [`Router`] is the assembly-time builder: routes, router-wide middleware,
//! codecs, error handling and worker pools are registered on it, then
//! [`Router::build`] seals everything into a [`Dispatcher`]. The sealed
//! [`RouteTable`] only hands out `Arc<Route>`, so nothing can modify a route
//! once requests are being served and lookups need no locking.
//!
//! ## Matching
//!
//! Routes of one method are stably sorted by [`Specificity`] when the table
//! is sealed: static-only patterns first, then patterns with variables, then
//! wildcards. Within one class registration order wins. A lookup returns the
//! first route that matches; when none of the requested method's routes
//! match but another method's do, the outcome is `MethodNotAllowed` listing
//! exactly those methods.
//!
//! [`Specificity`]: crate::pattern::Specificity

use crate::codec::{BytesRenderer, JsonRenderer, Parser, Renderer, TextParser, TextRenderer};
use crate::context::Context;
use crate::dispatch::{default_error_handler, Dispatcher, ErrorClassifier, ErrorHandler};
use crate::error::{default_error_code, Error, HandlerError, Result};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::pattern::{compile, PathVars};
use crate::route::{HandlerResult, Route};
use crate::worker::{Executor, Workers};
use hyper::StatusCode;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP methods supported by the router
///
/// Declaration order is the canonical order used in `Allow` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
    /// HTTP TRACE
    Trace,
    /// HTTP CONNECT
    Connect,
}

impl Method {
    /// Upper-case wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }

    /// Convert from hyper's method type; extension methods are unsupported
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            "CONNECT" => Ok(Self::Connect),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Matching policy applied to every pattern compiled by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterOptions {
    /// `/FOO` and `/foo` are different paths (default: true)
    pub case_sensitive: bool,
    /// `/foo` and `/foo/` are the same path (default: true)
    pub ignore_trailing_slash: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            ignore_trailing_slash: true,
        }
    }
}

impl RouterOptions {
    /// Turn case-sensitive matching on/off
    #[must_use]
    pub const fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    /// Turn trailing-slash folding on/off
    #[must_use]
    pub const fn ignore_trailing_slash(mut self, enabled: bool) -> Self {
        self.ignore_trailing_slash = enabled;
        self
    }
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The winning route
    pub route: Arc<Route>,
    /// Decoded path variables
    pub vars: PathVars,
}

/// Result of [`RouteTable::lookup`]
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// A route of the requested method matched
    Matched(RouteMatch),
    /// Nothing matches the path under any method
    NotFound,
    /// The path matches only under these other methods
    MethodNotAllowed(Vec<Method>),
}

/// Sealed, read-only route table
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Arc<Route>>>,
}

impl RouteTable {
    fn seal(routes: Vec<Route>) -> Self {
        let mut by_method: HashMap<Method, Vec<Arc<Route>>> = HashMap::new();
        let mut seen = HashSet::new();

        for route in routes {
            if !seen.insert((route.method(), route.pattern().raw().to_string())) {
                warn!(
                    method = %route.method(),
                    pattern = %route.pattern(),
                    "Duplicate route; the first registration wins"
                );
            }
            by_method
                .entry(route.method())
                .or_default()
                .push(Arc::new(route));
        }

        for routes in by_method.values_mut() {
            // stable: equal specificity keeps registration order
            routes.sort_by_key(|r| r.pattern().specificity());
        }

        Self { routes: by_method }
    }

    /// Resolve a method and raw path
    #[must_use]
    pub fn lookup(&self, method: Method, path: &str) -> MatchOutcome {
        if let Some(found) = Self::first_match(self.routes.get(&method), path) {
            return MatchOutcome::Matched(found);
        }

        let allowed: Vec<Method> = self
            .allowed_methods(path)
            .into_iter()
            .filter(|m| *m != method)
            .collect();

        if allowed.is_empty() {
            MatchOutcome::NotFound
        } else {
            MatchOutcome::MethodNotAllowed(allowed)
        }
    }

    /// Every method with at least one route matching `path`, in canonical order
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = self
            .routes
            .iter()
            .filter(|(_, routes)| routes.iter().any(|r| r.pattern().matches(path).is_some()))
            .map(|(method, _)| *method)
            .collect();
        methods.sort_unstable();
        methods
    }

    fn first_match(routes: Option<&Vec<Arc<Route>>>, path: &str) -> Option<RouteMatch> {
        routes?.iter().find_map(|route| {
            route.pattern().matches(path).map(|vars| RouteMatch {
                route: Arc::clone(route),
                vars,
            })
        })
    }

    /// All routes, grouped by method in match order
    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.values().flatten()
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes()).finish()
    }
}

/// Assembly-time route registry
pub struct Router {
    options: RouterOptions,
    routes: Vec<Route>,
    middleware: MiddlewareChain,
    parsers: Vec<Arc<dyn Parser>>,
    renderers: Vec<Arc<dyn Renderer>>,
    error_handler: ErrorHandler,
    classifier: ErrorClassifier,
    workers: Workers,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a router with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    /// Create a router with the given matching options
    ///
    /// Registers the text parser and the text, JSON and bytes renderers.
    #[must_use]
    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            options,
            routes: Vec::new(),
            middleware: MiddlewareChain::new(),
            parsers: vec![Arc::new(TextParser)],
            renderers: vec![
                Arc::new(TextRenderer),
                Arc::new(JsonRenderer::new()),
                Arc::new(BytesRenderer),
            ],
            error_handler: Arc::new(default_error_handler),
            classifier: Arc::new(default_error_code),
            workers: Workers::default(),
        }
    }

    /// Matching options
    #[must_use]
    pub const fn options(&self) -> RouterOptions {
        self.options
    }

    /// Register a route with the given method and path pattern
    ///
    /// Returns the route so per-route middleware, codecs and error handling
    /// can be attached.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn add_route<H>(&mut self, method: Method, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        let compiled = compile(
            pattern,
            self.options.case_sensitive,
            self.options.ignore_trailing_slash,
        )?;
        debug!(method = %method, pattern = %compiled, "Route registered");

        self.routes.push(Route::new(method, compiled, Arc::new(handler)));
        let last = self.routes.len() - 1;
        Ok(&mut self.routes[last])
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn get<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(Method::Get, pattern, handler)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn post<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(Method::Post, pattern, handler)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn put<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(Method::Put, pattern, handler)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn delete<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(Method::Delete, pattern, handler)
    }

    /// Register a PATCH route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the pattern is malformed.
    pub fn patch<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route>
    where
        H: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(Method::Patch, pattern, handler)
    }

    /// Add a router-wide middleware; runs before any route-level middleware
    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.add(middleware);
        self
    }

    /// Register a router-wide parser
    pub fn parser<P: Parser + 'static>(&mut self, parser: P) -> &mut Self {
        self.parsers.push(Arc::new(parser));
        self
    }

    /// Register a router-wide renderer, tried after the built-in ones
    pub fn renderer<R: Renderer + 'static>(&mut self, renderer: R) -> &mut Self {
        self.renderers.push(Arc::new(renderer));
        self
    }

    /// Replace the router-wide error handler
    pub fn error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Context, &HandlerError, StatusCode) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Replace the error classification function
    pub fn error_code<F>(&mut self, classifier: F) -> &mut Self
    where
        F: Fn(&HandlerError) -> StatusCode + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Replace the default worker executor
    pub fn worker<E: Executor + 'static>(&mut self, executor: E) -> &mut Self {
        self.workers.set_default(Arc::new(executor));
        self
    }

    /// Register a named worker executor for `Outcome::dispatch_to`
    pub fn executor<E: Executor + 'static>(&mut self, name: impl Into<String>, executor: E) -> &mut Self {
        self.workers.insert(name, Arc::new(executor));
        self
    }

    /// Number of registered routes
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Seal the routes into a read-only table
    ///
    /// Router-wide middleware and codecs are folded into every route.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        let mut routes = self.routes;
        for route in &mut routes {
            route.inherit(&self.middleware, &self.parsers, &self.renderers);
        }
        let table = RouteTable::seal(routes);

        Dispatcher::new(
            table,
            self.parsers,
            self.renderers,
            self.error_handler,
            self.classifier,
            self.workers,
        )
    }
}
