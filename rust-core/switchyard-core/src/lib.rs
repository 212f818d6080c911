//! # Switchyard Core
//!
//! Request routing and dispatch engine for HTTP applications.
//! Matches method and path against registered routes, runs middleware,
//! negotiates body parsing and rendering, and finalizes one response per
//! request, even when the handler hands the request off to another thread.
//!
//! ## Architecture
//!
//! A [`Router`] collects routes, middleware, codecs and executors. Sealing it
//! with [`Router::build`] yields an immutable [`Dispatcher`] that is shared by
//! every connection. Each request gets its own [`Context`], owned by exactly
//! one party at a time; the response travels back over a one-shot channel.
//!
//! ## Modules
//!
//! - `server` - HTTP/1 server built on Hyper
//! - `router` - Route registration, options and the sealed route table
//! - `pattern` - Path pattern compilation and matching
//! - `route` - Route definition and handler outcomes
//! - `dispatch` - Request pipeline and the error boundary
//! - `context` - Per-request exchange: request accessors and response writers
//! - `request` / `response` - Plain request and response values
//! - `middleware` - Before/after hooks around handlers
//! - `codec` / `negotiation` / `media` - Body parsers, renderers and content negotiation
//! - `form` / `value` - Form and multipart data, typed parameter values
//! - `worker` - Executors for work dispatched off the I/O thread
//! - `state` - Typed per-request attributes
//! - `validation` - Structured validation errors
//! - `error` - Error types and status classification

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod form;
pub mod media;
pub mod middleware;
pub mod negotiation;
pub mod pattern;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod state;
pub mod validation;
pub mod value;
pub mod worker;

pub use codec::{
    BytesRenderer, FormParser, JsonParser, JsonRenderer, Model, Parser, Renderer, TextParser,
    TextRenderer,
};
pub use context::Context;
pub use dispatch::{default_error_handler, Dispatcher, ErrorClassifier, ErrorHandler, ResponseHandle};
pub use error::{default_error_code, Error, FatalError, HandlerError, Result, StatusError};
pub use form::{FileUpload, FormData};
pub use media::MediaType;
pub use middleware::{
    CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareResult,
    TimingMiddleware,
};
pub use pattern::{PathVars, RoutePattern};
pub use request::Request;
pub use response::Response;
pub use route::{Handler, HandlerResult, Outcome, Route};
pub use router::{MatchOutcome, Method, RouteMatch, RouteTable, Router, RouterOptions};
pub use server::{Server, ServerConfig};
pub use state::Attributes;
pub use validation::{FieldError, ValidationCode, ValidationErrors};
pub use value::Value;
pub use worker::{BlockingExecutor, Executor, InlineExecutor, ThreadPool, Workers};

pub use hyper::StatusCode;

use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`
///
/// Defaults to `switchyard_core=info`. Does nothing if a global subscriber
/// is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchyard_core=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
