//! # Dispatcher
//!
//! The sealed application. For every request it looks the route up, builds
//! the [`Context`], runs the middleware chain and the handler, and resolves
//! the handler's [`Outcome`]. It is also the error boundary: a middleware or
//! handler error, or a panic, is classified into a status and handed to the
//! error handler, so recoverable failures never escape.
//!
//! ## Flow
//!
//! ```text
//! Request -> RouteTable::lookup -> Context
//!   Matched          -> before hooks -> handler -> after hooks -> outcome
//!   NotFound         -> error handler (404)
//!   MethodNotAllowed -> Allow header -> error handler (405)
//! ```
//!
//! `dispatch` runs on the calling thread and returns the receiving end of
//! the completion channel; `handle` awaits it.

use crate::codec::{Parser, Renderer};
use crate::context::Context;
use crate::error::{Error, FatalError, HandlerError};
use crate::media::MediaType;
use crate::middleware::MiddlewareResult;
use crate::request::Request;
use crate::response::Response;
use crate::route::{HandlerResult, Outcome, Route};
use crate::router::{MatchOutcome, RouteTable};
use crate::validation::ValidationErrors;
use crate::worker::Workers;
use hyper::header::ALLOW;
use hyper::StatusCode;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Turns an error and its status into a response
pub type ErrorHandler =
    Arc<dyn Fn(&mut Context, &HandlerError, StatusCode) -> Result<(), HandlerError> + Send + Sync>;

/// Maps an error to a status
pub type ErrorClassifier = Arc<dyn Fn(&HandlerError) -> StatusCode + Send + Sync>;

/// Receiving end of a request's completion channel
pub type ResponseHandle = oneshot::Receiver<Response>;

/// Default error handler
///
/// Answers with JSON `{"error", "status", "message"}` when the client accepts
/// JSON, plain text otherwise. Validation errors add an `errors` array.
/// Server errors only expose the status reason.
///
/// # Errors
///
/// Returns an error when the response cannot be sent.
pub fn default_error_handler(
    ctx: &mut Context,
    err: &HandlerError,
    status: StatusCode,
) -> Result<(), HandlerError> {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    if status.is_server_error() {
        error!(
            method = %ctx.method(),
            path = %ctx.path_string(),
            status = status.as_u16(),
            error = %err,
            "Request failed"
        );
    } else {
        debug!(
            method = %ctx.method(),
            path = %ctx.path_string(),
            status = status.as_u16(),
            error = %err,
            "Request rejected"
        );
    }

    let message = if status.is_server_error() {
        reason.to_string()
    } else {
        err.to_string()
    };

    ctx.set_status(status);
    if ctx.accept(&MediaType::JSON) {
        let mut body = serde_json::json!({
            "error": reason,
            "status": status.as_u16(),
            "message": message,
        });
        if let Some(validation) = err.downcast_ref::<ValidationErrors>() {
            let mut details = validation.to_json();
            body["errors"] = details["errors"].take();
        }
        ctx.set_content_type(MediaType::JSON);
        ctx.send_bytes(serde_json::to_vec(&body)?)?;
    } else {
        ctx.set_content_type(MediaType::TEXT);
        ctx.send_string(format!("{} {reason}: {message}", status.as_u16()))?;
    }
    Ok(())
}

/// Sealed routes plus application-wide codecs, error handling and workers
pub struct Dispatcher {
    table: RouteTable,
    parsers: Vec<Arc<dyn Parser>>,
    renderers: Vec<Arc<dyn Renderer>>,
    error_handler: ErrorHandler,
    classifier: ErrorClassifier,
    workers: Workers,
}

impl Dispatcher {
    pub(crate) fn new(
        table: RouteTable,
        parsers: Vec<Arc<dyn Parser>>,
        renderers: Vec<Arc<dyn Renderer>>,
        error_handler: ErrorHandler,
        classifier: ErrorClassifier,
        workers: Workers,
    ) -> Self {
        Self {
            table,
            parsers,
            renderers,
            error_handler,
            classifier,
            workers,
        }
    }

    /// Route table
    #[must_use]
    pub const fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Application-wide parsers
    #[must_use]
    pub fn parsers(&self) -> &[Arc<dyn Parser>] {
        &self.parsers
    }

    /// Application-wide renderers
    #[must_use]
    pub fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.renderers
    }

    /// Application-wide error handler
    #[must_use]
    pub const fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Error classifier
    #[must_use]
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Worker executors
    #[must_use]
    pub const fn workers(&self) -> &Workers {
        &self.workers
    }

    /// Run a request on the calling thread
    ///
    /// Returns once the handler returned or handed the context off; the
    /// response arrives on the returned channel. A fatal error is re-raised
    /// as a panic after its response was sent.
    pub fn dispatch(self: &Arc<Self>, request: Request) -> ResponseHandle {
        let (tx, rx) = oneshot::channel();
        self.dispatch_with(request, tx);
        rx
    }

    /// Like [`Dispatcher::dispatch`], completing into a caller-owned channel
    ///
    /// Lets the caller keep the receiver when a fatal error unwinds out of
    /// this call.
    pub fn dispatch_with(self: &Arc<Self>, request: Request, completion: oneshot::Sender<Response>) {
        let mut ctx = Context::new(request, Arc::clone(self), completion);

        match self.table.lookup(ctx.method(), ctx.path_string()) {
            MatchOutcome::Matched(found) => {
                let route = Arc::clone(&found.route);
                ctx.bind_route(found.route, found.vars);
                run_pipeline(ctx, &route);
            }
            MatchOutcome::NotFound => {
                let path = ctx.path_string().to_string();
                ctx.send_error(Error::RouteNotFound { path }.into());
            }
            MatchOutcome::MethodNotAllowed(allowed) => {
                let allow = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                ctx.set_header(ALLOW.as_str(), &allow);
                let err = Error::MethodNotAllowed {
                    method: ctx.method(),
                    path: ctx.path_string().to_string(),
                    allowed,
                };
                ctx.send_error(err.into());
            }
        }
    }

    /// Run a request and wait for its response
    ///
    /// A context dropped without a response yields `500`.
    pub async fn handle(self: &Arc<Self>, request: Request) -> Response {
        let path = request.path().to_string();
        self.dispatch(request).await.unwrap_or_else(|_| {
            warn!(path = %path, "Request finished without a response");
            Response::status_only(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.table.len())
            .field("parsers", &self.parsers.len())
            .field("renderers", &self.renderers.len())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

/// Run `f`, turning a panic into a fatal error
fn guarded<F: FnOnce() -> HandlerResult>(f: F) -> HandlerResult {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(HandlerError::Fatal(FatalError::from_panic(payload))))
}

fn run_pipeline(mut ctx: Context, route: &Arc<Route>) {
    let result = guarded(|| match route.middleware_chain().run_before(&mut ctx)? {
        MiddlewareResult::Continue => (route.handler())(&mut ctx),
        MiddlewareResult::Respond(outcome) => Ok(outcome),
    });
    resolve(ctx, route, result);
}

fn resolve(mut ctx: Context, route: &Arc<Route>, result: HandlerResult) {
    match result {
        Err(err) => ctx.send_error(err),
        Ok(Outcome::Render(model)) => {
            route.middleware_chain().run_after(&mut ctx);
            if let Err(err) = ctx.render(model) {
                ctx.send_error(err.into());
            }
        }
        Ok(Outcome::Done) => {
            route.middleware_chain().run_after(&mut ctx);
            if !ctx.is_response_started() {
                let status = ctx.status();
                if let Err(err) = ctx.send_status_code(status) {
                    debug!(path = %ctx.path_string(), error = %err, "Implicit response not sent");
                }
            }
        }
        Ok(Outcome::Dispatch { executor, task }) => {
            let Some(target) = ctx.dispatcher().workers().get(executor.as_deref()) else {
                let name = executor.unwrap_or_default();
                ctx.send_error(Error::UnknownExecutor(name).into());
                return;
            };
            debug!(path = %ctx.path_string(), executor = target.name(), "Dispatching to worker");

            let route = Arc::clone(route);
            let leaves_thread = !target.is_inline();
            target.execute(Box::new(move || {
                let mut ctx = ctx;
                if leaves_thread {
                    ctx.set_in_io_thread(false);
                }
                let result = guarded(|| task(&mut ctx));
                resolve(ctx, &route, result);
            }));
        }
        Ok(Outcome::Detach(callback)) => {
            let path = ctx.path_string().to_string();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(ctx))) {
                error!(path = %path, "Detached callback panicked; re-raising");
                resume_unwind(payload);
            }
        }
    }
}
