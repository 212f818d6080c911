//! # Request Context
//!
//! One [`Context`] exists per request. It carries the request, the matched
//! route and its decoded path variables, the pending response state and the
//! completion channel back to the connection. Exactly one execution unit
//! owns it at a time: it moves into a worker job on dispatch and into the
//! callback on detach, and is never shared.
//!
//! ## Response rules
//!
//! - A response is sent at most once; later sends fail with
//!   `Error::ResponseStarted`.
//! - When the connection side has gone away (client disconnect or request
//!   timeout), sends fail with an I/O error of kind `ConnectionAborted`.
//! - Status, headers and content type are staged until the response is sent.

use crate::codec::{Model, Parser, Renderer};
use crate::dispatch::Dispatcher;
use crate::error::{Error, HandlerError, Result};
use crate::form::{FileUpload, FormData};
use crate::media::MediaType;
use crate::negotiation::{self, Rendered};
use crate::pattern::PathVars;
use crate::request::Request;
use crate::response::Response;
use crate::route::Route;
use crate::router::Method;
use crate::state::Attributes;
use crate::value::Value;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, warn};

/// Per-request state shared by middleware and the handler
pub struct Context {
    request: Request,
    route: Option<Arc<Route>>,
    vars: PathVars,
    status: StatusCode,
    headers: HeaderMap,
    content_type: Option<MediaType>,
    default_content_type: MediaType,
    started: bool,
    in_io_thread: bool,
    attributes: Attributes,
    form: OnceCell<FormData>,
    completion: Option<oneshot::Sender<Response>>,
    dispatcher: Arc<Dispatcher>,
}

impl Context {
    pub(crate) fn new(
        request: Request,
        dispatcher: Arc<Dispatcher>,
        completion: oneshot::Sender<Response>,
    ) -> Self {
        Self {
            request,
            route: None,
            vars: PathVars::new(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content_type: None,
            default_content_type: MediaType::TEXT,
            started: false,
            in_io_thread: true,
            attributes: Attributes::new(),
            form: OnceCell::new(),
            completion: Some(completion),
            dispatcher,
        }
    }

    pub(crate) fn bind_route(&mut self, route: Arc<Route>, vars: PathVars) {
        self.route = Some(route);
        self.vars = vars;
    }

    pub(crate) fn set_in_io_thread(&mut self, value: bool) {
        self.in_io_thread = value;
    }

    pub(crate) const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // ---------------------------------------------------------------------
    // Request side
    // ---------------------------------------------------------------------

    /// Request method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.request.method()
    }

    /// Raw request path
    #[must_use]
    pub fn path_string(&self) -> &str {
        self.request.path()
    }

    /// The underlying request
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Matched route; `None` for 404/405 handling
    #[must_use]
    pub const fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Path variable
    #[must_use]
    pub fn path(&self, name: &str) -> Value {
        self.vars
            .get(name)
            .map_or_else(|| Value::missing(name), |v| Value::single(name, v.clone()))
    }

    /// All path variables
    #[must_use]
    pub const fn path_map(&self) -> &PathVars {
        &self.vars
    }

    /// Query parameter (all occurrences)
    #[must_use]
    pub fn query(&self, name: &str) -> Value {
        let values = self
            .request
            .query_pairs()
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .collect();
        Value::multiple(name, values)
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.request.query_string()
    }

    /// Query parameters grouped by name
    #[must_use]
    pub fn query_map(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in self.request.query_pairs() {
            map.entry(k.clone()).or_default().push(v.clone());
        }
        map
    }

    /// Request header (all occurrences)
    #[must_use]
    pub fn header(&self, name: &str) -> Value {
        let values = self
            .request
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect();
        Value::multiple(name, values)
    }

    /// Request headers
    #[must_use]
    pub const fn header_map(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Whether the client's `Accept` header admits `media_type`
    #[must_use]
    pub fn accept(&self, media_type: &MediaType) -> bool {
        negotiation::accept(self.request.header(ACCEPT.as_str()), media_type)
    }

    /// Request `Content-Type`, if present and well-formed
    #[must_use]
    pub fn content_type(&self) -> Option<MediaType> {
        self.request
            .header(CONTENT_TYPE.as_str())
            .and_then(|v| MediaType::parse(v).ok())
    }

    /// Declared `Content-Length`, if any
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.request
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    fn form_data(&self) -> Result<&FormData> {
        if let Some(form) = self.form.get() {
            return Ok(form);
        }
        let parsed = FormData::parse(self.content_type().as_ref(), self.request.body())?;
        Ok(self.form.get_or_init(|| parsed))
    }

    /// Form field from a urlencoded or multipart body
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body does not decode.
    pub fn form(&self, name: &str) -> Result<Value> {
        Ok(self.form_data()?.field(name))
    }

    /// Form fields as a JSON object
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body does not decode.
    pub fn form_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(self.form_data()?.to_map())
    }

    /// Text field of a multipart body
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body does not decode.
    pub fn multipart(&self, name: &str) -> Result<Value> {
        self.form(name)
    }

    /// Uploaded files of a multipart body
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body does not decode.
    pub fn files(&self) -> Result<&[FileUpload]> {
        Ok(self.form_data()?.files())
    }

    /// Uploaded file by field name
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingValue` when there is no such file.
    pub fn file(&self, name: &str) -> Result<&FileUpload> {
        self.form_data()?.file(name).ok_or_else(|| Error::MissingValue {
            name: name.to_string(),
        })
    }

    /// Raw body
    #[must_use]
    pub const fn body_bytes(&self) -> &Bytes {
        self.request.body()
    }

    /// Body as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body is not UTF-8.
    pub fn body_text(&self) -> Result<&str> {
        std::str::from_utf8(self.request.body()).map_err(|e| Error::MalformedBody {
            media_type: MediaType::TEXT.essence().to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode the body with the parser negotiated from `Content-Type`
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedMediaType` when no parser handles the
    /// content type, `Error::MalformedBody` when parsing fails and
    /// `Error::Json` when the value does not fit `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        let content_type = self.request.header(CONTENT_TYPE.as_str());
        let parser = negotiation::parser_for(self.parsers(), content_type)?;
        let value = parser.parse(self.request.body())?;
        Ok(serde_json::from_value(value)?)
    }

    /// Parser registered for `media_type`
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedMediaType` when none is registered.
    pub fn parser(&self, media_type: &MediaType) -> Result<Arc<dyn Parser>> {
        self.parsers()
            .iter()
            .find(|p| p.media_type().same_essence(media_type))
            .cloned()
            .ok_or_else(|| Error::UnsupportedMediaType(media_type.to_string()))
    }

    fn parsers(&self) -> &[Arc<dyn Parser>] {
        self.route
            .as_ref()
            .map_or_else(|| self.dispatcher.parsers(), |r| r.parsers())
    }

    fn renderers(&self) -> &[Arc<dyn Renderer>] {
        self.route
            .as_ref()
            .map_or_else(|| self.dispatcher.renderers(), |r| r.renderers())
    }

    /// Whether this code runs on the thread that accepted the request
    #[must_use]
    pub const fn is_in_io_thread(&self) -> bool {
        self.in_io_thread
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    /// Store a typed request attribute
    pub fn set_attribute<T: Send + 'static>(&mut self, value: T) -> &mut Self {
        self.attributes.insert(value);
        self
    }

    /// Typed request attribute
    #[must_use]
    pub fn attribute<T: Send + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    /// Take a typed request attribute out
    pub fn remove_attribute<T: Send + 'static>(&mut self) -> Option<T> {
        self.attributes.remove::<T>()
    }

    // ---------------------------------------------------------------------
    // Response side
    // ---------------------------------------------------------------------

    /// Stage the response status
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Staged response status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stage a response header; invalid names or values are ignored
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                self.headers.insert(n, v);
            }
            _ => warn!(header = %name, "Ignoring invalid response header"),
        }
        self
    }

    /// Staged response header
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Explicit response content type; wins over negotiation
    pub fn set_content_type(&mut self, media_type: MediaType) -> &mut Self {
        self.content_type = Some(media_type);
        self
    }

    /// Content type for `send_string` when none was set explicitly
    pub fn set_default_content_type(&mut self, media_type: MediaType) -> &mut Self {
        self.default_content_type = media_type;
        self
    }

    /// Render a model with the negotiated renderer and send it
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingRenderer` when no renderer handles the model,
    /// plus the errors of [`Context::send_bytes`].
    pub fn render(&mut self, model: impl Into<Model>) -> Result<()> {
        let model = model.into();
        let accept = self.request.header(ACCEPT.as_str());
        let Rendered { media_type, body } = match &self.route {
            Some(route) => negotiation::select_renderer(route, &model, accept)?,
            None => negotiation::render_with(self.dispatcher.renderers(), &model, accept)?,
        };
        let media_type = self.content_type.take().unwrap_or(media_type);
        self.send(media_type, body)
    }

    /// Send a text body
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseStarted` on a second send and an I/O error
    /// when the connection is gone.
    pub fn send_string(&mut self, body: impl Into<String>) -> Result<()> {
        let media_type = self
            .content_type
            .take()
            .unwrap_or_else(|| self.default_content_type.clone());
        self.send(media_type, Bytes::from(body.into()))
    }

    /// Send a binary body (`application/octet-stream` unless set)
    ///
    /// # Errors
    ///
    /// See [`Context::send_string`].
    pub fn send_bytes(&mut self, body: impl Into<Bytes>) -> Result<()> {
        let media_type = self.content_type.take().unwrap_or(MediaType::OCTET_STREAM);
        self.send(media_type, body.into())
    }

    /// Send an empty response with `status`
    ///
    /// # Errors
    ///
    /// See [`Context::send_string`].
    pub fn send_status_code(&mut self, status: StatusCode) -> Result<()> {
        self.status = status;
        self.complete(Response::new(status))
    }

    /// Redirect with `302 Found`
    ///
    /// # Errors
    ///
    /// See [`Context::send_string`].
    pub fn send_redirect(&mut self, location: &str) -> Result<()> {
        self.send_redirect_with(StatusCode::FOUND, location)
    }

    /// Redirect with an explicit 3xx status
    ///
    /// # Errors
    ///
    /// See [`Context::send_string`].
    pub fn send_redirect_with(&mut self, status: StatusCode, location: &str) -> Result<()> {
        self.set_header(LOCATION.as_str(), location);
        self.send_status_code(status)
    }

    /// Answer with an error through the error handler
    ///
    /// The status comes from the application's error classifier.
    pub fn send_error(&mut self, err: HandlerError) {
        let status = (self.dispatcher.classifier())(&err);
        self.send_error_with(err, status);
    }

    /// Answer with an error and an explicit status
    ///
    /// Runs the route's error handler, or the application's. If the handler
    /// itself fails, the failure is logged and a bare status response is
    /// sent. Fatal errors are re-raised as a panic once handled.
    pub fn send_error_with(&mut self, err: HandlerError, status: StatusCode) {
        if self.started {
            error!(
                path = %self.request.path(),
                status = status.as_u16(),
                error = %err,
                "Error after the response started; discarded"
            );
        } else if self.is_closed() {
            warn!(
                path = %self.request.path(),
                error = %err,
                "Error on a closed connection; discarded"
            );
        } else {
            self.run_error_handler(&err, status);
        }

        if let HandlerError::Fatal(fatal) = err {
            error!(path = %self.request.path(), error = %fatal, "Fatal error; re-raising");
            resume_unwind(fatal.into_panic());
        }
    }

    fn run_error_handler(&mut self, err: &HandlerError, status: StatusCode) {
        let handler = self
            .route
            .as_ref()
            .and_then(|r| r.error_handler_override().cloned())
            .unwrap_or_else(|| self.dispatcher.error_handler().clone());

        self.status = status;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(self, err, status)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(crate::error::FatalError::from_panic(panic).to_string()),
        };

        if let Some(reason) = failure {
            error!(
                path = %self.request.path(),
                status = status.as_u16(),
                error = %err,
                handler_error = %reason,
                "Error handler failed"
            );
        }
        if !self.started {
            let _ = self.complete(Response::status_only(status));
        }
    }

    /// Whether a response was sent
    #[must_use]
    pub const fn is_response_started(&self) -> bool {
        self.started
    }

    /// Whether the connection side stopped waiting for a response
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.completion.as_ref().map_or(true, oneshot::Sender::is_closed)
    }

    fn send(&mut self, media_type: MediaType, body: Bytes) -> Result<()> {
        let response = Response::new(self.status)
            .with_header(CONTENT_TYPE.as_str(), &media_type.to_string())
            .with_body(body);
        self.complete(response)
    }

    fn complete(&mut self, response: Response) -> Result<()> {
        if self.started {
            return Err(Error::ResponseStarted);
        }
        let sender = self.completion.take().ok_or_else(Error::connection_closed)?;
        self.started = true;

        let mut headers = std::mem::take(&mut self.headers);
        for (name, value) in response.headers() {
            headers.insert(name.clone(), value.clone());
        }
        let response = response.with_headers(headers);

        sender.send(response).map_err(|_| Error::connection_closed())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method())
            .field("path", &self.request.path())
            .field("route", &self.route.as_ref().map(|r| r.pattern().raw().to_string()))
            .field("status", &self.status)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Context {
    /// Context whose response side is already closed
    pub(crate) fn detached(request: Request) -> Self {
        Self::with_receiver(request).0
    }

    /// Context plus the receiving end of its completion channel
    pub(crate) fn with_receiver(request: Request) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let dispatcher = Arc::new(crate::Router::new().build());
        (Self::new(request, dispatcher, tx), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{FieldError, ValidationErrors};
    use serde::Deserialize;

    fn ctx(request: Request) -> (Context, oneshot::Receiver<Response>) {
        Context::with_receiver(request)
    }

    #[test]
    fn test_query_and_headers() {
        let req = Request::new(Method::Get, "/search?q=a&q=b&page=2").with_header("X-Token", "t1");
        let (ctx, _rx) = ctx(req);
        assert_eq!(ctx.query("q").to_list(), vec!["a", "b"]);
        assert_eq!(ctx.query("page").to_i64().unwrap(), 2);
        assert!(ctx.query("missing").is_missing());
        assert_eq!(ctx.query_map()["q"], vec!["a", "b"]);
        assert_eq!(ctx.header("x-token").value().unwrap(), "t1");
        assert_eq!(ctx.query_string(), Some("q=a&q=b&page=2"));
    }

    #[test]
    fn test_send_string_once() {
        let (mut ctx, mut rx) = ctx(Request::new(Method::Get, "/"));
        ctx.set_status(StatusCode::CREATED).set_header("x-id", "9");
        ctx.send_string("made").unwrap();
        assert!(ctx.is_response_started());

        let err = ctx.send_string("again").unwrap_err();
        assert!(matches!(err, Error::ResponseStarted));

        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.header("x-id"), Some("9"));
        assert_eq!(resp.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(resp.body_str(), Some("made"));
    }

    #[test]
    fn test_send_after_disconnect_is_io_error() {
        let (mut ctx, rx) = ctx(Request::new(Method::Get, "/"));
        drop(rx);
        assert!(ctx.is_closed());

        match ctx.send_string("late").unwrap_err() {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionAborted),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_render_uses_accept() {
        let req = Request::new(Method::Get, "/").with_header("Accept", "application/json");
        let (mut ctx, mut rx) = ctx(req);
        ctx.render(Model::Structured(serde_json::json!({"id": 1}))).unwrap();

        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.body_str(), Some(r#"{"id":1}"#));
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let (mut ctx, mut rx) = ctx(Request::new(Method::Get, "/"));
        ctx.set_content_type(MediaType::HTML);
        ctx.send_string("<p>hi</p>").unwrap();
        assert_eq!(rx.try_recv().unwrap().header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_redirect() {
        let (mut ctx, mut rx) = ctx(Request::new(Method::Get, "/old"));
        ctx.send_redirect("/new").unwrap();
        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.header("location"), Some("/new"));
        assert!(resp.body().is_empty());
    }

    #[derive(Debug, Deserialize)]
    struct Order {
        item: String,
        qty: u32,
    }

    #[test]
    fn test_body_without_content_type_uses_text_parser() {
        let req = Request::new(Method::Post, "/").with_body("just text");
        let (ctx, _rx) = ctx(req);
        let text: String = ctx.body().unwrap();
        assert_eq!(text, "just text");
        assert!(ctx.body::<Order>().is_err());
    }

    #[test]
    fn test_body_with_unregistered_type_is_415() {
        let req = Request::new(Method::Post, "/")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"item":"tea","qty":2}"#);
        let (ctx, _rx) = ctx(req);
        let err = ctx.body::<Order>().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_form_access() {
        let req = Request::new(Method::Post, "/")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("item=tea&qty=2");
        let (ctx, _rx) = ctx(req);
        assert_eq!(ctx.form("item").unwrap().value().unwrap(), "tea");
        assert_eq!(ctx.form("qty").unwrap().to_i64().unwrap(), 2);
        assert_eq!(ctx.form_map().unwrap()["item"], "tea");
        assert!(matches!(ctx.file("upload"), Err(Error::MissingValue { .. })));
    }

    #[test]
    fn test_send_error_uses_default_handler() {
        let req = Request::new(Method::Get, "/").with_header("Accept", "application/json");
        let (mut ctx, mut rx) = ctx(req);

        let mut errors = ValidationErrors::new();
        errors.add(FieldError::required("email"));
        ctx.send_error(errors.into());

        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(resp.body_str().unwrap()).unwrap();
        assert_eq!(body["status"], 400);
        assert_eq!(body["errors"][0]["field"], "email");
    }

    #[test]
    fn test_send_error_after_start_is_discarded() {
        let (mut ctx, mut rx) = ctx(Request::new(Method::Get, "/"));
        ctx.send_string("ok").unwrap();
        ctx.send_error(HandlerError::msg("late failure"));
        assert_eq!(rx.try_recv().unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn test_fatal_error_is_answered_then_reraised() {
        let (mut ctx, mut rx) = ctx(Request::new(Method::Get, "/"));
        let result = catch_unwind(AssertUnwindSafe(|| {
            ctx.send_error(HandlerError::fatal("out of memory"));
        }));
        assert!(result.is_err());
        assert_eq!(rx.try_recv().unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_attributes() {
        let (mut ctx, _rx) = ctx(Request::new(Method::Get, "/"));
        ctx.set_attribute(42_u32);
        assert_eq!(ctx.attribute::<u32>(), Some(&42));
        assert_eq!(ctx.remove_attribute::<u32>(), Some(42));
        assert!(ctx.attribute::<u32>().is_none());
    }
}
