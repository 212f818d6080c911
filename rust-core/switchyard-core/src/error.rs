//! # Error Handling
//!
//! Centralized error types for Switchyard core.
//! Uses `thiserror` for the crate error and `anyhow` to carry arbitrary
//! handler failures across the dispatch boundary.
//!
//! ## Kinds
//!
//! - [`Error`] - routing, negotiation and transport failures raised by the core
//! - [`StatusError`] - a handler-chosen status with a message
//! - [`HandlerError`] - anything a middleware or handler returns, tagged
//!   recoverable or fatal
//! - [`FatalError`] - the fatal subset, re-raised after the error handler ran

use crate::router::Method;
use crate::validation::ValidationErrors;
use hyper::StatusCode;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Result type alias for Switchyard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Switchyard runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Route pattern could not be compiled
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidPattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// No route matches the requested path under any method
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// The path exists, but not for the requested method
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed {
        /// Requested method
        method: Method,
        /// Requested path
        path: String,
        /// Methods that do match the path
        allowed: Vec<Method>,
    },

    /// Request method outside the supported set
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// No parser registered for the request `Content-Type`
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// No renderer of the route can produce the value
    #[error("No renderer can produce a response for route {route}")]
    MissingRenderer {
        /// Route pattern the render call came from
        route: String,
    },

    /// Request body did not decode with the selected parser
    #[error("Malformed {media_type} body: {reason}")]
    MalformedBody {
        /// Media type of the parser that failed
        media_type: String,
        /// Parser error
        reason: String,
    },

    /// A required path/query/header/form value is absent
    #[error("Missing value: {name}")]
    MissingValue {
        /// Value name
        name: String,
    },

    /// A value is present but does not convert to the requested type
    #[error("Cannot convert {name}='{value}' to {expected}")]
    InvalidValue {
        /// Value name
        name: String,
        /// Raw value
        value: String,
        /// Expected type name
        expected: &'static str,
    },

    /// A second response was attempted on the same context
    #[error("Response already started")]
    ResponseStarted,

    /// Dispatch requested an executor that was never registered
    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status this error maps to when it reaches a client
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::MalformedBody { .. }
            | Self::MissingValue { .. }
            | Self::InvalidValue { .. }
            | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BindError { .. }
            | Self::InvalidPattern { .. }
            | Self::MissingRenderer { .. }
            | Self::ResponseStarted
            | Self::UnknownExecutor(_)
            | Self::Http(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for an I/O error on a connection that is gone
    pub(crate) fn connection_closed() -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "connection closed before the response was completed",
        ))
    }
}

/// Error carrying the exact status a handler wants to answer with
#[derive(Error, Debug, Clone)]
#[error("{status}: {message}")]
pub struct StatusError {
    /// Response status
    pub status: StatusCode,
    /// Human-readable message
    pub message: String,
}

impl StatusError {
    /// Create a status error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

/// Unrecoverable failure: answered through the error handler, then re-raised
pub struct FatalError {
    message: String,
    payload: Option<Box<dyn Any + Send>>,
}

impl FatalError {
    /// Fatal error from a cause
    pub fn new(cause: impl fmt::Display) -> Self {
        Self {
            message: cause.to_string(),
            payload: None,
        }
    }

    /// Fatal error from a caught panic, keeping the payload for re-raising
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self {
            message,
            payload: Some(payload),
        }
    }

    /// Error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Payload to hand to `std::panic::resume_unwind`
    #[must_use]
    pub fn into_panic(self) -> Box<dyn Any + Send> {
        match self.payload {
            Some(payload) => payload,
            None => Box::new(self.message),
        }
    }
}

impl fmt::Debug for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalError")
            .field("message", &self.message)
            .field("panicked", &self.payload.is_some())
            .finish()
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Failure raised by a middleware or handler
///
/// Any `std::error::Error` converts into `Recoverable`, so `?` works inside
/// handlers. Deliberately does not implement `std::error::Error` itself.
#[derive(Debug)]
pub enum HandlerError {
    /// Classified into a status and rendered by the error handler
    Recoverable(anyhow::Error),
    /// Rendered if possible, logged, then re-raised
    Fatal(FatalError),
}

impl HandlerError {
    /// Recoverable error from a plain message
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Recoverable(anyhow::Error::msg(message))
    }

    /// Fatal error from a cause
    pub fn fatal(cause: impl fmt::Display) -> Self {
        Self::Fatal(FatalError::new(cause))
    }

    /// Whether this error must be re-raised after handling
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Look for a concrete error type inside a recoverable error
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Recoverable(e) => e.downcast_ref::<E>(),
            Self::Fatal(_) => None,
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::Recoverable(anyhow::Error::new(err))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable(e) => write!(f, "{e:#}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

/// Default status classification for handler errors
///
/// Client-side failures (explicit status errors, validation, malformed input,
/// unparsable values) map to 4xx; everything else is a 500.
#[must_use]
pub fn default_error_code(err: &HandlerError) -> StatusCode {
    let HandlerError::Recoverable(cause) = err else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    if let Some(status) = cause.downcast_ref::<StatusError>() {
        return status.status;
    }
    if let Some(core) = cause.downcast_ref::<Error>() {
        return core.status_code();
    }

    let client_error = cause.is::<ValidationErrors>()
        || cause.is::<serde_json::Error>()
        || cause.is::<simd_json::Error>()
        || cause.is::<serde_urlencoded::de::Error>()
        || cause.is::<std::num::ParseIntError>()
        || cause.is::<std::num::ParseFloatError>()
        || cause.is::<std::str::ParseBoolError>();

    if client_error {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_error() {
        let err = Error::RouteNotFound {
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("/unknown"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_negotiation_status_codes() {
        assert_eq!(
            Error::UnsupportedMediaType("application/xml".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            Error::MissingRenderer { route: "/".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_question_mark_converts_into_handler_error() {
        fn handler() -> std::result::Result<i64, HandlerError> {
            Ok("abc".parse::<i64>()?)
        }
        let err = handler().unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(default_error_code(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_classification() {
        let err = HandlerError::from(StatusError::forbidden("nope"));
        assert_eq!(default_error_code(&err), StatusCode::FORBIDDEN);

        let err = HandlerError::from(Error::UnsupportedMediaType("text/csv".into()));
        assert_eq!(default_error_code(&err), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err = HandlerError::from(ValidationErrors::new());
        assert_eq!(default_error_code(&err), StatusCode::BAD_REQUEST);

        let err = HandlerError::msg("database went away");
        assert_eq!(default_error_code(&err), StatusCode::INTERNAL_SERVER_ERROR);

        let err = HandlerError::fatal("out of memory");
        assert!(err.is_fatal());
        assert_eq!(default_error_code(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_fatal_from_panic_keeps_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let fatal = FatalError::from_panic(payload);
        assert_eq!(fatal.message(), "boom");

        let payload = fatal.into_panic();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }

    #[test]
    fn test_fatal_without_payload_reraises_message() {
        let payload = FatalError::new("stack exhausted").into_panic();
        assert_eq!(
            payload.downcast_ref::<String>().map(String::as_str),
            Some("stack exhausted")
        );
    }
}
