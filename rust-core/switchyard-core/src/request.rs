//! # HTTP Request
//!
//! Transport-neutral request value handed to the dispatcher. The body is
//! collected up front (bounded by the server's size limit) and the query
//! string is decoded once at construction.

use crate::error::{Error, Result};
use crate::router::Method;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use std::net::SocketAddr;
use tracing::debug;

/// Incoming HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: Option<String>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Create a request from a method and a request target such as
    /// `/users?page=2`
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        let query = parse_query_string(query_string.as_deref());

        Self {
            method,
            path,
            query_string,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// Add a header; invalid names or values are ignored
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(n, v);
        }
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the peer address
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Create from a hyper request, collecting at most `max_body_size` bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedMethod` for extension methods,
    /// `Error::PayloadTooLarge` when the body exceeds the limit and
    /// `Error::Http` when the body stream fails.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::from_hyper(req.method())
            .ok_or_else(|| Error::UnsupportedMethod(req.method().to_string()))?;

        let target = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), ToString::to_string);

        let declared = req
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(actual) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual,
            });
        }

        let (parts, body) = req.into_parts();
        let bytes = body.collect().await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        let mut request = Self::new(method, &target).with_body(bytes);
        request.headers = parts.headers;
        Ok(request)
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Raw request path, without the query string
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Decoded query pairs in request order
    #[must_use]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Request headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request body
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Peer address, when known
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Decode a query string; a malformed one yields no parameters
fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    serde_urlencoded::from_str(query).unwrap_or_else(|e| {
        debug!(query = %query, error = %e, "Ignoring malformed query string");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result, vec![("page".into(), "1".into()), ("limit".into(), "10".into())]);
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York"));
        assert_eq!(result[0].1, "John Doe");
        assert_eq!(result[1].1, "New York");
    }

    #[test]
    fn test_request_target_split() {
        let req = Request::new(Method::Get, "/search?q=rust&q=hyper");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&q=hyper"));
        assert_eq!(req.query_pairs().len(), 2);
    }

    #[test]
    fn test_builder_headers_and_body() {
        let req = Request::new(Method::Post, "/items")
            .with_header("Content-Type", "application/json")
            .with_header("bad header", "x")
            .with_body(&b"{}"[..]);
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.headers().len(), 1);
        assert_eq!(&req.body()[..], b"{}");
        assert!(req.remote_addr().is_none());
    }
}
