//! # Body Codecs
//!
//! Request-body parsers and response renderers, keyed by media type.
//!
//! Parsers decode into a `serde_json::Value`, which `Context::body` then
//! deserializes into the caller's type, so every parser works with every
//! `DeserializeOwned` target. Renderers turn a [`Model`] into bytes and
//! decline models they don't handle by returning `Ok(None)`.
//!
//! JSON parsing uses simd-json; serialization stays on serde_json.

use crate::error::{Error, Result};
use crate::media::MediaType;
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

/// A value handed to `Context::render`
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// Plain text
    Text(String),
    /// Raw bytes
    Binary(Bytes),
    /// Structured data, rendered by a structured renderer such as JSON
    Structured(Value),
}

impl Model {
    /// Serialize any value into a structured model
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the value fails to serialize.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Structured(serde_json::to_value(value)?))
    }
}

impl From<String> for Model {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Model {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for Model {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Model {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<Value> for Model {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Decodes request bodies of one media type
pub trait Parser: Send + Sync {
    /// Media type this parser accepts
    fn media_type(&self) -> MediaType;

    /// Decode a body
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the bytes are not valid for the type.
    fn parse(&self, body: &[u8]) -> Result<Value>;
}

/// Encodes response models into one media type
pub trait Renderer: Send + Sync {
    /// Media type of the produced bytes (used as `Content-Type`)
    fn media_type(&self) -> MediaType;

    /// Encode a model, or `Ok(None)` when this renderer does not handle it
    ///
    /// # Errors
    ///
    /// Returns an error when the model is handled but encoding fails.
    fn render(&self, model: &Model) -> Result<Option<Bytes>>;
}

fn malformed(media_type: &MediaType, reason: impl ToString) -> Error {
    Error::MalformedBody {
        media_type: media_type.essence().to_string(),
        reason: reason.to_string(),
    }
}

/// `text/plain` parser, also the default when a request has no `Content-Type`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

impl Parser for TextParser {
    fn media_type(&self) -> MediaType {
        MediaType::TEXT
    }

    fn parse(&self, body: &[u8]) -> Result<Value> {
        std::str::from_utf8(body)
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| malformed(&MediaType::TEXT, e))
    }
}

/// `application/json` parser backed by simd-json
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn media_type(&self) -> MediaType {
        MediaType::JSON
    }

    fn parse(&self, body: &[u8]) -> Result<Value> {
        // simd-json parses in place
        let mut bytes = body.to_vec();
        simd_json::serde::from_slice::<Value>(&mut bytes).map_err(|e| malformed(&MediaType::JSON, e))
    }
}

/// `application/x-www-form-urlencoded` parser
///
/// Repeated keys collect into an array, in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormParser;

impl Parser for FormParser {
    fn media_type(&self) -> MediaType {
        MediaType::FORM
    }

    fn parse(&self, body: &[u8]) -> Result<Value> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(body).map_err(|e| malformed(&MediaType::FORM, e))?;
        Ok(Value::Object(collect_pairs(pairs)))
    }
}

pub(crate) fn collect_pairs(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    map
}

/// Renders [`Model::Text`] as `text/plain; charset=utf-8`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn media_type(&self) -> MediaType {
        MediaType::TEXT
    }

    fn render(&self, model: &Model) -> Result<Option<Bytes>> {
        Ok(match model {
            Model::Text(text) => Some(Bytes::from(text.clone())),
            _ => None,
        })
    }
}

/// Renders [`Model::Structured`] as `application/json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer {
    pretty: bool,
}

impl JsonRenderer {
    /// Compact JSON renderer
    #[must_use]
    pub const fn new() -> Self {
        Self { pretty: false }
    }

    /// Pretty-printed output
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Renderer for JsonRenderer {
    fn media_type(&self) -> MediaType {
        MediaType::JSON
    }

    fn render(&self, model: &Model) -> Result<Option<Bytes>> {
        let Model::Structured(value) = model else {
            return Ok(None);
        };
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(Some(Bytes::from(bytes)))
    }
}

/// Renders [`Model::Binary`] as `application/octet-stream`
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesRenderer;

impl Renderer for BytesRenderer {
    fn media_type(&self) -> MediaType {
        MediaType::OCTET_STREAM
    }

    fn render(&self, model: &Model) -> Result<Option<Bytes>> {
        Ok(match model {
            Model::Binary(bytes) => Some(bytes.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        age: i32,
    }

    #[test]
    fn test_json_parser_object() {
        let value = JsonParser.parse(br#"{"name": "John", "age": 30}"#).unwrap();
        let data: TestData = serde_json::from_value(value).unwrap();
        assert_eq!(data, TestData { name: "John".into(), age: 30 });
    }

    #[test]
    fn test_json_parser_invalid() {
        let err = JsonParser.parse(b"not valid json").unwrap_err();
        assert!(matches!(err, Error::MalformedBody { .. }));
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_text_parser() {
        assert_eq!(TextParser.parse(b"hello").unwrap(), Value::String("hello".into()));
        assert!(TextParser.parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_form_parser_repeated_keys() {
        let value = FormParser.parse(b"name=John+Doe&tag=a&tag=b&city=New%20York").unwrap();
        assert_eq!(value["name"], "John Doe");
        assert_eq!(value["city"], "New York");
        assert_eq!(value["tag"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_renderers_decline_foreign_models() {
        let text = Model::from("hi");
        let json = Model::json(&TestData { name: "Bob".into(), age: 40 }).unwrap();

        assert!(JsonRenderer::new().render(&text).unwrap().is_none());
        assert!(TextRenderer.render(&json).unwrap().is_none());
        assert!(BytesRenderer.render(&text).unwrap().is_none());

        let bytes = JsonRenderer::new().render(&json).unwrap().unwrap();
        assert_eq!(&bytes[..], br#"{"age":40,"name":"Bob"}"#);
    }
}
