//! # Media Types
//!
//! Thin wrapper over [`mime::Mime`] with the constants the codecs use and
//! media-range matching for `Accept` headers.

use crate::error::{Error, Result};
use mime::Mime;
use std::fmt;
use std::str::FromStr;

/// A parsed media type such as `application/json; charset=utf-8`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType(Mime);

impl MediaType {
    /// `text/plain; charset=utf-8`
    pub const TEXT: Self = Self(mime::TEXT_PLAIN_UTF_8);
    /// `text/html; charset=utf-8`
    pub const HTML: Self = Self(mime::TEXT_HTML_UTF_8);
    /// `application/json`
    pub const JSON: Self = Self(mime::APPLICATION_JSON);
    /// `application/x-www-form-urlencoded`
    pub const FORM: Self = Self(mime::APPLICATION_WWW_FORM_URLENCODED);
    /// `multipart/form-data`
    pub const MULTIPART: Self = Self(mime::MULTIPART_FORM_DATA);
    /// `application/octet-stream`
    pub const OCTET_STREAM: Self = Self(mime::APPLICATION_OCTET_STREAM);
    /// `*/*`
    pub const ALL: Self = Self(mime::STAR_STAR);

    /// Parse a media type
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedMediaType` when the value is not a media type.
    pub fn parse(value: &str) -> Result<Self> {
        value
            .trim()
            .parse::<Mime>()
            .map(Self)
            .map_err(|_| Error::UnsupportedMediaType(value.to_string()))
    }

    /// `type/subtype` without parameters
    #[must_use]
    pub fn essence(&self) -> &str {
        self.0.essence_str()
    }

    /// Top-level type, e.g. `text`
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.0.type_().as_str()
    }

    /// Subtype, e.g. `plain`
    #[must_use]
    pub fn subtype_name(&self) -> &str {
        self.0.subtype().as_str()
    }

    /// A parameter value, e.g. `charset` or `boundary`
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.0.get_param(name).map(|v| v.as_str())
    }

    /// Same `type/subtype`, parameters ignored
    #[must_use]
    pub fn same_essence(&self, other: &Self) -> bool {
        self.essence().eq_ignore_ascii_case(other.essence())
    }

    /// Whether the media range `range` (e.g. `text/*`) covers this type
    #[must_use]
    pub fn within(&self, range: &Self) -> bool {
        let type_ok = range.type_name() == "*" || range.type_name().eq_ignore_ascii_case(self.type_name());
        let subtype_ok =
            range.subtype_name() == "*" || range.subtype_name().eq_ignore_ascii_case(self.subtype_name());
        type_ok && subtype_ok
    }

    /// Underlying `mime` value
    #[must_use]
    pub const fn as_mime(&self) -> &Mime {
        &self.0
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Mime> for MediaType {
    fn from(value: Mime) -> Self {
        Self(value)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
