//! # Typed Request Values
//!
//! A [`Value`] is what the context returns for a path variable, query
//! parameter, header or form field: zero or more raw strings under a name,
//! with typed conversions. A missing value is not an error until it is
//! converted; `value()` on a missing value yields `Error::MissingValue` and
//! a failed conversion yields `Error::InvalidValue`, both answered with 400.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Named request value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    name: String,
    values: Vec<String>,
}

impl Value {
    /// A value that is not present in the request
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// A single value
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    /// Every occurrence of a repeated parameter, in request order
    pub fn multiple(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Parameter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the request has no such parameter
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.values.is_empty()
    }

    /// First occurrence
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingValue` when the parameter is absent.
    pub fn value(&self) -> Result<&str> {
        self.values
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::MissingValue {
                name: self.name.clone(),
            })
    }

    /// First occurrence, or `default` when absent
    #[must_use]
    pub fn value_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.values.first().map_or(default, String::as_str)
    }

    /// All occurrences (empty when missing)
    #[must_use]
    pub fn to_list(&self) -> Vec<&str> {
        self.values.iter().map(String::as_str).collect()
    }

    /// Parse into any `FromStr` type
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingValue` when absent, `Error::InvalidValue` when
    /// the text does not parse.
    pub fn to<T: FromStr>(&self, expected: &'static str) -> Result<T> {
        let raw = self.value()?;
        raw.trim().parse().map_err(|_| Error::InvalidValue {
            name: self.name.clone(),
            value: raw.to_string(),
            expected,
        })
    }

    /// Parse as a signed 64-bit integer
    ///
    /// # Errors
    ///
    /// See [`Value::to`].
    pub fn to_i64(&self) -> Result<i64> {
        self.to("an integer")
    }

    /// Parse as a 64-bit float
    ///
    /// # Errors
    ///
    /// See [`Value::to`].
    pub fn to_f64(&self) -> Result<f64> {
        self.to("a number")
    }

    /// Parse as a boolean: `true/false`, `1/0`, `yes/no`, `on/off`
    ///
    /// # Errors
    ///
    /// See [`Value::to`].
    pub fn to_bool(&self) -> Result<bool> {
        let raw = self.value()?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::InvalidValue {
                name: self.name.clone(),
                value: raw.to_string(),
                expected: "a boolean",
            }),
        }
    }

    /// `None` when missing, otherwise the parsed value
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidValue` when present but unparsable.
    pub fn to_optional<T: FromStr>(&self, expected: &'static str) -> Result<Option<T>> {
        if self.is_missing() {
            Ok(None)
        } else {
            self.to(expected).map(Some)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.values.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn test_missing_value() {
        let v = Value::missing("page");
        assert!(v.is_missing());
        assert_eq!(v.value_or("1"), "1");
        assert!(v.to_list().is_empty());

        let err = v.value().unwrap_err();
        assert!(matches!(err, Error::MissingValue { ref name } if name == "page"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_int_conversion() {
        assert_eq!(Value::single("id", "42").to_i64().unwrap(), 42);
        assert_eq!(Value::single("id", "-7").to_i64().unwrap(), -7);

        let err = Value::single("id", "abc").to_i64().unwrap_err();
        assert!(err.to_string().contains("an integer"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_float_conversion() {
        let v = Value::single("price", "3.14").to_f64().unwrap();
        assert!((v - 3.14).abs() < f64::EPSILON);
        assert!(Value::single("price", "cheap").to_f64().is_err());
    }

    #[test]
    fn test_bool_conversion() {
        for yes in ["true", "TRUE", "1", "yes", "on"] {
            assert!(Value::single("flag", yes).to_bool().unwrap());
        }
        for no in ["false", "0", "no", "off"] {
            assert!(!Value::single("flag", no).to_bool().unwrap());
        }
        assert!(Value::single("flag", "maybe").to_bool().is_err());
    }

    #[test]
    fn test_multiple_values() {
        let v = Value::multiple("tag", vec!["a".into(), "b".into()]);
        assert_eq!(v.value().unwrap(), "a");
        assert_eq!(v.to_list(), vec!["a", "b"]);
        assert_eq!(v.to_string(), "a,b");
    }

    #[test]
    fn test_optional() {
        assert_eq!(Value::missing("n").to_optional::<u32>("a count").unwrap(), None);
        assert_eq!(Value::single("n", "5").to_optional::<u32>("a count").unwrap(), Some(5));
        assert!(Value::single("n", "x").to_optional::<u32>("a count").is_err());
    }
}
