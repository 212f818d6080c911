//! # Validation Errors
//!
//! Structured, field-level validation failures a handler can return with `?`.
//! The default classifier answers them with 400 and the default error handler
//! renders the field list as JSON.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Value is of the wrong type
    InvalidType,
    /// Value is outside the accepted range
    OutOfRange,
    /// Value doesn't match the expected format
    InvalidFormat,
    /// Application-specific rule failed
    Custom,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name (e.g., "email", "user.address.city")
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Field is absent
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{field} is required");
        Self::new(field, message, ValidationCode::Required)
    }

    /// Field has the wrong type
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field = field.into();
        let message = format!("{field} must be {expected}");
        Self::new(field, message, ValidationCode::InvalidType)
    }

    /// Field is outside `[min, max]`
    pub fn out_of_range(field: impl Into<String>, min: i64, max: i64) -> Self {
        let field = field.into();
        let message = format!("{field} must be between {min} and {max}");
        Self::new(field, message, ValidationCode::OutOfRange)
    }
}

/// Collection of validation errors for one request
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(value)` when nothing was collected, `Err(self)` otherwise
    ///
    /// # Errors
    ///
    /// Returns the collected errors when there is at least one.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Errors grouped by field, in field order
    #[must_use]
    pub fn by_field(&self) -> BTreeMap<&str, Vec<&FieldError>> {
        let mut map: BTreeMap<&str, Vec<&FieldError>> = BTreeMap::new();
        for error in &self.errors {
            map.entry(error.field.as_str()).or_default().push(error);
        }
        map
    }

    /// JSON representation used by the default error handler
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "errors": [] }))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (i, error) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}", error.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_required() {
        let error = FieldError::required("email");
        assert_eq!(error.field, "email");
        assert_eq!(error.code, ValidationCode::Required);
        assert!(error.message.contains("required"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ValidationErrors::new().into_result(7).unwrap(), 7);

        let mut errors = ValidationErrors::new();
        errors.add(FieldError::out_of_range("age", 0, 150));
        let err = errors.into_result(()).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.to_string(), "validation failed: age must be between 0 and 150");
    }

    #[test]
    fn test_json_shape() {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::required("email"));

        let json = errors.to_json();
        assert_eq!(json["errors"][0]["field"], "email");
        assert_eq!(json["errors"][0]["code"], "REQUIRED");
    }

    #[test]
    fn test_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::required("email"));
        errors.add(FieldError::invalid_type("email", "a string"));
        errors.add(FieldError::required("name"));

        let grouped = errors.by_field();
        assert_eq!(grouped.get("email").map(Vec::len), Some(2));
        assert_eq!(grouped.get("name").map(Vec::len), Some(1));
    }
}
