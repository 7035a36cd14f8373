//! Error types shared across the mockd crates

use serde::{Deserialize, Serialize};

/// Result type alias for mockd operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    /// Where the failure occurred (e.g. `mocks[2].matcher.path`)
    pub location: String,
    /// Machine-readable failure code (e.g. `required`, `out_of_range`)
    pub code: String,
    /// The value that was received, rendered as a string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    /// What was expected instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Human-readable hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FieldError {
    pub fn new(location: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            code: code.into(),
            received: None,
            expected: None,
            hint: None,
        }
    }

    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Core error types for mockd
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Listener error: {message}")]
    Listener { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a validation error without field detail
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Create a validation error carrying field-level failures
    pub fn validation_fields<S: Into<String>>(message: S, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a capacity-exceeded error
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a listener error
    pub fn listener<S: Into<String>>(message: S) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable kind tag surfaced to clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Listener { .. } | Self::Config { .. } => "internal_error",
            Self::Io(_) | Self::Json(_) | Self::Yaml(_) | Self::Internal { .. } => {
                "internal_error"
            }
        }
    }

    /// The HTTP status this error maps to (protocol analogs derive from it)
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::CapacityExceeded { .. } => 507,
            Self::Unauthorized { .. } => 401,
            _ => 500,
        }
    }

    /// Field errors attached to a validation failure, empty otherwise
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_mapping() {
        assert_eq!(Error::validation("x").kind(), "validation_error");
        assert_eq!(Error::validation("x").http_status(), 400);
        assert_eq!(Error::conflict("x").http_status(), 409);
        assert_eq!(Error::capacity("x").http_status(), 507);
        assert_eq!(Error::unauthorized("x").http_status(), 401);
        assert_eq!(Error::not_found("x").http_status(), 404);
    }

    #[test]
    fn field_error_builder() {
        let err = FieldError::new("mocks[0].priority", "out_of_range")
            .with_received("abc")
            .with_expected("integer")
            .with_hint("priority must be an integer");
        assert_eq!(err.location, "mocks[0].priority");
        assert_eq!(err.expected.as_deref(), Some("integer"));
    }
}
