//! Error types for domain validation

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or resolving domain records
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record failed validation
    #[error("invalid {record}: {message}")]
    Invalid {
        /// Which record was rejected (e.g. "values", "image")
        record: &'static str,
        /// Why it was rejected
        message: String,
    },

    /// A service depends on a service that is not active in the profile
    #[error("service '{service}' depends on '{dependency}' which is not active in profile '{profile}'")]
    UnknownDependency {
        service: String,
        dependency: String,
        profile: String,
    },

    /// Dependency edges form a cycle
    #[error("dependency cycle in profile '{profile}' involving: {}", .services.join(", "))]
    DependencyCycle {
        profile: String,
        services: Vec<String>,
    },

    /// A `${VAR}` reference has no value and no default
    #[error("required variable '{0}' is not set")]
    MissingVariable(String),

    /// A port mapping or quantity could not be parsed
    #[error("cannot parse {kind} '{value}'")]
    Parse {
        kind: &'static str,
        value: String,
    },
}

impl CoreError {
    /// Create a validation error for the given record
    pub fn invalid(record: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            record,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            value: value.into(),
        }
    }
}
