//! Error kinds raised while composing a stack.

use thiserror::Error;

/// Result type alias for composition operations.
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Errors that abort a composition.
///
/// Every variant names the resource it was raised for so the operator can
/// find the offending block in `stack.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// Malformed or inconsistent input, detected before anything is declared.
    #[error("configuration error in {resource}: {parameter}: {message}")]
    Configuration {
        resource: String,
        parameter: String,
        message: String,
    },

    /// A name does not follow the required convention.
    #[error("validation error in {resource}: {parameter} {value:?} {message}")]
    Validation {
        resource: String,
        parameter: String,
        value: String,
        message: String,
    },

    /// A dependent resource's expected output is missing.
    #[error("resource error in {resource}: {message}")]
    Resource { resource: String, message: String },
}

/// Coarse classification of a [`ComposeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Resource,
}

impl ComposeError {
    pub fn configuration(
        resource: impl Into<String>,
        parameter: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            resource: resource.into(),
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub fn validation(
        resource: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            parameter: parameter.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ComposeError::Configuration { .. } => ErrorKind::Configuration,
            ComposeError::Validation { .. } => ErrorKind::Validation,
            ComposeError::Resource { .. } => ErrorKind::Resource,
        }
    }

    /// The resource the error was raised for.
    pub fn resource_name(&self) -> &str {
        match self {
            ComposeError::Configuration { resource, .. }
            | ComposeError::Validation { resource, .. }
            | ComposeError::Resource { resource, .. } => resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_resource_and_parameter() {
        let err = ComposeError::configuration("Vpc", "cidr", "mask /33 is out of range");
        assert_eq!(
            err.to_string(),
            "configuration error in Vpc: cidr: mask /33 is out of range"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.resource_name(), "Vpc");
    }

    #[test]
    fn validation_message_quotes_value() {
        let err = ComposeError::validation("Rds", "database_name", "SampleDB", "is not lower_snake_case");
        assert!(err.to_string().contains("\"SampleDB\""));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
