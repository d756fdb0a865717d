use thiserror::Error;
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::HttpResponse;

/// Core error type surfaced by API methods, renderers, validators and pollers
#[derive(Error, Debug)]
pub enum ApiMethodError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource not found: {path}")]
    ResourceNotFound { path: String },

    #[error("Resource can't be loaded from {path}: {message}")]
    ResourceLoad { path: String, message: String },

    #[error("Template '{template}' can't be rendered: {message}")]
    TemplateRender { template: String, message: String },

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Response mismatch:\n{diff}")]
    ResponseMismatch { diff: String },

    #[error("Polling timed out after {attempts} attempt(s) in {elapsed:?}{}", describe_last(.last_response))]
    PollTimeout {
        attempts: u32,
        elapsed: Duration,
        last_response: Option<Box<HttpResponse>>,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

fn describe_last(last: &Option<Box<HttpResponse>>) -> String {
    match last {
        Some(response) => format!(
            "; last response: HTTP {} {}",
            response.status_code,
            response.body_text()
        ),
        None => String::new(),
    }
}

impl ApiMethodError {
    pub(crate) fn resource_load(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ApiMethodError::ResourceLoad {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Validation attempted in a state where it cannot be meaningful
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreconditionError {
    #[error("Actual response body is absent. Make an API call before validating the response")]
    NoResponseBody,

    #[error("Array containment flags apply to JSON only, got {0} flag(s) for an XML method")]
    ContainmentFlagsInXmlMode(usize),
}

/// Transport errors reported by an `HttpExecutor`
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Client initialization failed: {0}")]
    InitializationFailed(String),
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {message}")]
    InvalidFormat { message: String },

    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    #[error("Invalid value for environment variable {name}: {message}")]
    InvalidEnvironmentValue { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigurationError> for ApiMethodError {
    fn from(err: ConfigurationError) -> Self {
        match err {
            ConfigurationError::FileNotFound { path } => ApiMethodError::ResourceNotFound {
                path: path.display().to_string(),
            },
            other => ApiMethodError::Configuration(other.to_string()),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ApiMethodError>;
