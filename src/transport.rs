use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ProtocolError;

/// HTTP methods supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::GET => write!(f, "GET"),
            HttpMethod::POST => write!(f, "POST"),
            HttpMethod::PUT => write!(f, "PUT"),
            HttpMethod::DELETE => write!(f, "DELETE"),
            HttpMethod::PATCH => write!(f, "PATCH"),
            HttpMethod::HEAD => write!(f, "HEAD"),
            HttpMethod::OPTIONS => write!(f, "OPTIONS"),
        }
    }
}

/// Request handed to the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// Response returned by the transport. The body is read once, by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl HttpResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: body.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn status_class(&self) -> Option<StatusClass> {
        StatusClass::of(self.status_code)
    }

    pub fn is_success(&self) -> bool {
        self.status_class() == Some(StatusClass::Success)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Class of an HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusClass {
    #[serde(rename = "1xx")]
    Informational,
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirection,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
}

impl StatusClass {
    pub fn of(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(StatusClass::Informational),
            200..=299 => Some(StatusClass::Success),
            300..=399 => Some(StatusClass::Redirection),
            400..=499 => Some(StatusClass::ClientError),
            500..=599 => Some(StatusClass::ServerError),
            _ => None,
        }
    }
}

/// Status a method expects once called: either an exact code or a whole class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    Code(u16),
    Class(StatusClass),
}

impl ExpectedStatus {
    pub fn matches(&self, code: u16) -> bool {
        match self {
            ExpectedStatus::Code(expected) => *expected == code,
            ExpectedStatus::Class(class) => StatusClass::of(code) == Some(*class),
        }
    }
}

impl std::fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedStatus::Code(code) => write!(f, "{}", code),
            ExpectedStatus::Class(class) => {
                let label = match class {
                    StatusClass::Informational => "1xx",
                    StatusClass::Success => "2xx",
                    StatusClass::Redirection => "3xx",
                    StatusClass::ClientError => "4xx",
                    StatusClass::ServerError => "5xx",
                };
                write!(f, "{}", label)
            }
        }
    }
}

/// The HTTP execution boundary. Connection handling, TLS and redirects live behind it.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute a request and return the fully read response
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class_boundaries() {
        assert_eq!(StatusClass::of(199), Some(StatusClass::Informational));
        assert_eq!(StatusClass::of(200), Some(StatusClass::Success));
        assert_eq!(StatusClass::of(299), Some(StatusClass::Success));
        assert_eq!(StatusClass::of(404), Some(StatusClass::ClientError));
        assert_eq!(StatusClass::of(600), None);
    }

    #[test]
    fn test_expected_status_deserializes_code_or_class() {
        let code: ExpectedStatus = serde_json::from_str("201").unwrap();
        assert_eq!(code, ExpectedStatus::Code(201));
        assert!(code.matches(201));
        assert!(!code.matches(200));

        let class: ExpectedStatus = serde_json::from_str("\"2xx\"").unwrap();
        assert_eq!(class, ExpectedStatus::Class(StatusClass::Success));
        assert!(class.matches(204));
        assert_eq!(class.to_string(), "2xx");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200, "{}").with_header("Content-Type", "application/json");
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));
        assert!(response.is_success());
    }
}
