use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ProtocolError;
use crate::transport::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};

/// Settings for the pooled reqwest client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestClientConfig {
    pub connection_pool_size: usize,
    pub default_timeout: Duration,
    pub max_redirects: usize,
    pub verify_certificates: bool,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: 10,
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            verify_certificates: true,
        }
    }
}

/// `HttpExecutor` backed by a pooled reqwest client
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    config: RestClientConfig,
}

impl RestClient {
    /// Create a client with default configuration
    pub fn new() -> Result<Self, ProtocolError> {
        Self::with_config(RestClientConfig::default())
    }

    pub fn with_config(config: RestClientConfig) -> Result<Self, ProtocolError> {
        let client = Self::build_client(&config)?;
        log::info!(
            "REST client initialized with pool size: {}, timeout: {:?}",
            config.connection_pool_size,
            config.default_timeout
        );
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    fn build_client(config: &RestClientConfig) -> Result<Client, ProtocolError> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(config.connection_pool_size)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(config.default_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(format!("{}/{}", crate::NAME, crate::VERSION))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if !config.verify_certificates {
            builder = builder.danger_accept_invalid_certs(true);
            log::warn!("TLS certificate verification disabled - use only for testing!");
        }

        builder
            .build()
            .map_err(|e| ProtocolError::InitializationFailed(format!("Failed to build HTTP client: {}", e)))
    }

    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::DELETE => Method::DELETE,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::HEAD => Method::HEAD,
            HttpMethod::OPTIONS => Method::OPTIONS,
        }
    }

    fn extract_headers(response: &Response) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.insert(name.to_string(), value_str.to_string());
            }
        }
        headers
    }
}

#[async_trait]
impl HttpExecutor for RestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| ProtocolError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let mut req_builder = self
            .client
            .request(Self::convert_method(request.method), url)
            .timeout(request.timeout);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let start_time = Instant::now();
        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProtocolError::Timeout { timeout: request.timeout }
            } else if e.is_connect() {
                ProtocolError::ConnectionFailed(e.to_string())
            } else {
                ProtocolError::NetworkError(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        if response.status().is_client_error() || response.status().is_server_error() {
            log::debug!("HTTP error status: {}", status_code);
        }

        let headers = Self::extract_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| ProtocolError::NetworkError(format!("Failed to read response body: {}", e)))?
            .to_vec();

        Ok(HttpResponse {
            status_code,
            headers,
            body,
            duration: start_time.elapsed(),
        })
    }
}
