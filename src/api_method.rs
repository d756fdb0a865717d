//! The API method: one declared endpoint with its templates, properties and the body
//! captured by the latest call

use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::descriptor::{MethodDescriptor, MethodResolver};
use crate::error::{ApiMethodError, PreconditionError, Result};
use crate::json_compare::{ComparatorContext, ContainmentFlag, JsonCompareMode};
use crate::poller::MethodPoller;
use crate::processors::{CryptoProcessor, ProcessorKind, DEFAULT_CRYPTO_KEY_ENV};
use crate::properties::{load_properties, PropertyStore, PropertyValue};
use crate::template::{TemplateRef, TemplateRenderer};
use crate::transport::{ExpectedStatus, HttpExecutor, HttpRequest, HttpResponse};
use crate::validation::{ComparisonSpec, ContentKind, ResponseValidator};
use crate::xml_compare::XmlCompareMode;

pub const ACCEPT_ALL: (&str, &str) = ("Accept", "*/*");
pub const SESSION_COOKIE: &str = "pfJSESSIONID";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BASE_URL_PLACEHOLDER: &str = "base_url";

fn url_placeholder_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}").expect("valid url placeholder regex"))
}

/// Builder for [`ApiMethod`]
pub struct ApiMethodBuilder {
    descriptor: MethodDescriptor,
    executor: Arc<dyn HttpExecutor>,
    renderer: Option<TemplateRenderer>,
    properties: Option<PropertyStore>,
    base_url: Option<String>,
    timeout: Duration,
}

impl ApiMethodBuilder {
    pub fn renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Use `store` instead of a fresh store with the standard processors
    pub fn properties(mut self, store: PropertyStore) -> Self {
        self.properties = Some(store);
        self
    }

    /// Start without a property store; accessors fail until one is installed
    pub fn without_properties(mut self) -> Self {
        self.properties = None;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load properties from a `.properties`, YAML, JSON or TOML resource into the store
    pub fn properties_file(mut self, path: &Path) -> Result<Self> {
        let values = load_properties(path)?;
        let store = self
            .properties
            .get_or_insert_with(default_property_store);
        store.set_all(values)?;
        log::info!("Base properties loaded: {}", path.display());
        Ok(self)
    }

    pub fn build(self) -> ApiMethod {
        let mut headers = IndexMap::new();
        headers.insert(ACCEPT_ALL.0.to_string(), ACCEPT_ALL.1.to_string());
        for (name, value) in &self.descriptor.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut url_placeholders = IndexMap::new();
        if let Some(base_url) = self.base_url {
            url_placeholders.insert(BASE_URL_PLACEHOLDER.to_string(), base_url.trim_end_matches('/').to_string());
        }

        ApiMethod {
            request_template: self.descriptor.request_template.clone(),
            response_template: self.descriptor.response_template.clone(),
            successful_status: self.descriptor.successful_status,
            descriptor: self.descriptor,
            executor: self.executor,
            renderer: self.renderer.unwrap_or_default(),
            properties: self.properties,
            headers,
            cookies: IndexMap::new(),
            url_placeholders,
            expected_status: None,
            timeout: self.timeout,
            last_response: None,
            last_body: None,
        }
    }
}

/// One declared endpoint.
///
/// Lifecycle: configured, then called (the raw body is captured), then validated any
/// number of times. The next call overwrites the captured body.
pub struct ApiMethod {
    descriptor: MethodDescriptor,
    executor: Arc<dyn HttpExecutor>,
    renderer: TemplateRenderer,
    properties: Option<PropertyStore>,
    request_template: Option<TemplateRef>,
    response_template: Option<TemplateRef>,
    successful_status: Option<ExpectedStatus>,
    headers: IndexMap<String, String>,
    cookies: IndexMap<String, String>,
    url_placeholders: IndexMap<String, String>,
    expected_status: Option<ExpectedStatus>,
    timeout: Duration,
    last_response: Option<HttpResponse>,
    last_body: Option<String>,
}

impl std::fmt::Debug for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMethod")
            .field("descriptor", &self.descriptor)
            .field("request_template", &self.request_template)
            .field("response_template", &self.response_template)
            .field("properties", &self.properties)
            .field("headers", &self.headers)
            .field("expected_status", &self.expected_status)
            .field("called", &self.last_body.is_some())
            .finish()
    }
}

/// Property store keyed from the default crypto variable. A missing or unusable key leaves
/// the crypto processor in place but refusing encrypted values.
fn default_property_store() -> PropertyStore {
    let crypto = CryptoProcessor::from_env(DEFAULT_CRYPTO_KEY_ENV).unwrap_or_else(|err| {
        log::warn!("{}", err);
        CryptoProcessor::unavailable(err.to_string())
    });
    PropertyStore::with_default_processors(crypto)
}

impl ApiMethod {
    pub fn builder(descriptor: MethodDescriptor, executor: Arc<dyn HttpExecutor>) -> ApiMethodBuilder {
        ApiMethodBuilder {
            descriptor,
            executor,
            renderer: None,
            properties: Some(default_property_store()),
            base_url: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Builder for the method `name` declared in `resolver`
    pub fn resolve(name: &str, resolver: &dyn MethodResolver, executor: Arc<dyn HttpExecutor>) -> Result<ApiMethodBuilder> {
        let descriptor = resolver
            .resolve_descriptor(name)
            .ok_or_else(|| ApiMethodError::Configuration(format!("No API method declared with name '{}'", name)))?;
        Ok(Self::builder(descriptor, executor))
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn content_kind(&self) -> ContentKind {
        self.descriptor.content_kind
    }

    /// Status declared as success for this method
    pub fn successful_status(&self) -> Result<ExpectedStatus> {
        self.successful_status.ok_or_else(|| {
            ApiMethodError::Configuration(format!(
                "Method '{}' declares no successful status",
                self.descriptor.name
            ))
        })
    }

    // ---- templates ----

    pub fn set_request_template(&mut self, template: impl Into<TemplateRef>) {
        self.request_template = Some(template.into());
    }

    pub fn set_response_template(&mut self, template: impl Into<TemplateRef>) {
        self.response_template = Some(template.into());
    }

    pub fn clear_request_template(&mut self) {
        self.request_template = None;
    }

    pub fn clear_response_template(&mut self) {
        self.response_template = None;
    }

    pub fn request_template(&self) -> Option<&TemplateRef> {
        self.request_template.as_ref()
    }

    pub fn response_template(&self) -> Option<&TemplateRef> {
        self.response_template.as_ref()
    }

    // ---- properties ----

    fn store_mut(&mut self) -> Result<&mut PropertyStore> {
        self.properties
            .as_mut()
            .ok_or_else(|| ApiMethodError::Configuration("API method properties are not initialized".to_string()))
    }

    pub fn properties(&self) -> Result<&PropertyStore> {
        self.properties
            .as_ref()
            .ok_or_else(|| ApiMethodError::Configuration("API method properties are not initialized".to_string()))
    }

    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Result<()> {
        self.store_mut()?.set(key, value)
    }

    pub fn remove_property(&mut self, key: &str) -> Result<()> {
        self.store_mut()?.remove(key);
        Ok(())
    }

    /// Replace every stored value with `entries`, processed by the current processors
    pub fn set_properties<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let store = self.store_mut()?;
        store.clear();
        store.set_all(entries)
    }

    pub fn set_properties_file(&mut self, path: &Path) -> Result<()> {
        let values = load_properties(path)?;
        self.set_properties(values)?;
        log::info!("Base properties loaded: {}", path.display());
        Ok(())
    }

    /// Install `store`, replacing the current one
    pub fn replace_properties(&mut self, store: PropertyStore) {
        self.properties = Some(store);
    }

    /// Move the store out; accessors fail until a store is installed again
    pub fn take_properties(&mut self) -> Option<PropertyStore> {
        self.properties.take()
    }

    /// Skip processors of `kind` for subsequent writes; refused after the first render
    pub fn ignore_processor(&mut self, kind: ProcessorKind) -> Result<()> {
        self.store_mut()?.ignore_processor(kind)
    }

    // ---- request shaping ----

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.shift_remove(name);
    }

    pub fn add_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    /// Authenticate with a session id cookie
    pub fn set_auth(&mut self, session_id: &str) {
        self.add_cookie(SESSION_COOKIE, session_id);
    }

    /// Substitute `${name}` in the URL with `value`
    pub fn replace_url_placeholder(&mut self, name: &str, value: impl ToString) {
        self.url_placeholders.insert(name.to_string(), value.to_string());
    }

    /// Assert this status after every `call`
    pub fn expect_status(&mut self, status: ExpectedStatus) {
        self.expected_status = Some(status);
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// URL with every placeholder substituted
    pub fn url(&self) -> Result<String> {
        let mut missing = Vec::new();
        let url = url_placeholder_regex().replace_all(&self.descriptor.url, |caps: &Captures| {
            match self.url_placeholders.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.push(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });

        if !missing.is_empty() {
            return Err(ApiMethodError::Configuration(format!(
                "URL placeholder(s) not replaced for method '{}': {}",
                self.descriptor.name,
                missing.join(", ")
            )));
        }
        Ok(url.into_owned())
    }

    // ---- calls ----

    fn render(&mut self, template: &TemplateRef) -> Result<String> {
        match self.properties.as_mut() {
            Some(store) => {
                store.seal();
                self.renderer.render(template, store)
            }
            None => self.renderer.render(template, &PropertyStore::new()),
        }
    }

    fn build_request(&mut self) -> Result<HttpRequest> {
        let body = match self.request_template.clone() {
            Some(template) => Some(self.render(&template)?),
            None => None,
        };

        let mut headers: HashMap<String, String> = self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if body.is_some() && !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            let content_type = match self.content_kind() {
                ContentKind::Json => "application/json",
                ContentKind::Xml => "application/xml",
            };
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("Cookie".to_string(), cookie);
        }

        Ok(HttpRequest {
            method: self.descriptor.method,
            url: self.url()?,
            headers,
            body,
            timeout: self.timeout,
        })
    }

    /// One request/response exchange; the body is captured before anything inspects it
    pub(crate) async fn exchange(&mut self) -> Result<(HttpRequest, HttpResponse)> {
        let request = self.build_request()?;
        let response = self.executor.execute(request.clone()).await?;
        self.last_body = Some(response.body_text().into_owned());
        self.last_response = Some(response.clone());
        Ok((request, response))
    }

    /// Render, send, capture the body and check the expected status if one is set
    pub async fn call(&mut self) -> Result<HttpResponse> {
        let (request, response) = self.exchange().await?;
        log_exchange(log::Level::Info, &request, &response);

        if let Some(expected) = self.expected_status {
            if !expected.matches(response.status_code) {
                return Err(ApiMethodError::ResponseMismatch {
                    diff: format!(
                        "Expected status: {}\n     got: {}\n{}",
                        expected,
                        response.status_code,
                        response.body_text()
                    ),
                });
            }
        }
        Ok(response)
    }

    /// Call and assert the method's declared successful status
    pub async fn call_expecting_success(&mut self) -> Result<HttpResponse> {
        let status = self.successful_status()?;
        self.expect_status(status);
        self.call().await
    }

    /// Poll builder; nothing is sent until `execute` is awaited
    pub fn call_with_retry(&mut self) -> MethodPoller<'_> {
        MethodPoller::new(self)
    }

    pub fn last_response(&self) -> Option<&HttpResponse> {
        self.last_response.as_ref()
    }

    pub fn last_response_body(&self) -> Option<&str> {
        self.last_body.as_deref()
    }

    // ---- validation ----

    fn actual_body(&self) -> Result<&str> {
        self.last_body
            .as_deref()
            .ok_or_else(|| PreconditionError::NoResponseBody.into())
    }

    /// Compare the captured body with the rendered response template
    pub fn validate(&mut self, spec: &ComparisonSpec) -> Result<()> {
        let template = self.response_template.clone().ok_or_else(|| {
            ApiMethodError::Configuration(format!(
                "Method '{}' has no response template to validate against",
                self.descriptor.name
            ))
        })?;
        self.actual_body()?;

        let validator = ResponseValidator::new(self.content_kind());
        validator.check_preconditions(spec)?;
        let expected = self.render(&template)?;
        validator.compare(template.as_str(), &expected, self.actual_body()?, spec)
    }

    /// Default validation: JSON non-extensible, XML strict
    pub fn validate_response(&mut self, flags: impl IntoIterator<Item = ContainmentFlag>) -> Result<()> {
        let spec = match self.content_kind() {
            ContentKind::Json => ComparisonSpec::json(JsonCompareMode::NonExtensible),
            ContentKind::Xml => ComparisonSpec::xml(XmlCompareMode::Strict),
        }
        .with_flags(flags);
        self.validate(&spec)
    }

    pub fn validate_json_response(
        &mut self,
        mode: JsonCompareMode,
        flags: impl IntoIterator<Item = ContainmentFlag>,
    ) -> Result<()> {
        self.validate(&ComparisonSpec::json(mode).with_flags(flags))
    }

    /// Non-extensible comparison with extra field rules
    pub fn validate_response_with_context(
        &mut self,
        context: ComparatorContext,
        flags: impl IntoIterator<Item = ContainmentFlag>,
    ) -> Result<()> {
        let spec = ComparisonSpec::json(JsonCompareMode::NonExtensible)
            .with_context(context)
            .with_flags(flags);
        self.validate(&spec)
    }

    pub fn validate_xml_response(&mut self, mode: XmlCompareMode) -> Result<()> {
        self.validate(&ComparisonSpec::xml(mode))
    }

    /// Schema validation: JSON schemas are rendered like templates, XSDs are read as-is
    pub fn validate_against_schema(&mut self, schema: impl Into<TemplateRef>) -> Result<()> {
        match self.content_kind() {
            ContentKind::Json => self.validate_against_rendered_schema(schema),
            ContentKind::Xml => self.validate_against_literal_schema(schema),
        }
    }

    /// Render the schema through the template renderer, then validate
    pub fn validate_against_rendered_schema(&mut self, schema: impl Into<TemplateRef>) -> Result<()> {
        let schema = schema.into();
        self.actual_body()?;
        let text = self.render(&schema)?;
        ResponseValidator::new(self.content_kind()).check_schema(schema.as_str(), &text, self.actual_body()?)
    }

    /// Read the schema resource verbatim, then validate
    pub fn validate_against_literal_schema(&mut self, schema: impl Into<TemplateRef>) -> Result<()> {
        let schema = schema.into();
        let actual = self.actual_body()?;
        let text = self.renderer.locator().read_to_string(schema.as_str())?;
        ResponseValidator::new(self.content_kind()).check_schema(schema.as_str(), &text, actual)
    }
}

/// Log one exchange at `level`
pub(crate) fn log_exchange(level: log::Level, request: &HttpRequest, response: &HttpResponse) {
    if !log::log_enabled!(level) {
        return;
    }
    let mut message = format!("Request: {} {}", request.method, request.url);
    if let Some(body) = &request.body {
        message.push('\n');
        message.push_str(body);
    }
    log::log!(level, "{}", message);
    log::log!(
        level,
        "Response: HTTP {} in {:?}\n{}",
        response.status_code,
        response.duration,
        response.body_text()
    );
}
