//! Configuration Management
//!
//! Layered loading: defaults, then each configuration file in the order it was added,
//! then `APIVERIFY_*` environment variables. The merged result is validated before use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::api_method::{ApiMethod, ApiMethodBuilder};
use crate::descriptor::{MethodCatalog, MethodResolver};
use crate::error::{ConfigurationError, Result as ApiResult};
use crate::poller::{LogStrategy, PollSpec};
use crate::processors::{CryptoProcessor, DEFAULT_CRYPTO_KEY_ENV};
use crate::properties::PropertyStore;
use crate::rest_client::RestClientConfig;
use crate::template::{ResourceLocator, TemplateRenderer};
use crate::transport::HttpExecutor;

pub type Result<T> = std::result::Result<T, ConfigurationError>;

pub const ENV_PREFIX: &str = "APIVERIFY_";

/// Poll defaults used by `call` when polling is requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub log_strategy: LogStrategy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_ms: 30_000,
            log_strategy: LogStrategy::All,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Substituted for `${base_url}` in method URLs
    pub base_url: Option<String>,
    /// Root that template, schema and properties paths are resolved against
    pub resource_root: PathBuf,
    /// Properties loaded into every method's store
    pub properties_file: Option<PathBuf>,
    pub request_timeout_ms: u64,
    pub poll: PollConfig,
    /// Environment variable holding the base64 AES-256 key for `{crypt:...}` values
    pub crypto_key_env: String,
    pub methods: MethodCatalog,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_url: None,
            resource_root: PathBuf::from("."),
            properties_file: None,
            request_timeout_ms: 30_000,
            poll: PollConfig::default(),
            crypto_key_env: DEFAULT_CRYPTO_KEY_ENV.to_string(),
            methods: MethodCatalog::new(),
        }
    }
}

impl Configuration {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::new(&self.resource_root)
    }

    pub fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(self.locator())
    }

    pub fn rest_client_config(&self) -> RestClientConfig {
        RestClientConfig {
            default_timeout: self.request_timeout(),
            ..RestClientConfig::default()
        }
    }

    pub fn poll_spec(&self) -> PollSpec {
        PollSpec {
            log_strategy: self.poll.log_strategy,
            ..PollSpec::new(
                Duration::from_millis(self.poll.interval_ms),
                Duration::from_millis(self.poll.timeout_ms),
            )
        }
    }

    /// Store with the standard processors, preloaded from `properties_file` when set
    pub fn property_store(&self) -> ApiResult<PropertyStore> {
        let crypto = CryptoProcessor::from_env(&self.crypto_key_env)?;
        let mut store = PropertyStore::with_default_processors(crypto);
        if let Some(file) = &self.properties_file {
            let path = self.locator().locate(&file.to_string_lossy())?;
            store.set_all(crate::properties::load_properties(&path)?)?;
            log::info!("Base properties loaded: {}", path.display());
        }
        Ok(store)
    }

    /// Builder for the declared method `name`, wired with this configuration
    pub fn method(&self, name: &str, executor: Arc<dyn HttpExecutor>) -> ApiResult<ApiMethodBuilder> {
        let mut builder = ApiMethod::resolve(name, &self.methods, executor)?
            .renderer(self.renderer())
            .properties(self.property_store()?)
            .timeout(self.request_timeout());
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url.clone());
        }
        Ok(builder)
    }
}

/// Configuration manager with layered loading
#[derive(Debug, Default)]
pub struct ConfigurationManager {
    config: Configuration,
    /// Configuration files, lowest precedence first
    config_paths: Vec<PathBuf>,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration file; later files override earlier ones
    pub fn add_config_path<P: AsRef<Path>>(&mut self, path: P) {
        self.config_paths.push(path.as_ref().to_path_buf());
    }

    /// Load configuration from all configured paths and the environment
    pub async fn load_configuration(&mut self) -> Result<()> {
        let mut merged = Configuration::default();

        for path in &self.config_paths {
            let file_config = Self::load_config_file(path).await?;
            merged = Self::merge_configurations(merged, file_config);
            log::debug!("Configuration loaded from {}", path.display());
        }

        merged = Self::apply_environment_overrides(merged, |name| std::env::var(name).ok())?;
        Self::validate_configuration(&merged)?;

        self.config = merged;
        Ok(())
    }

    pub fn get_configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn into_configuration(self) -> Configuration {
        self.config
    }

    async fn load_config_file(path: &Path) -> Result<Configuration> {
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound { path: path.to_path_buf() });
        }
        let content = tokio::fs::read_to_string(path).await?;

        let invalid = |e: &dyn std::fmt::Display| ConfigurationError::InvalidFormat {
            message: format!("{}: {}", path.display(), e),
        };
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| invalid(&e)),
            Some("json") => serde_json::from_str(&content).map_err(|e| invalid(&e)),
            Some("toml") => toml::from_str(&content).map_err(|e| invalid(&e)),
            _ => Err(ConfigurationError::InvalidFormat {
                message: format!("Unsupported config file format: {}", path.display()),
            }),
        }
    }

    /// Merge two configurations; values in `override_config` that differ from the
    /// defaults take precedence
    fn merge_configurations(mut base: Configuration, override_config: Configuration) -> Configuration {
        let defaults = Configuration::default();

        if override_config.base_url.is_some() {
            base.base_url = override_config.base_url;
        }
        if override_config.resource_root != defaults.resource_root {
            base.resource_root = override_config.resource_root;
        }
        if override_config.properties_file.is_some() {
            base.properties_file = override_config.properties_file;
        }
        if override_config.request_timeout_ms != defaults.request_timeout_ms {
            base.request_timeout_ms = override_config.request_timeout_ms;
        }
        if override_config.poll.interval_ms != defaults.poll.interval_ms {
            base.poll.interval_ms = override_config.poll.interval_ms;
        }
        if override_config.poll.timeout_ms != defaults.poll.timeout_ms {
            base.poll.timeout_ms = override_config.poll.timeout_ms;
        }
        if override_config.poll.log_strategy != defaults.poll.log_strategy {
            base.poll.log_strategy = override_config.poll.log_strategy;
        }
        if override_config.crypto_key_env != defaults.crypto_key_env {
            base.crypto_key_env = override_config.crypto_key_env;
        }
        base.methods.merge(override_config.methods);

        base
    }

    /// Apply `APIVERIFY_*` overrides read through `lookup`
    fn apply_environment_overrides<F>(mut config: Configuration, lookup: F) -> Result<Configuration>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };
        let millis = |(name, value): (String, String)| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigurationError::InvalidEnvironmentValue { name, message: e.to_string() })
        };

        if let Some((_, base_url)) = var("BASE_URL") {
            config.base_url = Some(base_url);
        }
        if let Some((_, root)) = var("RESOURCE_ROOT") {
            config.resource_root = PathBuf::from(root);
        }
        if let Some((_, file)) = var("PROPERTIES_FILE") {
            config.properties_file = Some(PathBuf::from(file));
        }
        if let Some(entry) = var("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = millis(entry)?;
        }
        if let Some(entry) = var("POLL_INTERVAL_MS") {
            config.poll.interval_ms = millis(entry)?;
        }
        if let Some(entry) = var("POLL_TIMEOUT_MS") {
            config.poll.timeout_ms = millis(entry)?;
        }
        if let Some((name, value)) = var("LOG_STRATEGY") {
            config.poll.log_strategy = value
                .parse()
                .map_err(|message| ConfigurationError::InvalidEnvironmentValue { name, message })?;
        }

        Ok(config)
    }

    /// Validate configuration for consistency and required values
    fn validate_configuration(config: &Configuration) -> Result<()> {
        let mut errors = Vec::new();

        if config.request_timeout_ms == 0 {
            errors.push("request_timeout_ms must be greater than 0".to_string());
        }
        if config.poll.interval_ms == 0 {
            errors.push("poll.interval_ms must be greater than 0".to_string());
        }
        if config.poll.timeout_ms < config.poll.interval_ms {
            errors.push("poll.timeout_ms must not be shorter than poll.interval_ms".to_string());
        }
        if let Some(base_url) = &config.base_url {
            if let Err(e) = reqwest::Url::parse(base_url) {
                errors.push(format!("Invalid base_url '{}': {}", base_url, e));
            }
        }
        if config.crypto_key_env.trim().is_empty() {
            errors.push("crypto_key_env must not be empty".to_string());
        }

        for name in config.methods.names() {
            let Some(descriptor) = config.methods.resolve_descriptor(name) else { continue };
            if descriptor.name != name {
                errors.push(format!("Method '{}' is declared under key '{}'", descriptor.name, name));
            }
            if descriptor.url.trim().is_empty() {
                errors.push(format!("Method '{}' has an empty url", name));
            }
            if descriptor.url.contains("${base_url}") && config.base_url.is_none() {
                errors.push(format!("Method '{}' uses ${{base_url}} but no base_url is configured", name));
            }
        }

        if !errors.is_empty() {
            return Err(ConfigurationError::ValidationFailed { errors });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpMethod;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_default_configuration() {
        let manager = ConfigurationManager::new();
        let config = manager.get_configuration();

        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.poll.interval_ms, 1000);
        assert_eq!(config.crypto_key_env, DEFAULT_CRYPTO_KEY_ENV);
        assert!(config.methods.is_empty());
    }

    #[tokio::test]
    async fn test_load_yaml_configuration() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("apiverify.yaml");

        let yaml_content = r#"
base_url: "http://localhost:8080"
resource_root: "resources"
request_timeout_ms: 5000
poll:
  interval_ms: 200
  timeout_ms: 2000
  log_strategy: last_only
methods:
  get_user:
    name: get_user
    method: GET
    url: "${base_url}/users/${id}"
    response_template: api/users/_get/rs.json
    successful_status: 200
"#;
        fs::write(&config_path, yaml_content).await.unwrap();

        let mut manager = ConfigurationManager::new();
        manager.add_config_path(&config_path);
        manager.load_configuration().await.unwrap();

        let config = manager.get_configuration();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.resource_root, PathBuf::from("resources"));
        assert_eq!(config.poll.log_strategy, LogStrategy::LastOnly);
        assert_eq!(config.poll_spec().interval, Duration::from_millis(200));
        assert_eq!(config.methods.get("get_user").map(|m| m.method), Some(HttpMethod::GET));
    }

    #[tokio::test]
    async fn test_configuration_merging() {
        let temp_dir = TempDir::new().unwrap();

        let base_path = temp_dir.path().join("base.toml");
        fs::write(
            &base_path,
            r#"
base_url = "http://base:8080"
request_timeout_ms = 10000

[methods.ping]
name = "ping"
method = "HEAD"
url = "${base_url}/ping"
"#,
        )
        .await
        .unwrap();

        let override_path = temp_dir.path().join("override.json");
        fs::write(
            &override_path,
            r#"{"base_url": "http://override:9090", "methods": {"health": {"name": "health", "method": "GET", "url": "${base_url}/health"}}}"#,
        )
        .await
        .unwrap();

        let mut manager = ConfigurationManager::new();
        manager.add_config_path(&base_path);
        manager.add_config_path(&override_path);
        manager.load_configuration().await.unwrap();

        let config = manager.get_configuration();
        assert_eq!(config.base_url.as_deref(), Some("http://override:9090"));
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.methods.names().collect::<Vec<_>>(), vec!["ping", "health"]);
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_files() {
        let temp_dir = TempDir::new().unwrap();

        let mut manager = ConfigurationManager::new();
        manager.add_config_path(temp_dir.path().join("absent.yaml"));
        assert!(matches!(
            manager.load_configuration().await,
            Err(ConfigurationError::FileNotFound { .. })
        ));

        let ini = temp_dir.path().join("config.ini");
        fs::write(&ini, "a=b").await.unwrap();
        let mut manager = ConfigurationManager::new();
        manager.add_config_path(&ini);
        assert!(matches!(
            manager.load_configuration().await,
            Err(ConfigurationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("APIVERIFY_BASE_URL", "http://env:1234"),
            ("APIVERIFY_POLL_TIMEOUT_MS", "500"),
            ("APIVERIFY_LOG_STRATEGY", "none"),
        ]
        .into_iter()
        .collect();

        let config = ConfigurationManager::apply_environment_overrides(Configuration::default(), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://env:1234"));
        assert_eq!(config.poll.timeout_ms, 500);
        assert_eq!(config.poll.log_strategy, LogStrategy::None);

        let err = ConfigurationManager::apply_environment_overrides(Configuration::default(), |name| {
            (name == "APIVERIFY_REQUEST_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidEnvironmentValue { name, .. } if name == "APIVERIFY_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Configuration::default();
        config.poll.interval_ms = 0;
        config.methods.register(crate::descriptor::MethodDescriptor::new(
            "ping",
            HttpMethod::GET,
            "${base_url}/ping",
        ));

        match ConfigurationManager::validate_configuration(&config) {
            Err(ConfigurationError::ValidationFailed { errors }) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[1].contains("no base_url"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
