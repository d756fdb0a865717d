use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::template::TemplateRef;
use crate::transport::{ExpectedStatus, HttpMethod};
use crate::validation::ContentKind;

/// Static declaration of one API method: endpoint, payload kind, templates and
/// the status a successful call returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub method: HttpMethod,
    /// May contain `${name}` placeholders, `${base_url}` included
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_template: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_status: Option<ExpectedStatus>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            headers: IndexMap::new(),
            content_kind: ContentKind::default(),
            request_template: None,
            response_template: None,
            successful_status: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn with_request_template(mut self, template: impl Into<TemplateRef>) -> Self {
        self.request_template = Some(template.into());
        self
    }

    pub fn with_response_template(mut self, template: impl Into<TemplateRef>) -> Self {
        self.response_template = Some(template.into());
        self
    }

    pub fn with_successful_status(mut self, status: ExpectedStatus) -> Self {
        self.successful_status = Some(status);
        self
    }
}

/// Looks up per-method declarations by method name. Every lookup may come back empty.
pub trait MethodResolver: Send + Sync {
    fn resolve_descriptor(&self, method: &str) -> Option<MethodDescriptor>;

    fn resolve_request_template_path(&self, method: &str) -> Option<TemplateRef> {
        self.resolve_descriptor(method).and_then(|d| d.request_template)
    }

    fn resolve_response_template_path(&self, method: &str) -> Option<TemplateRef> {
        self.resolve_descriptor(method).and_then(|d| d.response_template)
    }

    fn resolve_successful_status(&self, method: &str) -> Option<ExpectedStatus> {
        self.resolve_descriptor(method).and_then(|d| d.successful_status)
    }
}

/// In-memory set of descriptors, usually loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodCatalog {
    methods: IndexMap<String, MethodDescriptor>,
}

impl MethodCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the descriptor registered under its name
    pub fn register(&mut self, descriptor: MethodDescriptor) {
        self.methods.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Merge `other` into this catalog; descriptors in `other` win
    pub fn merge(&mut self, other: MethodCatalog) {
        for (_, descriptor) in other.methods {
            self.register(descriptor);
        }
    }
}

impl FromIterator<MethodDescriptor> for MethodCatalog {
    fn from_iter<I: IntoIterator<Item = MethodDescriptor>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for descriptor in iter {
            catalog.register(descriptor);
        }
        catalog
    }
}

impl MethodResolver for MethodCatalog {
    fn resolve_descriptor(&self, method: &str) -> Option<MethodDescriptor> {
        self.methods.get(method).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StatusClass;

    #[test]
    fn test_catalog_resolution() {
        let catalog: MethodCatalog = vec![
            MethodDescriptor::new("get_user", HttpMethod::GET, "${base_url}/users/${id}")
                .with_response_template("api/users/_get/rs.json")
                .with_successful_status(ExpectedStatus::Class(StatusClass::Success)),
            MethodDescriptor::new("ping", HttpMethod::HEAD, "${base_url}/ping"),
        ]
        .into_iter()
        .collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.resolve_response_template_path("get_user"),
            Some(TemplateRef::new("api/users/_get/rs.json"))
        );
        assert_eq!(catalog.resolve_request_template_path("get_user"), None);
        assert_eq!(catalog.resolve_successful_status("ping"), None);
        assert!(catalog.resolve_descriptor("missing").is_none());
    }

    #[test]
    fn test_descriptor_from_yaml() {
        let yaml = r#"
create_user:
  name: create_user
  method: POST
  url: "${base_url}/users"
  content_kind: xml
  request_template: api/users/_post/rq.xml
  successful_status: "2xx"
  headers:
    X-Trace: "on"
"#;
        let catalog: MethodCatalog = serde_yaml::from_str(yaml).unwrap();
        let descriptor = catalog.get("create_user").unwrap();
        assert_eq!(descriptor.method, HttpMethod::POST);
        assert_eq!(descriptor.content_kind, ContentKind::Xml);
        assert_eq!(descriptor.successful_status, Some(ExpectedStatus::Class(StatusClass::Success)));
        assert_eq!(descriptor.headers.get("X-Trace").map(String::as_str), Some("on"));
    }
}
