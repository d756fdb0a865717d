use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ApiMethodError, Result};
use crate::properties::PropertyStore;

/// Logical path of a request template, response template or schema document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRef(String);

impl TemplateRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TemplateRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for TemplateRef {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Locates text resources relative to a root directory
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    root: PathBuf,
}

impl Default for ResourceLocator {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ResourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root; absolute paths are taken as-is
    pub fn locate(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        if resolved.is_file() {
            Ok(resolved)
        } else {
            Err(ApiMethodError::ResourceNotFound {
                path: resolved.display().to_string(),
            })
        }
    }

    pub fn read_to_string(&self, path: &str) -> Result<String> {
        let resolved = self.locate(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| ApiMethodError::resource_load(resolved.display().to_string(), e))
    }
}

/// Renders `{{placeholder}}` templates against a property store.
///
/// Strict: a placeholder without a matching property fails the render.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    locator: ResourceLocator,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(ResourceLocator::default())
    }
}

impl TemplateRenderer {
    pub fn new(locator: ResourceLocator) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // payloads are JSON/XML, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars, locator }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// Load the template behind `template` and render it
    pub fn render(&self, template: &TemplateRef, properties: &PropertyStore) -> Result<String> {
        let source = self.locator.read_to_string(template.as_str())?;
        self.render_str(template.as_str(), &source, properties)
    }

    /// Render template text already in memory; `name` is used in error messages
    pub fn render_str(&self, name: &str, source: &str, properties: &PropertyStore) -> Result<String> {
        let rendered = self
            .handlebars
            .render_template(source, &properties.to_context())
            .map_err(|e| ApiMethodError::TemplateRender {
                template: name.to_string(),
                message: e.to_string(),
            })?;
        log::trace!("Rendered template {}:\n{}", name, rendered);
        Ok(rendered)
    }
}
