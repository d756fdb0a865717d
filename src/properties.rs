//! Property store feeding template rendering
//!
//! Values are processed once, when written. The store keeps insertion order so that
//! debug output and rendered contexts are deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ApiMethodError, Result};
use crate::processors::{CryptoProcessor, EnvProcessor, GenerateProcessor, ProcessorKind, PropertyProcessor};

/// A stored property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            PropertyValue::Bool(b) => JsonValue::Bool(*b),
            PropertyValue::Integer(i) => JsonValue::from(*i),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            PropertyValue::String(s) => JsonValue::String(s.clone()),
        }
    }

    fn from_json_scalar(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Bool(b) => Some(PropertyValue::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(PropertyValue::Integer)
                .or_else(|| n.as_f64().map(PropertyValue::Float)),
            JsonValue::String(s) => Some(PropertyValue::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// Ordered key/value store with write-time processors
#[derive(Clone, Default)]
pub struct PropertyStore {
    values: IndexMap<String, PropertyValue>,
    processors: Vec<Arc<dyn PropertyProcessor>>,
    ignored: HashSet<ProcessorKind>,
    sealed: bool,
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("values", &self.values)
            .field("processors", &self.processors.iter().map(|p| p.kind()).collect::<Vec<_>>())
            .field("ignored", &self.ignored)
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl PropertyStore {
    /// Empty store without processors
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the standard processors: crypto, generate, env
    pub fn with_default_processors(crypto: CryptoProcessor) -> Self {
        Self::new()
            .with_processor(Arc::new(crypto))
            .with_processor(Arc::new(GenerateProcessor))
            .with_processor(Arc::new(EnvProcessor))
    }

    pub fn with_processor(mut self, processor: Arc<dyn PropertyProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Skip processors of `kind` on subsequent writes. Refused once the store has been rendered.
    pub fn ignore_processor(&mut self, kind: ProcessorKind) -> Result<()> {
        if self.sealed {
            return Err(ApiMethodError::Configuration(format!(
                "Processor '{}' can't be ignored after properties were used for rendering",
                kind
            )));
        }
        self.ignored.insert(kind);
        Ok(())
    }

    pub fn ignored_processors(&self) -> &HashSet<ProcessorKind> {
        &self.ignored
    }

    /// Freeze the ignored-processor set; called before the first render
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Process and store `value` under `key`, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Result<()> {
        let key = key.into();
        let mut value = value.into();
        for processor in &self.processors {
            if self.ignored.contains(&processor.kind()) {
                continue;
            }
            value = processor.transform(&key, value)?;
        }
        log::trace!("Property set: {} = {}", key, value);
        self.values.insert(key, value);
        Ok(())
    }

    /// Drop every value, keeping processors and the ignored set
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn set_all<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.values.shift_remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.values.iter()
    }

    /// Rendering context. Dotted keys are also exposed as nested objects so that
    /// `{{user.name}}` resolves a `user.name` property.
    pub fn to_context(&self) -> JsonValue {
        let mut root = serde_json::Map::new();
        for (key, value) in &self.values {
            root.insert(key.clone(), value.to_json());
        }
        for (key, value) in &self.values {
            if key.contains('.') {
                insert_nested(&mut root, key.split('.').collect::<Vec<_>>().as_slice(), value.to_json());
            }
        }
        JsonValue::Object(root)
    }
}

fn insert_nested(map: &mut serde_json::Map<String, JsonValue>, path: &[&str], value: JsonValue) {
    match path {
        [] => {}
        [last] => {
            map.entry(last.to_string()).or_insert(value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            // a scalar already occupies this segment; keep it and skip the nested form
            if let JsonValue::Object(child) = entry {
                insert_nested(child, rest, value);
            }
        }
    }
}

/// Read a properties resource into ordered raw entries.
///
/// `.properties` files use `key=value` / `key: value` lines; `.yaml`, `.yml`, `.json` and
/// `.toml` files are flattened into dotted keys.
pub fn load_properties(path: &Path) -> Result<IndexMap<String, PropertyValue>> {
    let display = path.display().to_string();
    if !path.is_file() {
        return Err(ApiMethodError::ResourceNotFound { path: display });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ApiMethodError::resource_load(&display, e))?;

    let entries = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => {
            let yaml: serde_yaml::Value =
                serde_yaml::from_str(&content).map_err(|e| ApiMethodError::resource_load(&display, e))?;
            let json = serde_json::to_value(yaml).map_err(|e| ApiMethodError::resource_load(&display, e))?;
            flatten_document(&json, &display)?
        }
        Some("json") => {
            let json: JsonValue =
                serde_json::from_str(&content).map_err(|e| ApiMethodError::resource_load(&display, e))?;
            flatten_document(&json, &display)?
        }
        Some("toml") => {
            let toml_value: toml::Value =
                toml::from_str(&content).map_err(|e| ApiMethodError::resource_load(&display, e))?;
            let json = serde_json::to_value(toml_value).map_err(|e| ApiMethodError::resource_load(&display, e))?;
            flatten_document(&json, &display)?
        }
        _ => parse_properties_text(&content),
    };

    log::info!("Base properties loaded: {} ({} entries)", display, entries.len());
    Ok(entries)
}

fn flatten_document(document: &JsonValue, path: &str) -> Result<IndexMap<String, PropertyValue>> {
    let JsonValue::Object(map) = document else {
        return Err(ApiMethodError::resource_load(path, "top level must be a mapping"));
    };
    let mut entries = IndexMap::new();
    for (key, value) in map {
        flatten_into(&mut entries, key.clone(), value);
    }
    Ok(entries)
}

fn flatten_into(entries: &mut IndexMap<String, PropertyValue>, prefix: String, value: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                flatten_into(entries, format!("{}.{}", prefix, key), child);
            }
        }
        JsonValue::Array(_) => {
            entries.insert(prefix, PropertyValue::String(value.to_string()));
        }
        JsonValue::Null => {
            entries.insert(prefix, PropertyValue::String(String::new()));
        }
        scalar => {
            if let Some(converted) = PropertyValue::from_json_scalar(scalar) {
                entries.insert(prefix, converted);
            }
        }
    }
}

/// Parse `.properties` text: comments start with `#` or `!`, a trailing `\` continues the line
fn parse_properties_text(content: &str) -> IndexMap<String, PropertyValue> {
    let mut entries = IndexMap::new();
    let mut pending = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_start();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);

        let logical = std::mem::take(&mut pending);
        let separator = logical.find(|c| c == '=' || c == ':');
        let (key, value) = match separator {
            Some(idx) => (logical[..idx].trim(), logical[idx + 1..].trim()),
            None => (logical.trim(), ""),
        };
        if !key.is_empty() {
            entries.insert(key.to_string(), PropertyValue::String(value.to_string()));
        }
    }

    entries
}
