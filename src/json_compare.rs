//! Exemplar comparison of JSON documents
//!
//! The expected document drives the walk. Every difference is collected so a failed
//! validation reports all mismatches at once, JSONAssert style:
//!
//! ```text
//! user.email
//! Expected: "john@example.com"
//!      got: "jane@example.com"
//! ```
//!
//! Expected string values may carry keywords: `skip`, `type:<Kind>`, `regex:<pattern>` and
//! `predicate:<name>` (resolved from the [`ComparatorContext`]).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const SKIP_KEYWORD: &str = "skip";
const TYPE_KEYWORD: &str = "type:";
const REGEX_KEYWORD: &str = "regex:";
const PREDICATE_KEYWORD: &str = "predicate:";
const ARRAY_CONTAINS_FLAG: &str = "array_contains";

/// How strictly two JSON documents are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonCompareMode {
    /// No extra fields, array order matters
    Strict,
    /// Extra fields tolerated, array order ignored
    Lenient,
    /// No extra fields, array order ignored
    NonExtensible,
    /// Extra fields tolerated, array order matters
    StrictOrder,
}

impl JsonCompareMode {
    pub fn is_extensible(&self) -> bool {
        matches!(self, JsonCompareMode::Lenient | JsonCompareMode::StrictOrder)
    }

    pub fn has_strict_order(&self) -> bool {
        matches!(self, JsonCompareMode::Strict | JsonCompareMode::StrictOrder)
    }
}

impl Default for JsonCompareMode {
    fn default() -> Self {
        JsonCompareMode::NonExtensible
    }
}

impl FromStr for JsonCompareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(JsonCompareMode::Strict),
            "lenient" => Ok(JsonCompareMode::Lenient),
            "non_extensible" => Ok(JsonCompareMode::NonExtensible),
            "strict_order" => Ok(JsonCompareMode::StrictOrder),
            other => Err(format!("Unknown JSON compare mode: {}", other)),
        }
    }
}

/// One step of a location inside a JSON document
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Pattern over document locations: `a.b[0].c`, with `*` / `[*]` wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Key(String),
    AnyKey,
    Index(usize),
    AnyIndex,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let trimmed = pattern.trim().trim_start_matches('$').trim_start_matches('.');
        for part in trimmed.split('.').filter(|p| !p.is_empty()) {
            let (name, indexes) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };
            match name {
                "" => {}
                "*" => segments.push(PatternSegment::AnyKey),
                key => segments.push(PatternSegment::Key(key.to_string())),
            }
            for index in indexes.split('[').filter(|s| !s.is_empty()) {
                let index = index.trim_end_matches(']');
                match index.parse::<usize>() {
                    Ok(i) => segments.push(PatternSegment::Index(i)),
                    Err(_) => segments.push(PatternSegment::AnyIndex),
                }
            }
        }
        Self { segments }
    }

    fn matches(&self, path: &[Segment]) -> bool {
        self.segments.len() == path.len()
            && self.segments.iter().zip(path).all(|(pattern, segment)| match (pattern, segment) {
                (PatternSegment::AnyKey, Segment::Key(_)) => true,
                (PatternSegment::Key(expected), Segment::Key(actual)) => expected == actual,
                (PatternSegment::AnyIndex, Segment::Index(_)) => true,
                (PatternSegment::Index(expected), Segment::Index(actual)) => expected == actual,
                _ => false,
            })
    }
}

fn render_path(path: &[Segment]) -> String {
    if path.is_empty() {
        return "$".to_string();
    }
    let mut rendered = String::new();
    for segment in path {
        match segment {
            Segment::Key(key) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(key);
            }
            Segment::Index(i) => rendered.push_str(&format!("[{}]", i)),
        }
    }
    rendered
}

/// Array comparison override: the expected array only has to be contained in the actual one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainmentFlag {
    /// Applies to every array, or only to the array at `path`
    ArrayContains { path: Option<String> },
}

impl ContainmentFlag {
    pub fn array_contains() -> Self {
        ContainmentFlag::ArrayContains { path: None }
    }

    pub fn array_contains_at(path: impl Into<String>) -> Self {
        ContainmentFlag::ArrayContains { path: Some(path.into()) }
    }

    fn applies_to(&self, path: &[Segment]) -> bool {
        match self {
            ContainmentFlag::ArrayContains { path: None } => true,
            ContainmentFlag::ArrayContains { path: Some(pattern) } => PathPattern::parse(pattern).matches(path),
        }
    }
}

impl FromStr for ContainmentFlag {
    type Err = String;

    /// Accepts `array_contains` or `array_contains:<path>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (name, path) = match trimmed.split_once(':') {
            Some((name, path)) => (name.trim(), Some(path.trim())),
            None => (trimmed, None),
        };
        if !name.eq_ignore_ascii_case(ARRAY_CONTAINS_FLAG) {
            return Err(format!("Unknown validation flag: {}", s));
        }
        Ok(match path.filter(|p| !p.is_empty()) {
            Some(path) => ContainmentFlag::array_contains_at(path),
            None => ContainmentFlag::array_contains(),
        })
    }
}

pub type ValuePredicate = Arc<dyn Fn(&JsonValue) -> bool + Send + Sync>;

#[derive(Clone)]
enum FieldRule {
    Ignore(PathPattern),
    Matches(PathPattern, Regex),
    Predicate(PathPattern, String),
}

/// Extra field-level rules supplied by the caller for one validation
#[derive(Clone, Default)]
pub struct ComparatorContext {
    rules: Vec<FieldRule>,
    predicates: HashMap<String, ValuePredicate>,
}

impl std::fmt::Debug for ComparatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("ComparatorContext")
            .field("rules", &self.rules.len())
            .field("predicates", &names)
            .finish()
    }
}

impl ComparatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not compare the value at `path`
    pub fn ignore(mut self, path: &str) -> Self {
        self.rules.push(FieldRule::Ignore(PathPattern::parse(path)));
        self
    }

    /// The actual value at `path` must match `regex` instead of the expected value
    pub fn matches(mut self, path: &str, regex: Regex) -> Self {
        self.rules.push(FieldRule::Matches(PathPattern::parse(path), regex));
        self
    }

    /// The actual value at `path` must satisfy the named predicate
    pub fn satisfies(mut self, path: &str, predicate: &str) -> Self {
        self.rules
            .push(FieldRule::Predicate(PathPattern::parse(path), predicate.to_string()));
        self
    }

    /// Register a predicate usable by `satisfies` rules and `predicate:<name>` keywords
    pub fn with_predicate<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&JsonValue) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.to_string(), Arc::new(predicate));
        self
    }

    fn predicate(&self, name: &str) -> Option<&ValuePredicate> {
        self.predicates.get(name)
    }
}

/// A single difference between expected and actual
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.path, self.message)
    }
}

/// Outcome of one comparison
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonResult {
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonResult {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Human-readable diff, one block per mismatch
    pub fn diff(&self) -> String {
        self.mismatches
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn describe(value: &JsonValue) -> String {
    let text = value.to_string();
    if text.len() > 200 {
        format!("{}...", &text[..text.char_indices().nth(200).map(|(i, _)| i).unwrap_or(text.len())])
    } else {
        text
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "Null",
        JsonValue::Bool(_) => "Boolean",
        JsonValue::Number(_) => "Number",
        JsonValue::String(_) => "String",
        JsonValue::Array(_) => "Array",
        JsonValue::Object(_) => "Object",
    }
}

fn numbers_equal(expected: &serde_json::Number, actual: &serde_json::Number) -> bool {
    match (expected.as_i64(), actual.as_i64()) {
        (Some(e), Some(a)) => e == a,
        _ => match (expected.as_f64(), actual.as_f64()) {
            (Some(e), Some(a)) => e == a,
            _ => expected == actual,
        },
    }
}

/// Structural JSON comparator
#[derive(Debug, Clone, Default)]
pub struct JsonComparator {
    mode: JsonCompareMode,
    flags: Vec<ContainmentFlag>,
    context: ComparatorContext,
}

impl JsonComparator {
    pub fn new(mode: JsonCompareMode) -> Self {
        Self {
            mode,
            flags: Vec::new(),
            context: ComparatorContext::default(),
        }
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = ContainmentFlag>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn with_context(mut self, context: ComparatorContext) -> Self {
        self.context = context;
        self
    }

    pub fn mode(&self) -> JsonCompareMode {
        self.mode
    }

    pub fn compare(&self, expected: &JsonValue, actual: &JsonValue) -> ComparisonResult {
        let mut result = ComparisonResult::default();
        let mut path = Vec::new();
        self.compare_at(expected, actual, &mut path, &mut result.mismatches);
        result
    }

    fn matches_silently(&self, expected: &JsonValue, actual: &JsonValue, path: &mut Vec<Segment>) -> bool {
        let mut scratch = Vec::new();
        self.compare_at(expected, actual, path, &mut scratch);
        scratch.is_empty()
    }

    fn mismatch(path: &[Segment], message: String, out: &mut Vec<Mismatch>) {
        out.push(Mismatch {
            path: render_path(path),
            message,
        });
    }

    fn value_mismatch(path: &[Segment], expected: &str, actual: &JsonValue, out: &mut Vec<Mismatch>) {
        Self::mismatch(
            path,
            format!("Expected: {}\n     got: {}", expected, describe(actual)),
            out,
        );
    }

    /// Returns true when a context rule handled this location
    fn apply_rules(&self, actual: &JsonValue, path: &[Segment], out: &mut Vec<Mismatch>) -> bool {
        for rule in &self.context.rules {
            match rule {
                FieldRule::Ignore(pattern) if pattern.matches(path) => return true,
                FieldRule::Matches(pattern, regex) if pattern.matches(path) => {
                    let text = match actual {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if !regex.is_match(&text) {
                        Self::value_mismatch(path, &format!("value matching /{}/", regex.as_str()), actual, out);
                    }
                    return true;
                }
                FieldRule::Predicate(pattern, name) if pattern.matches(path) => {
                    self.check_predicate(name, actual, path, out);
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    fn check_predicate(&self, name: &str, actual: &JsonValue, path: &[Segment], out: &mut Vec<Mismatch>) {
        match self.context.predicate(name) {
            Some(predicate) => {
                if !predicate(actual) {
                    Self::value_mismatch(path, &format!("value satisfying predicate '{}'", name), actual, out);
                }
            }
            None => Self::mismatch(path, format!("Unknown predicate '{}'", name), out),
        }
    }

    /// Returns true when `expected` was a keyword and has been evaluated
    fn apply_keyword(&self, expected: &str, actual: &JsonValue, path: &[Segment], out: &mut Vec<Mismatch>) -> bool {
        if expected == SKIP_KEYWORD {
            return true;
        }
        if let Some(kind) = expected.strip_prefix(TYPE_KEYWORD) {
            let kind = kind.trim();
            let matches = match kind.to_ascii_lowercase().as_str() {
                "integer" => actual.as_i64().is_some() || actual.as_u64().is_some(),
                "number" | "double" | "float" => actual.is_number(),
                other => type_name(actual).eq_ignore_ascii_case(other),
            };
            if !matches {
                Self::mismatch(
                    path,
                    format!("Expected type: {}\n     got: {} ({})", kind, type_name(actual), describe(actual)),
                    out,
                );
            }
            return true;
        }
        if let Some(pattern) = expected.strip_prefix(REGEX_KEYWORD) {
            match Regex::new(pattern) {
                Ok(regex) => {
                    let text = match actual {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if !regex.is_match(&text) {
                        Self::value_mismatch(path, &format!("value matching /{}/", pattern), actual, out);
                    }
                }
                Err(e) => Self::mismatch(path, format!("Invalid regex pattern '{}': {}", pattern, e), out),
            }
            return true;
        }
        if let Some(name) = expected.strip_prefix(PREDICATE_KEYWORD) {
            self.check_predicate(name.trim(), actual, path, out);
            return true;
        }
        false
    }

    fn compare_at(&self, expected: &JsonValue, actual: &JsonValue, path: &mut Vec<Segment>, out: &mut Vec<Mismatch>) {
        if self.apply_rules(actual, path, out) {
            return;
        }
        if let JsonValue::String(keyword) = expected {
            if self.apply_keyword(keyword, actual, path, out) {
                return;
            }
        }

        match (expected, actual) {
            (JsonValue::Object(expected_obj), JsonValue::Object(actual_obj)) => {
                for (key, expected_val) in expected_obj {
                    path.push(Segment::Key(key.clone()));
                    match actual_obj.get(key) {
                        Some(actual_val) => self.compare_at(expected_val, actual_val, path, out),
                        None if expected_val.as_str() == Some(SKIP_KEYWORD) => {}
                        None => {
                            if !self.apply_rules(&JsonValue::Null, path, out) {
                                Self::mismatch(path, format!("Expected: {}\n     but none found", key), out);
                            }
                        }
                    }
                    path.pop();
                }

                if !self.mode.is_extensible() {
                    for key in actual_obj.keys().filter(|k| !expected_obj.contains_key(*k)) {
                        path.push(Segment::Key(key.clone()));
                        if !self.apply_rules(&actual_obj[key], path, out) {
                            Self::mismatch(path, format!("Unexpected: {}", key), out);
                        }
                        path.pop();
                    }
                }
            }
            (JsonValue::Array(expected_arr), JsonValue::Array(actual_arr)) => {
                self.compare_arrays(expected_arr, actual_arr, path, out);
            }
            (JsonValue::Number(e), JsonValue::Number(a)) => {
                if !numbers_equal(e, a) {
                    Self::value_mismatch(path, &describe(expected), actual, out);
                }
            }
            (expected, actual) => {
                if expected != actual {
                    Self::value_mismatch(path, &describe(expected), actual, out);
                }
            }
        }
    }

    fn compare_arrays(&self, expected: &[JsonValue], actual: &[JsonValue], path: &mut Vec<Segment>, out: &mut Vec<Mismatch>) {
        let containment = self.flags.iter().any(|flag| flag.applies_to(path));

        if !containment && expected.len() != actual.len() {
            Self::mismatch(
                path,
                format!(
                    "Expected: {} values\n     got: {} values",
                    expected.len(),
                    actual.len()
                ),
                out,
            );
            return;
        }

        if !containment && self.mode.has_strict_order() {
            for (i, (expected_item, actual_item)) in expected.iter().zip(actual).enumerate() {
                path.push(Segment::Index(i));
                self.compare_at(expected_item, actual_item, path, out);
                path.pop();
            }
            return;
        }

        // order-independent: each expected item claims a distinct actual item
        let mut used = vec![false; actual.len()];
        for (i, expected_item) in expected.iter().enumerate() {
            let found = (0..actual.len()).find(|&j| {
                if used[j] {
                    return false;
                }
                path.push(Segment::Index(j));
                let ok = self.matches_silently(expected_item, &actual[j], path);
                path.pop();
                ok
            });

            match found {
                Some(j) => used[j] = true,
                None => {
                    path.push(Segment::Index(i));
                    let message = if containment {
                        format!("Expected array to contain: {}\n     but it was not found", describe(expected_item))
                    } else {
                        format!("Expected: {}\n     but none found", describe(expected_item))
                    };
                    Self::mismatch(path, message, out);
                    path.pop();
                }
            }
        }
    }
}
