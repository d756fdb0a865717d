use roxmltree::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::json_compare::{ComparisonResult, Mismatch};

/// Strictness used when comparing XML documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XmlCompareMode {
    /// Same elements, attributes, text and child order
    Strict,
    /// Child element order is ignored
    NonStrict,
    /// Attributes are ignored, child order still matters
    IgnoreAttributes,
    /// Actual may carry elements and attributes the expected document does not mention
    OnlyKnownFields,
}

impl Default for XmlCompareMode {
    fn default() -> Self {
        XmlCompareMode::Strict
    }
}

impl FromStr for XmlCompareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(XmlCompareMode::Strict),
            "non_strict" => Ok(XmlCompareMode::NonStrict),
            "ignore_attributes" => Ok(XmlCompareMode::IgnoreAttributes),
            "only_known_fields" => Ok(XmlCompareMode::OnlyKnownFields),
            other => Err(format!("Unknown XML compare mode: {}", other)),
        }
    }
}

impl XmlCompareMode {
    fn ordered_children(&self) -> bool {
        matches!(self, XmlCompareMode::Strict | XmlCompareMode::IgnoreAttributes)
    }

    fn compares_attributes(&self) -> bool {
        !matches!(self, XmlCompareMode::IgnoreAttributes)
    }

    fn allows_unknown(&self) -> bool {
        matches!(self, XmlCompareMode::OnlyKnownFields)
    }
}

/// Owned element tree built from a parsed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_node(node: roxmltree::Node) -> Self {
        let attributes = node
            .attributes()
            .map(|attr| (attr.name().to_string(), attr.value().to_string()))
            .collect();

        let text: String = node
            .children()
            .filter(|child| child.is_text())
            .filter_map(|child| child.text())
            .map(str::trim)
            .collect();

        Self {
            name: node.tag_name().name().to_string(),
            namespace: node.tag_name().namespace().map(str::to_string),
            attributes,
            text: if text.is_empty() { None } else { Some(text) },
            children: node
                .children()
                .filter(|child| child.is_element())
                .map(XmlElement::from_node)
                .collect(),
        }
    }

    fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Parse `text` into an owned element tree rooted at the document element
pub fn parse_xml(text: &str) -> Result<XmlElement, String> {
    let doc = Document::parse(text).map_err(|e| format!("Failed to parse XML: {}", e))?;
    Ok(XmlElement::from_node(doc.root_element()))
}

/// Structural XML comparator
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlComparator {
    mode: XmlCompareMode,
}

impl XmlComparator {
    pub fn new(mode: XmlCompareMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> XmlCompareMode {
        self.mode
    }

    /// Parse both documents and compare; a parse failure is reported as a mismatch
    pub fn compare_str(&self, expected: &str, actual: &str) -> Result<ComparisonResult, String> {
        let expected = parse_xml(expected).map_err(|e| format!("Expected document: {}", e))?;
        let actual = match parse_xml(actual) {
            Ok(actual) => actual,
            Err(e) => {
                return Ok(ComparisonResult {
                    mismatches: vec![Mismatch {
                        path: "/".to_string(),
                        message: format!("Actual body is not well-formed XML: {}", e),
                    }],
                })
            }
        };
        Ok(self.compare(&expected, &actual))
    }

    pub fn compare(&self, expected: &XmlElement, actual: &XmlElement) -> ComparisonResult {
        let mut result = ComparisonResult::default();
        let path = format!("/{}", expected.name);
        self.compare_elements(expected, actual, &path, &mut result.mismatches);
        result
    }

    fn matches_silently(&self, expected: &XmlElement, actual: &XmlElement, path: &str) -> bool {
        let mut scratch = Vec::new();
        self.compare_elements(expected, actual, path, &mut scratch);
        scratch.is_empty()
    }

    fn compare_elements(&self, expected: &XmlElement, actual: &XmlElement, path: &str, out: &mut Vec<Mismatch>) {
        if expected.name != actual.name || expected.namespace != actual.namespace {
            out.push(Mismatch {
                path: path.to_string(),
                message: format!(
                    "Expected element: <{}>\n     got: <{}>",
                    expected.qualified_name(),
                    actual.qualified_name()
                ),
            });
            return;
        }

        if self.mode.compares_attributes() {
            self.compare_attributes(expected, actual, path, out);
        }

        if expected.text != actual.text {
            out.push(Mismatch {
                path: format!("{}/text()", path),
                message: format!(
                    "Expected: {:?}\n     got: {:?}",
                    expected.text.as_deref().unwrap_or(""),
                    actual.text.as_deref().unwrap_or("")
                ),
            });
        }

        if self.mode.ordered_children() {
            self.compare_ordered(expected, actual, path, out);
        } else {
            self.compare_unordered(expected, actual, path, out);
        }
    }

    fn compare_attributes(&self, expected: &XmlElement, actual: &XmlElement, path: &str, out: &mut Vec<Mismatch>) {
        for (name, value) in &expected.attributes {
            match actual.attributes.get(name) {
                Some(actual_value) if actual_value == value => {}
                Some(actual_value) => out.push(Mismatch {
                    path: format!("{}/@{}", path, name),
                    message: format!("Expected: {:?}\n     got: {:?}", value, actual_value),
                }),
                None => out.push(Mismatch {
                    path: format!("{}/@{}", path, name),
                    message: format!("Expected attribute: {}\n     but none found", name),
                }),
            }
        }

        if !self.mode.allows_unknown() {
            for name in actual.attributes.keys().filter(|n| !expected.attributes.contains_key(*n)) {
                out.push(Mismatch {
                    path: format!("{}/@{}", path, name),
                    message: format!("Unexpected attribute: {}", name),
                });
            }
        }
    }

    fn compare_ordered(&self, expected: &XmlElement, actual: &XmlElement, path: &str, out: &mut Vec<Mismatch>) {
        if expected.children.len() != actual.children.len() {
            out.push(Mismatch {
                path: path.to_string(),
                message: format!(
                    "Expected: {} child element(s)\n     got: {}",
                    expected.children.len(),
                    actual.children.len()
                ),
            });
            return;
        }

        for (i, (e, a)) in expected.children.iter().zip(&actual.children).enumerate() {
            let child_path = format!("{}/{}[{}]", path, e.name, i + 1);
            self.compare_elements(e, a, &child_path, out);
        }
    }

    fn compare_unordered(&self, expected: &XmlElement, actual: &XmlElement, path: &str, out: &mut Vec<Mismatch>) {
        if !self.mode.allows_unknown() && expected.children.len() != actual.children.len() {
            out.push(Mismatch {
                path: path.to_string(),
                message: format!(
                    "Expected: {} child element(s)\n     got: {}",
                    expected.children.len(),
                    actual.children.len()
                ),
            });
            return;
        }

        let mut used = vec![false; actual.children.len()];
        for (i, e) in expected.children.iter().enumerate() {
            let child_path = format!("{}/{}[{}]", path, e.name, i + 1);
            let found = actual
                .children
                .iter()
                .enumerate()
                .find(|(j, a)| !used[*j] && self.matches_silently(e, a, &child_path))
                .map(|(j, _)| j);

            match found {
                Some(j) => used[j] = true,
                None => {
                    // report against the first unused element with the same name for a useful diff
                    let candidate = actual
                        .children
                        .iter()
                        .enumerate()
                        .find(|(j, a)| !used[*j] && a.name == e.name && a.namespace == e.namespace);
                    match candidate {
                        Some((j, a)) => {
                            used[j] = true;
                            self.compare_elements(e, a, &child_path, out);
                        }
                        None => out.push(Mismatch {
                            path: child_path,
                            message: format!("Expected element: <{}>\n     but none found", e.qualified_name()),
                        }),
                    }
                }
            }
        }
    }
}
