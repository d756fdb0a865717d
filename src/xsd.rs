//! XSD validation of XML response bodies
//!
//! Covers the schema constructs API contracts use. Anything outside that set makes the
//! schema unusable rather than silently accepting the instance.

use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use roxmltree::{Document, Node};
use std::collections::HashMap;

use crate::json_compare::{ComparisonResult, Mismatch};
use crate::xml_compare::{parse_xml, XmlElement};

const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XSD elements the validator understands
const SUPPORTED: &[&str] = &[
    "schema",
    "element",
    "complexType",
    "simpleType",
    "sequence",
    "choice",
    "all",
    "attribute",
    "simpleContent",
    "complexContent",
    "extension",
    "restriction",
    "annotation",
    "enumeration",
    "pattern",
    "whiteSpace",
    "length",
    "minLength",
    "maxLength",
    "minInclusive",
    "maxInclusive",
    "minExclusive",
    "maxExclusive",
    "totalDigits",
    "fractionDigits",
];

/// Validate an XML instance against an XSD document.
///
/// Supported: global and local `xs:element` declarations (`name`, `ref`, `type`,
/// `minOccurs`/`maxOccurs`), named or inline complex types with nested `xs:sequence`
/// and `xs:choice` groups or a top-level `xs:all`, `xs:simpleContent` and
/// `xs:complexContent` derivation, attributes, and `xs:simpleType` restrictions.
/// An unsupported construct is an error, not a pass.
pub fn validate_xml(schema: &str, instance: &str) -> Result<ComparisonResult, String> {
    let doc = Document::parse(schema).map_err(|e| format!("Schema is not well-formed XML: {}", e))?;
    let validator = XsdValidator::new(&doc)?;

    let mut result = ComparisonResult::default();
    match parse_xml(instance) {
        Ok(root) => validator.validate_root(&root, &mut result.mismatches)?,
        Err(e) => result.mismatches.push(violation("/", format!("Actual body is not well-formed XML: {}", e))),
    }
    Ok(result)
}

fn violation(path: &str, message: impl Into<String>) -> Mismatch {
    Mismatch {
        path: path.to_string(),
        message: message.into(),
    }
}

fn unsupported(what: impl std::fmt::Display) -> String {
    format!("Unsupported XSD construct {}", what)
}

fn is_xsd(node: &Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace().map(|ns| ns == XSD_NAMESPACE).unwrap_or(true)
}

/// Element children that carry meaning, annotations skipped
fn schema_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element() && !is_xsd(n, "annotation"))
}

fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// Reject what the validator can't check, before any instance is looked at
fn check_supported(node: Node) -> Result<(), String> {
    let name = node.tag_name().name();
    if !SUPPORTED.contains(&name) {
        return Err(unsupported(format!("<xs:{}>", name)));
    }
    if name == "annotation" {
        return Ok(());
    }
    if node.attribute("substitutionGroup").is_some() || node.attribute("abstract") == Some("true") {
        return Err(unsupported(format!("<xs:{}> with substitution groups", name)));
    }
    if name == "attribute" && node.attribute("ref").is_some() {
        return Err(unsupported("<xs:attribute ref=...>"));
    }
    if name == "complexType" && node.attribute("mixed") == Some("true") {
        return Err(unsupported("mixed content"));
    }
    for child in node.children().filter(Node::is_element) {
        check_supported(child)?;
    }
    Ok(())
}

/// Whether `text` is a valid lexical value of the built-in type. `None` for types the
/// validator doesn't know.
fn builtin_accepts(type_name: &str, text: &str) -> Option<bool> {
    let text = text.trim();
    let accepted = match type_name {
        "anyType" | "anySimpleType" | "string" | "normalizedString" | "token" | "anyURI" | "QName" | "NCName"
        | "Name" | "ID" | "IDREF" | "language" | "NMTOKEN" => true,
        "byte" => text.parse::<i8>().is_ok(),
        "short" => text.parse::<i16>().is_ok(),
        "int" => text.parse::<i32>().is_ok(),
        "long" => text.parse::<i64>().is_ok(),
        "integer" => text.parse::<i128>().is_ok(),
        "unsignedByte" => text.parse::<u8>().is_ok(),
        "unsignedShort" => text.parse::<u16>().is_ok(),
        "unsignedInt" => text.parse::<u32>().is_ok(),
        "unsignedLong" => text.parse::<u64>().is_ok(),
        "nonNegativeInteger" => text.parse::<u128>().is_ok(),
        "positiveInteger" => text.parse::<u128>().map(|v| v > 0).unwrap_or(false),
        "nonPositiveInteger" => text.parse::<i128>().map(|v| v <= 0).unwrap_or(false),
        "negativeInteger" => text.parse::<i128>().map(|v| v < 0).unwrap_or(false),
        "decimal" => decimal_regex().is_match(text),
        "double" | "float" => {
            matches!(text, "INF" | "+INF" | "-INF" | "NaN") || decimal_regex().is_match(text) || scientific(text)
        }
        "boolean" => matches!(text, "true" | "false" | "1" | "0"),
        "date" => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        "time" => chrono::NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok(),
        "dateTime" => {
            chrono::DateTime::parse_from_rfc3339(text).is_ok()
                || chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        }
        "base64Binary" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            general_purpose::STANDARD.decode(compact).is_ok()
        }
        "hexBinary" => text.len() % 2 == 0 && text.chars().all(|c| c.is_ascii_hexdigit()),
        _ => return None,
    };
    Some(accepted)
}

fn decimal_regex() -> &'static Regex {
    static DECIMAL: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    DECIMAL.get_or_init(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("valid decimal regex"))
}

fn scientific(text: &str) -> bool {
    match text.split_once(|c| c == 'e' || c == 'E') {
        Some((mantissa, exponent)) => decimal_regex().is_match(mantissa) && exponent.parse::<i32>().is_ok(),
        None => false,
    }
}

/// Digits of a decimal literal as (integer part, fraction part), insignificant zeros dropped
fn decimal_digits(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    if !decimal_regex().is_match(text) {
        return None;
    }
    let unsigned = text.trim_start_matches(['+', '-']);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    Some((
        integer.trim_start_matches('0').to_string(),
        fraction.trim_end_matches('0').to_string(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Occurs {
    min: usize,
    max: usize,
}

impl Occurs {
    const ONCE: Occurs = Occurs { min: 1, max: 1 };

    fn of(node: Node) -> Self {
        let min = node.attribute("minOccurs").and_then(|v| v.parse().ok()).unwrap_or(1);
        let max = match node.attribute("maxOccurs") {
            Some("unbounded") => usize::MAX,
            Some(v) => v.parse().unwrap_or(1),
            None => 1,
        };
        Self { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Compositor {
    Sequence,
    Choice,
    All,
}

/// Content model term
#[derive(Debug, Clone)]
enum Particle<'a, 'input> {
    Element {
        name: &'a str,
        declaration: Node<'a, 'input>,
        occurs: Occurs,
    },
    Group {
        compositor: Compositor,
        occurs: Occurs,
        items: Vec<Particle<'a, 'input>>,
    },
}

impl<'a, 'input> Particle<'a, 'input> {
    fn occurs(&self) -> Occurs {
        match self {
            Particle::Element { occurs, .. } | Particle::Group { occurs, .. } => *occurs,
        }
    }

    /// The particle may match no elements at all
    fn nullable(&self) -> bool {
        self.occurs().min == 0 || self.body_nullable()
    }

    fn body_nullable(&self) -> bool {
        match self {
            Particle::Element { .. } => false,
            Particle::Group { compositor: Compositor::Choice, items, .. } => {
                items.is_empty() || items.iter().any(Particle::nullable)
            }
            Particle::Group { items, .. } => items.iter().all(Particle::nullable),
        }
    }

    /// An element named `name` can begin this particle
    fn starts(&self, name: &str) -> bool {
        match self {
            Particle::Element { name: declared, occurs, .. } => occurs.max > 0 && *declared == name,
            Particle::Group { compositor: Compositor::Sequence, items, .. } => {
                for item in items {
                    if item.starts(name) {
                        return true;
                    }
                    if !item.nullable() {
                        return false;
                    }
                }
                false
            }
            Particle::Group { items, .. } => items.iter().any(|item| item.starts(name)),
        }
    }

    fn first_names(&self, names: &mut Vec<&'a str>) {
        match self {
            Particle::Element { name, .. } => names.push(*name),
            Particle::Group { items, .. } => items.iter().for_each(|item| item.first_names(names)),
        }
    }
}

/// Text value type of simple content
#[derive(Debug, Clone)]
enum TextType<'a, 'input> {
    Builtin(&'a str),
    Simple(Node<'a, 'input>),
    Restricted {
        base: Box<TextType<'a, 'input>>,
        restriction: Node<'a, 'input>,
    },
}

#[derive(Debug, Clone)]
enum Content<'a, 'input> {
    Empty,
    Any,
    Text(TextType<'a, 'input>),
    Elements(Particle<'a, 'input>),
}

/// A complex type with its derivation resolved
#[derive(Debug, Clone)]
struct ComplexType<'a, 'input> {
    content: Content<'a, 'input>,
    attributes: Vec<Node<'a, 'input>>,
}

enum TypeRef<'a, 'input> {
    Complex(Node<'a, 'input>),
    Simple(Node<'a, 'input>),
    Builtin(&'a str),
}

/// Attributes of `own` override same-named ones of `base`; prohibited ones are dropped
fn merge_attributes<'a, 'input>(base: Vec<Node<'a, 'input>>, own: Vec<Node<'a, 'input>>) -> Vec<Node<'a, 'input>> {
    let own_names: Vec<_> = own.iter().filter_map(|a| a.attribute("name")).collect();
    base.into_iter()
        .filter(|a| !a.attribute("name").map(|n| own_names.contains(&n)).unwrap_or(false))
        .chain(own.into_iter().filter(|a| a.attribute("use") != Some("prohibited")))
        .collect()
}

struct XsdValidator<'a, 'input> {
    elements: HashMap<&'a str, Node<'a, 'input>>,
    complex_types: HashMap<&'a str, Node<'a, 'input>>,
    simple_types: HashMap<&'a str, Node<'a, 'input>>,
}

impl<'a, 'input> XsdValidator<'a, 'input> {
    fn new(doc: &'a Document<'input>) -> Result<Self, String> {
        let root = doc.root_element();
        if !is_xsd(&root, "schema") {
            return Err(format!("Expected an xs:schema root element, got <{}>", root.tag_name().name()));
        }
        check_supported(root)?;

        let mut validator = Self {
            elements: HashMap::new(),
            complex_types: HashMap::new(),
            simple_types: HashMap::new(),
        };
        for child in schema_children(root) {
            let Some(name) = child.attribute("name") else { continue };
            if is_xsd(&child, "element") {
                validator.elements.insert(name, child);
            } else if is_xsd(&child, "complexType") {
                validator.complex_types.insert(name, child);
            } else if is_xsd(&child, "simpleType") {
                validator.simple_types.insert(name, child);
            }
        }
        Ok(validator)
    }

    fn validate_root(&self, root: &XmlElement, out: &mut Vec<Mismatch>) -> Result<(), String> {
        let path = format!("/{}", root.name);
        match self.elements.get(root.name.as_str()) {
            Some(declaration) => self.validate_element(*declaration, root, &path, out),
            None => {
                out.push(violation(&path, format!("No global declaration for element <{}>", root.name)));
                Ok(())
            }
        }
    }

    fn type_ref(&self, qualified: &'a str) -> Result<TypeRef<'a, 'input>, String> {
        let name = local_name(qualified);
        if let Some(complex) = self.complex_types.get(name) {
            Ok(TypeRef::Complex(*complex))
        } else if let Some(simple) = self.simple_types.get(name) {
            Ok(TypeRef::Simple(*simple))
        } else if builtin_accepts(name, "").is_some() {
            Ok(TypeRef::Builtin(name))
        } else {
            Err(format!("Unknown or unsupported type '{}'", qualified))
        }
    }

    fn text_type(&self, qualified: &'a str) -> Result<TextType<'a, 'input>, String> {
        match self.type_ref(qualified)? {
            TypeRef::Builtin(name) => Ok(TextType::Builtin(name)),
            TypeRef::Simple(node) => Ok(TextType::Simple(node)),
            TypeRef::Complex(_) => Err(format!("Type '{}' is not a simple type", qualified)),
        }
    }

    fn element_particle(&self, node: Node<'a, 'input>) -> Result<Particle<'a, 'input>, String> {
        let (name, declaration) = match node.attribute("ref") {
            Some(reference) => {
                let name = local_name(reference);
                let declaration = self
                    .elements
                    .get(name)
                    .copied()
                    .ok_or_else(|| format!("No global declaration for referenced element '{}'", reference))?;
                (name, declaration)
            }
            None => {
                let name = node
                    .attribute("name")
                    .ok_or_else(|| "Local xs:element without a name or ref".to_string())?;
                (name, node)
            }
        };
        Ok(Particle::Element {
            name,
            declaration,
            occurs: Occurs::of(node),
        })
    }

    fn group(&self, node: Node<'a, 'input>) -> Result<Particle<'a, 'input>, String> {
        let compositor = match node.tag_name().name() {
            "sequence" => Compositor::Sequence,
            "choice" => Compositor::Choice,
            _ => Compositor::All,
        };
        let mut items = Vec::new();
        for child in schema_children(node) {
            match child.tag_name().name() {
                "element" => items.push(self.element_particle(child)?),
                "sequence" | "choice" if compositor != Compositor::All => items.push(self.group(child)?),
                "all" => return Err(unsupported("<xs:all> nested in a model group")),
                other => return Err(unsupported(format!("<xs:{}> inside <xs:{}>", other, node.tag_name().name()))),
            }
        }
        Ok(Particle::Group {
            compositor,
            occurs: Occurs::of(node),
            items,
        })
    }

    /// Model group and attributes declared directly under `node`
    fn model_and_attributes(
        &self,
        node: Node<'a, 'input>,
    ) -> Result<(Option<Particle<'a, 'input>>, Vec<Node<'a, 'input>>), String> {
        let mut model = None;
        let mut attributes = Vec::new();
        for child in schema_children(node) {
            match child.tag_name().name() {
                "sequence" | "choice" | "all" => model = Some(self.group(child)?),
                "attribute" => attributes.push(child),
                other => return Err(unsupported(format!("<xs:{}> inside <xs:{}>", other, node.tag_name().name()))),
            }
        }
        Ok((model, attributes))
    }

    fn complex_type(&self, node: Node<'a, 'input>) -> Result<ComplexType<'a, 'input>, String> {
        if let Some(content) = schema_children(node).find(|n| is_xsd(n, "simpleContent")) {
            return self.simple_content(content);
        }
        if let Some(content) = schema_children(node).find(|n| is_xsd(n, "complexContent")) {
            return self.complex_content(content);
        }
        let (model, attributes) = self.model_and_attributes(node)?;
        Ok(ComplexType {
            content: model.map(Content::Elements).unwrap_or(Content::Empty),
            attributes,
        })
    }

    fn derivation(&self, content: Node<'a, 'input>) -> Result<(Node<'a, 'input>, &'a str), String> {
        let derivation = schema_children(content)
            .find(|n| is_xsd(n, "extension") || is_xsd(n, "restriction"))
            .ok_or_else(|| format!("<xs:{}> without extension or restriction", content.tag_name().name()))?;
        let base = derivation
            .attribute("base")
            .ok_or_else(|| format!("<xs:{}> without a base type", derivation.tag_name().name()))?;
        Ok((derivation, base))
    }

    fn simple_content(&self, content: Node<'a, 'input>) -> Result<ComplexType<'a, 'input>, String> {
        let (derivation, base) = self.derivation(content)?;
        let (base_text, base_attributes) = match self.type_ref(base)? {
            TypeRef::Builtin(name) => (TextType::Builtin(name), Vec::new()),
            TypeRef::Simple(node) => (TextType::Simple(node), Vec::new()),
            TypeRef::Complex(node) => match self.complex_type(node)? {
                ComplexType {
                    content: Content::Text(text),
                    attributes,
                } => (text, attributes),
                _ => return Err(format!("Base type '{}' of xs:simpleContent has no simple content", base)),
            },
        };

        let own_attributes: Vec<_> = schema_children(derivation).filter(|n| is_xsd(n, "attribute")).collect();
        let text = if is_xsd(&derivation, "restriction") {
            TextType::Restricted {
                base: Box::new(base_text),
                restriction: derivation,
            }
        } else {
            base_text
        };
        Ok(ComplexType {
            content: Content::Text(text),
            attributes: merge_attributes(base_attributes, own_attributes),
        })
    }

    fn complex_content(&self, content: Node<'a, 'input>) -> Result<ComplexType<'a, 'input>, String> {
        let (derivation, base) = self.derivation(content)?;
        let base_type = match self.type_ref(base)? {
            TypeRef::Complex(node) => self.complex_type(node)?,
            TypeRef::Builtin("anyType") => ComplexType {
                content: Content::Empty,
                attributes: Vec::new(),
            },
            _ => return Err(format!("Base type '{}' of xs:complexContent is not a complex type", base)),
        };
        let (own_model, own_attributes) = self.model_and_attributes(derivation)?;
        let attributes = merge_attributes(base_type.attributes, own_attributes);

        if is_xsd(&derivation, "restriction") {
            return Ok(ComplexType {
                content: own_model.map(Content::Elements).unwrap_or(Content::Empty),
                attributes,
            });
        }

        let content = match (base_type.content, own_model) {
            (Content::Elements(base), Some(own)) => Content::Elements(Particle::Group {
                compositor: Compositor::Sequence,
                occurs: Occurs::ONCE,
                items: vec![base, own],
            }),
            (Content::Elements(base), None) => Content::Elements(base),
            (Content::Empty, Some(own)) => Content::Elements(own),
            (Content::Empty, None) => Content::Empty,
            (Content::Any, _) => Content::Any,
            (Content::Text(_), _) => {
                return Err(format!("xs:complexContent can't extend '{}', which has simple content", base))
            }
        };
        Ok(ComplexType { content, attributes })
    }

    fn validate_element(
        &self,
        declaration: Node<'a, 'input>,
        element: &XmlElement,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        let complex = match declaration.attribute("type") {
            Some(type_name) => match self.type_ref(type_name)? {
                TypeRef::Complex(node) => self.complex_type(node)?,
                TypeRef::Builtin("anyType") => return Ok(()),
                TypeRef::Builtin(name) => ComplexType {
                    content: Content::Text(TextType::Builtin(name)),
                    attributes: Vec::new(),
                },
                TypeRef::Simple(node) => ComplexType {
                    content: Content::Text(TextType::Simple(node)),
                    attributes: Vec::new(),
                },
            },
            None => match schema_children(declaration).next() {
                Some(node) if is_xsd(&node, "complexType") => self.complex_type(node)?,
                Some(node) if is_xsd(&node, "simpleType") => ComplexType {
                    content: Content::Text(TextType::Simple(node)),
                    attributes: Vec::new(),
                },
                // no type at all is xs:anyType
                _ => ComplexType {
                    content: Content::Any,
                    attributes: Vec::new(),
                },
            },
        };
        self.validate_complex(&complex, element, path, out)
    }

    fn validate_complex(
        &self,
        complex: &ComplexType<'a, 'input>,
        element: &XmlElement,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        if matches!(complex.content, Content::Any) {
            return Ok(());
        }
        self.validate_attributes(&complex.attributes, element, path, out)?;

        match &complex.content {
            Content::Any => Ok(()),
            Content::Empty => {
                if !element.children.is_empty() {
                    out.push(violation(path, format!("Element <{}> must not have child elements", element.name)));
                }
                Ok(())
            }
            Content::Text(text_type) => {
                if !element.children.is_empty() {
                    out.push(violation(path, format!("Element <{}> must not have child elements", element.name)));
                }
                self.validate_text(text_type, element.text.as_deref().unwrap_or(""), path, out)
            }
            Content::Elements(model) => {
                let mut cursor = 0;
                self.consume(model, element, &mut cursor, path, out)?;
                for (i, child) in element.children.iter().enumerate().skip(cursor) {
                    out.push(violation(&child_path(path, child, i), format!("Unexpected element <{}>", child.name)));
                }
                Ok(())
            }
        }
    }

    fn validate_attributes(
        &self,
        declared: &[Node<'a, 'input>],
        element: &XmlElement,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        let mut names = Vec::new();
        for attribute in declared {
            let Some(name) = attribute.attribute("name") else { continue };
            names.push(name);
            let attribute_path = format!("{}/@{}", path, name);
            match element.attributes.get(name) {
                Some(value) => {
                    let text_type = match attribute.attribute("type") {
                        Some(type_name) => Some(self.text_type(type_name)?),
                        None => schema_children(*attribute)
                            .find(|n| is_xsd(n, "simpleType"))
                            .map(TextType::Simple),
                    };
                    if let Some(text_type) = text_type {
                        self.validate_text(&text_type, value, &attribute_path, out)?;
                    }
                }
                None if attribute.attribute("use") == Some("required") => {
                    out.push(violation(&attribute_path, format!("Required attribute '{}' is missing", name)))
                }
                None => {}
            }
        }
        for name in element.attributes.keys() {
            // namespace declarations are not part of the content model
            if !names.contains(&name.as_str()) && !name.starts_with("xmlns") {
                out.push(violation(&format!("{}/@{}", path, name), format!("Attribute '{}' is not declared", name)));
            }
        }
        Ok(())
    }

    fn validate_text(
        &self,
        text_type: &TextType<'a, 'input>,
        text: &str,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        match text_type {
            TextType::Builtin(name) => {
                let accepted = builtin_accepts(name, text).ok_or_else(|| unsupported(format!("type xs:{}", name)))?;
                if !accepted {
                    out.push(violation(path, format!("Value {:?} is not a valid xs:{}", text, name)));
                }
                Ok(())
            }
            TextType::Simple(simple) => {
                let restriction = schema_children(*simple)
                    .find(|n| is_xsd(n, "restriction"))
                    .ok_or_else(|| unsupported("<xs:simpleType> without <xs:restriction>"))?;
                let base = match restriction.attribute("base") {
                    Some(base) => self.text_type(base)?,
                    None => schema_children(restriction)
                        .find(|n| is_xsd(n, "simpleType"))
                        .map(TextType::Simple)
                        .ok_or_else(|| "<xs:restriction> without a base type".to_string())?,
                };
                self.validate_restricted(&base, restriction, text, path, out)
            }
            TextType::Restricted { base, restriction } => self.validate_restricted(base, *restriction, text, path, out),
        }
    }

    /// Check the base type first; facets only apply to values the base accepts
    fn validate_restricted(
        &self,
        base: &TextType<'a, 'input>,
        restriction: Node<'a, 'input>,
        text: &str,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        let before = out.len();
        self.validate_text(base, text, path, out)?;
        if out.len() > before {
            return Ok(());
        }
        check_facets(restriction, text, path, out)
    }

    /// Match `particle` against the children from `cursor` on, as often as its occurrence allows
    fn consume(
        &self,
        particle: &Particle<'a, 'input>,
        element: &XmlElement,
        cursor: &mut usize,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        let children = &element.children;
        match particle {
            Particle::Element {
                name,
                declaration,
                occurs,
            } => {
                let mut count = 0;
                while count < occurs.max && *cursor < children.len() && children[*cursor].name == *name {
                    let child = &children[*cursor];
                    self.validate_element(*declaration, child, &child_path(path, child, *cursor), out)?;
                    *cursor += 1;
                    count += 1;
                }
                if count < occurs.min {
                    out.push(violation(
                        path,
                        format!("Expected at least {} <{}> element(s), got {}", occurs.min, name, count),
                    ));
                }
            }
            Particle::Group { occurs, .. } => {
                let mut count = 0;
                while count < occurs.max && *cursor < children.len() && particle.starts(&children[*cursor].name) {
                    let before = *cursor;
                    self.consume_group_once(particle, element, cursor, path, out)?;
                    count += 1;
                    if *cursor == before {
                        break;
                    }
                }
                if count < occurs.min {
                    // reports whatever the group still requires
                    self.consume_group_once(particle, element, cursor, path, out)?;
                }
            }
        }
        Ok(())
    }

    fn consume_group_once(
        &self,
        group: &Particle<'a, 'input>,
        element: &XmlElement,
        cursor: &mut usize,
        path: &str,
        out: &mut Vec<Mismatch>,
    ) -> Result<(), String> {
        let Particle::Group { compositor, items, .. } = group else {
            return self.consume(group, element, cursor, path, out);
        };
        let children = &element.children;
        match compositor {
            Compositor::Sequence => {
                for item in items {
                    self.consume(item, element, cursor, path, out)?;
                }
            }
            Compositor::Choice => {
                let chosen = children
                    .get(*cursor)
                    .and_then(|child| items.iter().find(|item| item.starts(&child.name)));
                match chosen {
                    Some(item) => self.consume(item, element, cursor, path, out)?,
                    None if group.body_nullable() => {}
                    None => {
                        let mut names = Vec::new();
                        group.first_names(&mut names);
                        out.push(violation(path, format!("Expected one of {:?}", names)));
                    }
                }
            }
            Compositor::All => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                while let Some(child) = children.get(*cursor) {
                    let item = items.iter().find_map(|item| match item {
                        Particle::Element { name, declaration, .. }
                            if *name == child.name && counts.get(name).copied().unwrap_or(0) == 0 =>
                        {
                            Some((*name, *declaration))
                        }
                        _ => None,
                    });
                    let Some((name, declaration)) = item else { break };
                    self.validate_element(declaration, child, &child_path(path, child, *cursor), out)?;
                    *counts.entry(name).or_default() += 1;
                    *cursor += 1;
                }
                for item in items {
                    if let Particle::Element { name, occurs, .. } = item {
                        if occurs.min > 0 && !counts.contains_key(name) {
                            out.push(violation(
                                path,
                                format!("Expected at least 1 <{}> element(s), got 0", name),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn child_path(path: &str, child: &XmlElement, index: usize) -> String {
    format!("{}/{}[{}]", path, child.name, index + 1)
}

fn facet_values<'a>(facets: &[Node<'a, '_>], name: &str) -> Vec<&'a str> {
    facets
        .iter()
        .filter(|f| is_xsd(f, name))
        .filter_map(|f| f.attribute("value"))
        .collect()
}

fn check_facets(restriction: Node, text: &str, path: &str, out: &mut Vec<Mismatch>) -> Result<(), String> {
    let facets: Vec<Node> = schema_children(restriction).filter(|n| !is_xsd(n, "simpleType")).collect();

    let normalized = match facet_values(&facets, "whiteSpace").first().copied() {
        Some("collapse") => text.split_whitespace().collect::<Vec<_>>().join(" "),
        Some("replace") => text.replace(['\t', '\n', '\r'], " "),
        _ => text.to_string(),
    };
    let text = normalized.as_str();

    let enumeration = facet_values(&facets, "enumeration");
    if !enumeration.is_empty() && !enumeration.contains(&text) {
        out.push(violation(path, format!("Value {:?} is not one of {:?}", text, enumeration)));
    }

    // several patterns in one restriction are alternatives
    let patterns = facet_values(&facets, "pattern");
    if !patterns.is_empty() {
        let mut matched = false;
        for pattern in &patterns {
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| format!("Invalid xs:pattern /{}/: {}", pattern, e))?;
            matched |= regex.is_match(text);
        }
        if !matched {
            out.push(violation(path, format!("Value {:?} doesn't match xs:pattern {:?}", text, patterns)));
        }
    }

    for facet in &facets {
        let name = facet.tag_name().name();
        if matches!(name, "enumeration" | "pattern" | "whiteSpace") {
            continue;
        }
        let Some(value) = facet.attribute("value") else { continue };
        let limit = || value.parse::<usize>().map_err(|_| format!("Invalid xs:{} value '{}'", name, value));
        let ok = match name {
            "length" => text.chars().count() == limit()?,
            "minLength" => text.chars().count() >= limit()?,
            "maxLength" => text.chars().count() <= limit()?,
            "totalDigits" => match decimal_digits(text) {
                Some((integer, fraction)) => integer.len() + fraction.len() <= limit()?,
                None => false,
            },
            "fractionDigits" => match decimal_digits(text) {
                Some((_, fraction)) => fraction.len() <= limit()?,
                None => false,
            },
            _ => {
                let bound = value
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid xs:{} value '{}'", name, value))?;
                match text.trim().parse::<f64>() {
                    Ok(actual) => match name {
                        "minInclusive" => actual >= bound,
                        "maxInclusive" => actual <= bound,
                        "minExclusive" => actual > bound,
                        _ => actual < bound,
                    },
                    Err(_) => false,
                }
            }
        };
        if !ok {
            out.push(violation(path, format!("Value {:?} violates xs:{} {}", text, name, value)));
        }
    }
    Ok(())
}
