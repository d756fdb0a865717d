use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ApiMethodError, PreconditionError, Result};
use crate::json_compare::{ComparatorContext, ComparisonResult, ContainmentFlag, JsonComparator, JsonCompareMode};
use crate::schema::JsonSchemaValidator;
use crate::xml_compare::{XmlComparator, XmlCompareMode};
use crate::xsd::validate_xml;

/// Payload format of a method, declared once per method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Json,
    Xml,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Json => write!(f, "JSON"),
            ContentKind::Xml => write!(f, "XML"),
        }
    }
}

/// How an actual body is compared with the rendered expected body.
///
/// Only the part matching the method's [`ContentKind`] is used. Containment flags are
/// JSON-only; passing any to an XML method is a precondition failure.
#[derive(Debug, Clone, Default)]
pub struct ComparisonSpec {
    pub json_mode: JsonCompareMode,
    pub xml_mode: XmlCompareMode,
    pub flags: Vec<ContainmentFlag>,
    pub context: Option<ComparatorContext>,
}

impl ComparisonSpec {
    pub fn json(mode: JsonCompareMode) -> Self {
        Self {
            json_mode: mode,
            ..Self::default()
        }
    }

    pub fn xml(mode: XmlCompareMode) -> Self {
        Self {
            xml_mode: mode,
            ..Self::default()
        }
    }

    pub fn with_flag(mut self, flag: ContainmentFlag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = ContainmentFlag>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn with_context(mut self, context: ComparatorContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Dispatches exemplar and schema validation by content kind
#[derive(Debug, Clone, Copy)]
pub struct ResponseValidator {
    kind: ContentKind,
}

impl ResponseValidator {
    pub fn new(kind: ContentKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Reject comparison settings that cannot apply to this content kind
    pub fn check_preconditions(&self, spec: &ComparisonSpec) -> Result<()> {
        if self.kind == ContentKind::Xml && !spec.flags.is_empty() {
            return Err(PreconditionError::ContainmentFlagsInXmlMode(spec.flags.len()).into());
        }
        Ok(())
    }

    /// Compare `actual` against the rendered `expected` body; `template` names the
    /// expected document in errors
    pub fn compare(&self, template: &str, expected: &str, actual: &str, spec: &ComparisonSpec) -> Result<()> {
        self.check_preconditions(spec)?;

        let result = match self.kind {
            ContentKind::Json => {
                let expected: JsonValue = serde_json::from_str(expected).map_err(|e| ApiMethodError::TemplateRender {
                    template: template.to_string(),
                    message: format!("rendered document is not valid JSON: {}", e),
                })?;
                let actual: JsonValue = serde_json::from_str(actual).map_err(|e| ApiMethodError::ResponseMismatch {
                    diff: format!("Actual body is not valid JSON: {}", e),
                })?;

                let mut comparator = JsonComparator::new(spec.json_mode).with_flags(spec.flags.iter().cloned());
                if let Some(context) = &spec.context {
                    comparator = comparator.with_context(context.clone());
                }
                log::debug!("Comparing JSON response with {} in {:?} mode", template, spec.json_mode);
                comparator.compare(&expected, &actual)
            }
            ContentKind::Xml => {
                log::debug!("Comparing XML response with {} in {:?} mode", template, spec.xml_mode);
                XmlComparator::new(spec.xml_mode)
                    .compare_str(expected, actual)
                    .map_err(|message| ApiMethodError::TemplateRender {
                        template: template.to_string(),
                        message,
                    })?
            }
        };

        Self::into_outcome(result)
    }

    /// Validate `actual` against a schema document (JSON Schema or XSD by content kind)
    pub fn check_schema(&self, schema_name: &str, schema: &str, actual: &str) -> Result<()> {
        let invalid_schema = |message: String| {
            ApiMethodError::Configuration(format!("Schema {} can't be used: {}", schema_name, message))
        };

        let result = match self.kind {
            ContentKind::Json => {
                let validator = JsonSchemaValidator::parse(schema).map_err(invalid_schema)?;
                let actual: JsonValue = serde_json::from_str(actual).map_err(|e| ApiMethodError::ResponseMismatch {
                    diff: format!("Actual body is not valid JSON: {}", e),
                })?;
                validator.validate(&actual)
            }
            ContentKind::Xml => validate_xml(schema, actual).map_err(invalid_schema)?,
        };
        log::debug!("Validated response against schema {}", schema_name);

        Self::into_outcome(result)
    }

    fn into_outcome(result: ComparisonResult) -> Result<()> {
        if result.passed() {
            Ok(())
        } else {
            let diff = result.diff();
            log::debug!("Response mismatch:\n{}", diff);
            Err(ApiMethodError::ResponseMismatch { diff })
        }
    }
}
