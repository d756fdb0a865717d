//! apiverify - API method execution and response verification
//!
//! An API method renders its request body from a template and a property store, sends it
//! through an [`HttpExecutor`], captures the raw response body and validates it against a
//! rendered exemplar or a schema. Calls can be retried under a success predicate with
//! [`poll`] or the fluent [`MethodPoller`].

pub mod error;
pub mod transport;
pub mod rest_client;
pub mod processors;
pub mod properties;
pub mod template;
pub mod json_compare;
pub mod xml_compare;
pub mod schema;
pub mod xsd;
pub mod validation;
pub mod descriptor;
pub mod api_method;
pub mod poller;
pub mod configuration;
pub mod cli;

// Re-export commonly used types
pub use error::{ApiMethodError, ConfigurationError, PreconditionError, ProtocolError, Result};
pub use transport::{ExpectedStatus, HttpExecutor, HttpMethod, HttpRequest, HttpResponse, StatusClass};
pub use rest_client::{RestClient, RestClientConfig};
pub use processors::{
    CryptoProcessor, EnvProcessor, GenerateProcessor, ProcessorKind, PropertyProcessor, DEFAULT_CRYPTO_KEY_ENV,
};
pub use properties::{load_properties, PropertyStore, PropertyValue};
pub use template::{ResourceLocator, TemplateRef, TemplateRenderer};
pub use json_compare::{
    ComparatorContext, ComparisonResult, ContainmentFlag, JsonComparator, JsonCompareMode, Mismatch,
};
pub use xml_compare::{XmlComparator, XmlCompareMode};
pub use schema::JsonSchemaValidator;
pub use xsd::validate_xml;
pub use validation::{ComparisonSpec, ContentKind, ResponseValidator};
pub use descriptor::{MethodCatalog, MethodDescriptor, MethodResolver};
pub use api_method::{ApiMethod, ApiMethodBuilder};
pub use poller::{poll, LogStrategy, MethodPoller, PollSpec};
pub use configuration::{Configuration, ConfigurationManager};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
