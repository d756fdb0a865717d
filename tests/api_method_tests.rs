mod mocks;

use apiverify::{
    ApiMethod, ApiMethodError, ComparatorContext, ComparisonSpec, ContainmentFlag, CryptoProcessor, ExpectedStatus,
    HttpMethod, JsonCompareMode, PreconditionError, ProcessorKind, PropertyStore, PropertyValue, ProtocolError,
    XmlCompareMode,
};
use mocks::{api_method, json_descriptor, xml_descriptor, Resources, ScriptedExecutor};
use std::sync::Arc;

const USER_RQ: &str = r#"{"name": "{{name}}", "email": "{{email}}"}"#;
const USER_RS: &str = r#"{"id": "type:Integer", "name": "{{name}}", "email": "{{email}}"}"#;

fn user_resources() -> Resources {
    Resources::new()
        .with("api/users/_post/rq.json", USER_RQ)
        .with("api/users/_post/rs.json", USER_RS)
        .with(
            "api/users/_post/rs.schema",
            r#"{"type": "object", "required": ["id", "name", "email"], "properties": {"id": {"type": "integer"}, "name": {"type": "string", "minLength": {{min_name}}}}}"#,
        )
}

fn create_user(executor: &Arc<ScriptedExecutor>, resources: &Resources) -> ApiMethod {
    let descriptor = json_descriptor("users", HttpMethod::POST)
        .with_request_template("api/users/_post/rq.json")
        .with_response_template("api/users/_post/rs.json");
    let mut method = api_method(descriptor, executor, resources);
    method.add_property("name", "John").unwrap();
    method.add_property("email", "john@example.com").unwrap();
    method.add_property("min_name", 2).unwrap();
    method
}

#[tokio::test]
async fn test_call_renders_request_and_captures_body() {
    let executor = Arc::new(
        ScriptedExecutor::new().respond(201, r#"{"id": 17, "name": "John", "email": "john@example.com"}"#),
    );
    let resources = user_resources();
    let mut method = create_user(&executor, &resources);

    let response = method.call().await.unwrap();
    assert_eq!(response.status_code, 201);

    let requests = executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://test.local/api/users");
    assert_eq!(
        requests[0].body.as_deref(),
        Some(r#"{"name": "John", "email": "john@example.com"}"#)
    );
    assert_eq!(requests[0].headers.get("Accept").map(String::as_str), Some("*/*"));
    assert_eq!(
        requests[0].headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(
        method.last_response_body(),
        Some(r#"{"id": 17, "name": "John", "email": "john@example.com"}"#)
    );

    method.validate_response([]).unwrap();
    // validation can be repeated against the same captured body
    method.validate(&ComparisonSpec::json(JsonCompareMode::Strict)).unwrap();
}

#[tokio::test]
async fn test_validate_before_call_is_a_precondition_error() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = user_resources();
    let mut method = create_user(&executor, &resources);

    let err = method.validate_response([]).unwrap_err();
    assert!(matches!(err, ApiMethodError::Precondition(PreconditionError::NoResponseBody)));

    let err = method.validate_against_schema("api/users/_post/rs.schema").unwrap_err();
    assert!(matches!(err, ApiMethodError::Precondition(PreconditionError::NoResponseBody)));
    assert_eq!(executor.request_count(), 0);
}

#[tokio::test]
async fn test_missing_response_template_is_a_configuration_error() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = user_resources();
    let mut method = api_method(json_descriptor("ping", HttpMethod::GET), &executor, &resources);

    let err = method.validate_response([]).unwrap_err();
    assert!(matches!(err, ApiMethodError::Configuration(_)));

    method.call().await.unwrap();
    let err = method.validate_response([]).unwrap_err();
    assert!(matches!(err, ApiMethodError::Configuration(_)));
}

#[tokio::test]
async fn test_mismatch_reports_diff() {
    let executor = Arc::new(
        ScriptedExecutor::new().respond(201, r#"{"id": 17, "name": "Jane", "email": "john@example.com", "extra": 1}"#),
    );
    let resources = user_resources();
    let mut method = create_user(&executor, &resources);
    method.call().await.unwrap();

    match method.validate_response([]).unwrap_err() {
        ApiMethodError::ResponseMismatch { diff } => {
            assert!(diff.contains("name\nExpected: \"John\"\n     got: \"Jane\""), "{}", diff);
            assert!(diff.contains("Unexpected: extra"), "{}", diff);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the extra field is tolerated in lenient mode, the wrong name is not
    let err = method
        .validate_json_response(JsonCompareMode::Lenient, [])
        .unwrap_err();
    assert!(matches!(err, ApiMethodError::ResponseMismatch { diff } if !diff.contains("extra")));
}

#[tokio::test]
async fn test_array_containment_flag() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, r#"{"ids": [3, 1, 2]}"#));
    let resources = Resources::new().with("ids/rs.json", r#"{"ids": [1, 2]}"#);
    let descriptor = json_descriptor("ids", HttpMethod::GET).with_response_template("ids/rs.json");
    let mut method = api_method(descriptor, &executor, &resources);
    method.call().await.unwrap();

    assert!(matches!(
        method.validate_response([]),
        Err(ApiMethodError::ResponseMismatch { .. })
    ));
    method.validate_response([ContainmentFlag::array_contains()]).unwrap();
    method
        .validate_response(["array_contains:ids".parse::<ContainmentFlag>().unwrap()])
        .unwrap();
}

#[tokio::test]
async fn test_comparator_context() {
    let executor = Arc::new(
        ScriptedExecutor::new().respond(200, r#"{"id": "ord-981", "total": 12.5, "created": "2024-01-01T10:00:00Z"}"#),
    );
    let resources = Resources::new().with(
        "orders/rs.json",
        r#"{"id": "x", "total": "predicate:positive", "created": "skip"}"#,
    );
    let descriptor = json_descriptor("orders", HttpMethod::GET).with_response_template("orders/rs.json");
    let mut method = api_method(descriptor, &executor, &resources);
    method.call().await.unwrap();

    let context = ComparatorContext::new()
        .matches("id", regex::Regex::new(r"^ord-\d+$").unwrap())
        .with_predicate("positive", |v| v.as_f64().map(|n| n > 0.0).unwrap_or(false));
    method.validate_response_with_context(context, []).unwrap();
}

#[tokio::test]
async fn test_xml_method_validation() {
    let body = r#"<user id="7"><roles><role>dev</role><role>admin</role></roles><name>John</name></user>"#;
    let executor = Arc::new(ScriptedExecutor::new().respond(200, body));
    let resources = Resources::new()
        .with(
            "users/rs.xml",
            r#"<user id="{{id}}"><name>{{name}}</name><roles><role>admin</role><role>dev</role></roles></user>"#,
        )
        .with(
            "users/user.xsd",
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="user">
    <xs:complexType>
      <xs:all>
        <xs:element name="name" type="xs:string"/>
        <xs:element name="roles">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="role" type="xs:string" maxOccurs="unbounded"/>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
      </xs:all>
      <xs:attribute name="id" type="xs:int" use="required"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#,
        );
    let descriptor = xml_descriptor("users", HttpMethod::GET).with_response_template("users/rs.xml");
    let mut method = api_method(descriptor, &executor, &resources);
    method.add_property("id", 7).unwrap();
    method.add_property("name", "John").unwrap();
    method.call().await.unwrap();

    let err = method.validate_response([ContainmentFlag::array_contains()]).unwrap_err();
    assert!(matches!(
        err,
        ApiMethodError::Precondition(PreconditionError::ContainmentFlagsInXmlMode(1))
    ));

    assert!(matches!(
        method.validate_response([]),
        Err(ApiMethodError::ResponseMismatch { .. })
    ));
    method.validate_xml_response(XmlCompareMode::NonStrict).unwrap();
    method.validate_against_schema("users/user.xsd").unwrap();
}

#[tokio::test]
async fn test_xml_schema_with_nested_groups_and_simple_content() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(200, r#"<order><contact><name>Ann</name><email>ann@example.com</email></contact><price currency="EUR">19.99</price></order>"#)
            .respond(200, r#"<order><contact><name>Ann</name></contact><price>cheap</price></order>"#),
    );
    let resources = Resources::new().with(
        "orders/order.xsd",
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="Money">
    <xs:simpleContent>
      <xs:extension base="xs:decimal">
        <xs:attribute name="currency" type="xs:string" use="required"/>
      </xs:extension>
    </xs:simpleContent>
  </xs:complexType>
  <xs:element name="order">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="contact">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="name" type="xs:string"/>
              <xs:choice>
                <xs:element name="email" type="xs:string"/>
                <xs:element name="phone" type="xs:string"/>
              </xs:choice>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
        <xs:element name="price" type="Money"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#,
    );
    let descriptor = xml_descriptor("orders", HttpMethod::GET);
    let mut method = api_method(descriptor, &executor, &resources);

    method.call().await.unwrap();
    method.validate_against_schema("orders/order.xsd").unwrap();

    method.call().await.unwrap();
    match method.validate_against_schema("orders/order.xsd").unwrap_err() {
        ApiMethodError::ResponseMismatch { diff } => {
            assert!(diff.contains("Expected one of"), "{}", diff);
            assert!(diff.contains("not a valid xs:decimal"), "{}", diff);
            assert!(diff.contains("Required attribute 'currency' is missing"), "{}", diff);
        }
        other => panic!("expected response mismatch, got {}", other),
    }
}

#[tokio::test]
async fn test_unsupported_xsd_is_a_configuration_error() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "<bag><item/></bag>"));
    let resources = Resources::new().with(
        "bag.xsd",
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="bag"><xs:complexType><xs:sequence><xs:any maxOccurs="unbounded"/></xs:sequence></xs:complexType></xs:element>
</xs:schema>"#,
    );
    let mut method = api_method(xml_descriptor("bag", HttpMethod::GET), &executor, &resources);
    method.call().await.unwrap();

    assert!(matches!(
        method.validate_against_schema("bag.xsd"),
        Err(ApiMethodError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_schema_and_exemplar_agree() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(201, r#"{"id": 17, "name": "John", "email": "john@example.com"}"#)
            .respond(201, r#"{"id": "17", "name": "John", "email": "john@example.com"}"#),
    );
    let resources = user_resources();
    let mut method = create_user(&executor, &resources);

    method.call().await.unwrap();
    method.validate_response([]).unwrap();
    method.validate_against_schema("api/users/_post/rs.schema").unwrap();

    method.call().await.unwrap();
    assert!(matches!(
        method.validate_response([]),
        Err(ApiMethodError::ResponseMismatch { .. })
    ));
    assert!(matches!(
        method.validate_against_schema("api/users/_post/rs.schema"),
        Err(ApiMethodError::ResponseMismatch { .. })
    ));
}

#[tokio::test]
async fn test_literal_schema_is_not_rendered() {
    let executor = Arc::new(ScriptedExecutor::new().respond(201, r#"{"id": 17, "name": "John", "email": "john@example.com"}"#));
    let resources = user_resources();
    let mut method = create_user(&executor, &resources);
    method.call().await.unwrap();

    method.validate_against_rendered_schema("api/users/_post/rs.schema").unwrap();
    let err = method
        .validate_against_literal_schema("api/users/_post/rs.schema")
        .unwrap_err();
    assert!(matches!(err, ApiMethodError::Configuration(_)));
}

#[tokio::test]
async fn test_encrypted_properties_are_stored_decrypted() {
    let crypto = CryptoProcessor::new(&[7u8; 32]).unwrap();
    let token = crypto.encrypt("s3cret").unwrap();
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = Resources::new().with("login/rq.json", r#"{"password": "{{password}}"}"#);

    let descriptor = json_descriptor("login", HttpMethod::POST).with_request_template("login/rq.json");
    let mut method = ApiMethod::builder(descriptor, executor.clone())
        .renderer(resources.renderer())
        .properties(PropertyStore::with_default_processors(crypto))
        .base_url("http://test.local")
        .build();

    method.add_property("password", token.as_str()).unwrap();
    assert_eq!(
        method.properties().unwrap().get("password"),
        Some(&PropertyValue::from("s3cret"))
    );

    method.call().await.unwrap();
    assert_eq!(executor.requests()[0].body.as_deref(), Some(r#"{"password": "s3cret"}"#));
}

#[tokio::test]
async fn test_encrypted_property_without_key_fails_before_sending() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = Resources::new().with("login/rq.json", r#"{"password": "{{password}}"}"#);
    let descriptor = json_descriptor("login", HttpMethod::POST).with_request_template("login/rq.json");
    let keyless = CryptoProcessor::unavailable("no crypto key is set in LOGIN_CRYPTO_KEY");
    let mut method = ApiMethod::builder(descriptor, executor.clone())
        .renderer(resources.renderer())
        .properties(PropertyStore::with_default_processors(keyless))
        .base_url("http://test.local")
        .build();

    let err = method.add_property("password", "{crypt:AAAA}").unwrap_err();
    assert!(matches!(&err, ApiMethodError::Configuration(message) if message.contains("LOGIN_CRYPTO_KEY")));
    assert!(method.properties().unwrap().get("password").is_none());

    // plain values still go through
    method.add_property("user", "john").unwrap();
    assert!(method.call().await.is_err());
    assert_eq!(executor.request_count(), 0);
}

#[tokio::test]
async fn test_ignored_processor_set_is_frozen_after_render() {
    let crypto = CryptoProcessor::new(&[9u8; 32]).unwrap();
    let token = crypto.encrypt("raw").unwrap();
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = Resources::new().with("rq.json", r#"{"v": "{{value}}"}"#);
    let descriptor = json_descriptor("frozen", HttpMethod::POST).with_request_template("rq.json");
    let mut method = ApiMethod::builder(descriptor, executor.clone())
        .renderer(resources.renderer())
        .properties(PropertyStore::with_default_processors(crypto))
        .base_url("http://test.local")
        .build();

    method.ignore_processor(ProcessorKind::Crypto).unwrap();
    method.add_property("value", token.as_str()).unwrap();
    assert_eq!(
        method.properties().unwrap().get("value").and_then(PropertyValue::as_str),
        Some(token.as_str())
    );

    method.call().await.unwrap();
    assert!(matches!(
        method.ignore_processor(ProcessorKind::Generate),
        Err(ApiMethodError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_unresolved_placeholder_aborts_before_sending() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = user_resources();
    let descriptor = json_descriptor("users", HttpMethod::POST).with_request_template("api/users/_post/rq.json");
    let mut method = api_method(descriptor, &executor, &resources);
    method.add_property("name", "John").unwrap();

    let err = method.call().await.unwrap_err();
    assert!(matches!(err, ApiMethodError::TemplateRender { .. }));
    assert_eq!(executor.request_count(), 0);
    assert!(method.last_response_body().is_none());
}

#[tokio::test]
async fn test_transport_errors_surface_as_protocol_errors() {
    let executor = Arc::new(ScriptedExecutor::new().fail(ProtocolError::ConnectionFailed("refused".to_string())));
    let resources = Resources::new();
    let mut method = api_method(json_descriptor("down", HttpMethod::GET), &executor, &resources);

    let err = method.call().await.unwrap_err();
    assert!(matches!(err, ApiMethodError::Protocol(ProtocolError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_call_expecting_declared_status() {
    let executor = Arc::new(ScriptedExecutor::new().respond(201, "{}").respond(200, "{}"));
    let resources = Resources::new();
    let descriptor = json_descriptor("create", HttpMethod::POST).with_successful_status(ExpectedStatus::Code(201));
    let mut method = api_method(descriptor, &executor, &resources);

    method.call_expecting_success().await.unwrap();
    let err = method.call_expecting_success().await.unwrap_err();
    assert!(matches!(err, ApiMethodError::ResponseMismatch { .. }));
}

#[tokio::test]
async fn test_properties_file() {
    let executor = Arc::new(ScriptedExecutor::new().respond(200, "{}"));
    let resources = user_resources().with(
        "users.properties",
        "# defaults\nname=John\nemail = john@example.com\n",
    );
    let descriptor = json_descriptor("users", HttpMethod::POST).with_request_template("api/users/_post/rq.json");
    let mut method = api_method(descriptor, &executor, &resources);

    method.set_properties_file(&resources.root().join("users.properties")).unwrap();
    method.call().await.unwrap();
    assert_eq!(
        executor.requests()[0].body.as_deref(),
        Some(r#"{"name": "John", "email": "john@example.com"}"#)
    );

    let err = method
        .set_properties_file(&resources.root().join("missing.properties"))
        .unwrap_err();
    assert!(matches!(err, ApiMethodError::ResourceNotFound { .. }));
}
