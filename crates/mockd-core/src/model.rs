//! Mock data model: the tagged variant over the eight protocol specs
//!
//! A [`Mock`] pairs a protocol-specific matcher with a response template.
//! Dispatch routes by the `type` tag, not by dynamic dispatch; every
//! component that needs a mock works on an immutable snapshot and re-fetches
//! by id on commit.

use crate::error::FieldError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocol dialects a mock can impersonate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
    #[serde(rename = "graphql")]
    GraphQl,
    #[serde(rename = "websocket")]
    WebSocket,
    Mqtt,
    Sse,
    Soap,
    OAuth,
}

impl Protocol {
    /// Stable lowercase name, matching the `type` tag in config documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::GraphQl => "graphql",
            Self::WebSocket => "websocket",
            Self::Mqtt => "mqtt",
            Self::Sse => "sse",
            Self::Soap => "soap",
            Self::OAuth => "oauth",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// The unit of declaration: matcher + canned response for one protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    /// Stable id; derived deterministically from the declaration when
    /// omitted
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Disabled mocks are skipped by dispatch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher priority wins; ties break on insertion order
    #[serde(default)]
    pub priority: i32,
    /// Workspace label, opaque to the matcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Protocol-specific matcher + response, tagged by `type`
    #[serde(flatten)]
    pub spec: MockSpec,
    /// Assigned by the registry; drives the deterministic tie-break
    #[serde(skip)]
    pub insertion_index: u64,
}

impl Mock {
    pub fn protocol(&self) -> Protocol {
        self.spec.protocol()
    }

    /// Fill in a deterministic id and a fallback name when the declaration
    /// omitted them. Identical declarations yield identical ids across
    /// processes; name and priority take part so two mocks sharing a
    /// matcher (a priority-override pair) keep distinct identities.
    pub fn fill_defaults(&mut self) {
        if self.id.is_empty() {
            let key = format!(
                "{}|{}|{}",
                self.spec.identity_key(),
                self.name,
                self.priority
            );
            self.id =
                uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string();
        }
        if self.name.is_empty() {
            self.name = self.spec.describe();
        }
    }

    /// Validate the declaration, collecting every field failure
    pub fn validate(&self) -> Vec<FieldError> {
        self.spec.validate()
    }
}

/// Tagged variant over the protocol specs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MockSpec {
    Http(HttpMockSpec),
    Grpc(GrpcMockSpec),
    #[serde(rename = "graphql")]
    GraphQl(GraphQlMockSpec),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketMockSpec),
    Mqtt(MqttMockSpec),
    Sse(SseMockSpec),
    Soap(SoapMockSpec),
    OAuth(OAuthMockSpec),
}

impl MockSpec {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Http(_) => Protocol::Http,
            Self::Grpc(_) => Protocol::Grpc,
            Self::GraphQl(_) => Protocol::GraphQl,
            Self::WebSocket(_) => Protocol::WebSocket,
            Self::Mqtt(_) => Protocol::Mqtt,
            Self::Sse(_) => Protocol::Sse,
            Self::Soap(_) => Protocol::Soap,
            Self::OAuth(_) => Protocol::OAuth,
        }
    }

    /// Stable identity over the identifying matcher fields; feeds the
    /// deterministic id so reloading an unchanged config keeps ids stable
    /// across processes.
    pub fn identity_key(&self) -> String {
        match self {
            Self::Http(s) => format!(
                "http:{}:{}",
                s.matcher.method.as_deref().unwrap_or("*"),
                s.matcher.path.as_deref().unwrap_or("*")
            ),
            Self::Grpc(s) => format!("grpc:{}:{}:{}", s.port, s.service, s.method),
            Self::GraphQl(s) => format!(
                "graphql:{}:{}",
                s.matcher.operation_name.as_deref().unwrap_or("*"),
                s.matcher.field.as_deref().unwrap_or("*")
            ),
            Self::WebSocket(s) => format!("websocket:{}", s.path),
            Self::Mqtt(s) => format!("mqtt:{}:{}", s.port.unwrap_or(0), s.topic),
            Self::Sse(s) => format!("sse:{}", s.path),
            Self::Soap(s) => format!("soap:{}:{}", s.path, s.operation),
            Self::OAuth(s) => format!("oauth:{}", s.token_path),
        }
    }

    /// Short human-readable description used as a fallback display name
    pub fn describe(&self) -> String {
        match self {
            Self::Http(s) => format!(
                "{} {}",
                s.matcher.method.as_deref().unwrap_or("ANY"),
                s.matcher.path.as_deref().unwrap_or("/*")
            ),
            Self::Grpc(s) => format!("{}/{}", s.service, s.method),
            Self::GraphQl(s) => s
                .matcher
                .operation_name
                .clone()
                .or_else(|| s.matcher.field.clone())
                .unwrap_or_else(|| "graphql".to_string()),
            Self::WebSocket(s) => format!("ws {}", s.path),
            Self::Mqtt(s) => format!("mqtt {}", s.topic),
            Self::Sse(s) => format!("sse {}", s.path),
            Self::Soap(s) => format!("soap {}", s.operation),
            Self::OAuth(s) => format!("oauth {}", s.token_path),
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self {
            Self::Http(s) => s.validate(&mut errors),
            Self::Grpc(s) => s.validate(&mut errors),
            Self::Mqtt(s) => s.validate(&mut errors),
            Self::Soap(s) => s.validate(&mut errors),
            Self::WebSocket(s) => s.validate(&mut errors),
            Self::Sse(_) | Self::GraphQl(_) | Self::OAuth(_) => {}
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// HTTP

/// HTTP matcher: a request matches only if every declared field matches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpMatcher {
    /// Exact HTTP method; `None` matches any
    pub method: Option<String>,
    /// Literal path, `{param}` placeholder path, or glob (`*` / trailing `**`)
    pub path: Option<String>,
    /// Required headers; value `"*"` means present-with-any-value
    pub headers: HashMap<String, String>,
    /// Required query parameters, exact value
    pub query: HashMap<String, String>,
    /// Body predicates, all must hold
    pub body: Vec<BodyPredicate>,
}

/// A predicate against the request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BodyPredicate {
    /// Body contains the given substring
    Contains { value: String },
    /// JSONPath selects a value equal to `equals`
    JsonPath {
        path: String,
        equals: serde_json::Value,
    },
    /// Body matches the regex
    Regex { pattern: String },
}

/// Response template shared by the HTTP-shaped protocols
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status_code: u16,
    /// Response headers; values may contain placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Body: a string (possibly templated) or a JSON document
    #[serde(default)]
    pub body: serde_json::Value,
    /// Fixed delay before responding, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: HashMap::new(),
            body: serde_json::Value::Null,
            delay_ms: None,
        }
    }
}

/// Wiring of a mock to a stateful resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulBinding {
    /// Resource name in the stateful store
    pub resource: String,
    /// Explicit action; HTTP derives it from the verb when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CrudAction>,
}

/// CRUD actions a stateful side-effect can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMockSpec {
    #[serde(default)]
    pub matcher: HttpMatcher,
    #[serde(default)]
    pub response: ResponseSpec,
    /// Optional stateful side-effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful: Option<StatefulBinding>,
}

impl HttpMockSpec {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        for (i, predicate) in self.matcher.body.iter().enumerate() {
            match predicate {
                BodyPredicate::Regex { pattern } => {
                    if regex::Regex::new(pattern).is_err() {
                        errors.push(
                            FieldError::new(format!("matcher.body[{i}].pattern"), "invalid_regex")
                                .with_received(pattern.clone()),
                        );
                    }
                }
                BodyPredicate::JsonPath { path, .. } => {
                    if jsonpath::Selector::new(path).is_err() {
                        errors.push(
                            FieldError::new(format!("matcher.body[{i}].path"), "invalid_jsonpath")
                                .with_received(path.clone()),
                        );
                    }
                }
                BodyPredicate::Contains { .. } => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// gRPC

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcMockSpec {
    /// Port this service binds to; merges into an existing gRPC listener on
    /// the same port
    pub port: u16,
    /// Fully-qualified service name (e.g. `pkg.Greeter`)
    pub service: String,
    /// Method name
    pub method: String,
    /// Required metadata entries
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Per-field equality on the decoded request message, keyed by field
    /// number (schema-less wire decoding)
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub response: GrpcResponseSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful: Option<StatefulBinding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrpcResponseSpec {
    /// Unary response message, field-number keyed
    pub message: serde_json::Value,
    /// Server-streaming plan; when non-empty it replaces `message`
    pub stream: Vec<GrpcStreamMessage>,
    /// gRPC status code (0 = OK)
    pub status: u32,
    /// Optional `grpc-message` text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcStreamMessage {
    pub message: serde_json::Value,
    #[serde(default)]
    pub delay_ms: u64,
}

impl GrpcMockSpec {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        if self.service.is_empty() {
            errors.push(FieldError::new("service", "required"));
        }
        if self.method.is_empty() {
            errors.push(FieldError::new("method", "required"));
        }
        if self.port == 0 {
            errors.push(
                FieldError::new("port", "out_of_range")
                    .with_received("0")
                    .with_expected("1-65535"),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// GraphQL

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphQlMatcher {
    /// query | mutation | subscription; `None` matches any
    pub operation_type: Option<String>,
    /// Declared operation name
    pub operation_name: Option<String>,
    /// Top-level selection field
    pub field: Option<String>,
    /// Optional variable equality predicates
    pub variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlMockSpec {
    #[serde(default)]
    pub matcher: GraphQlMatcher,
    /// Rendered into the `data` envelope of the GraphQL response
    #[serde(default)]
    pub response: ResponseSpec,
}

// ---------------------------------------------------------------------------
// WebSocket

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketMockSpec {
    /// Upgrade path
    pub path: String,
    /// Required subprotocol, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
    /// Frames sent right after the session is established
    #[serde(default)]
    pub on_connect: Vec<WsFrame>,
    /// Per-frame rules dispatched within the session
    #[serde(default)]
    pub rules: Vec<WsRule>,
}

impl WebSocketMockSpec {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        if self.path.is_empty() {
            errors.push(FieldError::new("path", "required"));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.matcher.equals.is_none() && rule.matcher.json_path.is_none() {
                errors.push(FieldError::new(
                    format!("rules[{i}].matcher"),
                    "required",
                ));
            }
        }
    }
}

/// Matches an incoming WebSocket frame within an established session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsFrameMatcher {
    /// Exact payload equality
    pub equals: Option<String>,
    /// JSONPath predicate against a JSON payload
    pub json_path: Option<JsonPathPredicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsonPathPredicate {
    pub path: String,
    pub equals: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsRule {
    pub matcher: WsFrameMatcher,
    pub response: Vec<WsFrame>,
}

/// A scripted outbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsFrame {
    #[serde(default)]
    pub kind: WsFrameKind,
    /// Text payload or JSON document; templated
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsFrameKind {
    #[default]
    Text,
    Binary,
    Json,
}

// ---------------------------------------------------------------------------
// MQTT

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttMockSpec {
    /// Broker port; `None` uses the primary broker, otherwise merges into
    /// (or spawns) a broker on that port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Topic filter this mock listens on (`+`/`#` wildcards)
    pub topic: String,
    /// Canned publish emitted when a matching publish arrives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MqttPublishSpec>,
    /// Retained messages seeded when the mock is registered
    #[serde(default)]
    pub retained: Vec<MqttPublishSpec>,
    /// Periodic publisher attached to this mock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator: Option<MqttSimulatorSpec>,
    /// Access-control entries, wildcard-matched like subscriptions
    #[serde(default)]
    pub acl: Vec<MqttAclRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttPublishSpec {
    /// Destination topic; may reference the inbound topic via templates
    pub topic: String,
    /// Payload; templated
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSimulatorSpec {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub interval_ms: u64,
    /// Stop after this many messages; `None` runs until shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<u64>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttAclRule {
    /// Client id pattern (`*` wildcard) this rule applies to
    #[serde(default)]
    pub client_id: Option<String>,
    /// Topic filter the rule covers
    pub topic: String,
    #[serde(default = "default_true")]
    pub allow_publish: bool,
    #[serde(default = "default_true")]
    pub allow_subscribe: bool,
}

impl MqttMockSpec {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        if let Err(reason) = crate::matching::mqtt::validate_filter(&self.topic) {
            errors.push(
                FieldError::new("topic", "invalid_topic_filter")
                    .with_received(self.topic.clone())
                    .with_hint(reason),
            );
        }
        for (i, rule) in self.acl.iter().enumerate() {
            if let Err(reason) = crate::matching::mqtt::validate_filter(&rule.topic) {
                errors.push(
                    FieldError::new(format!("acl[{i}].topic"), "invalid_topic_filter")
                        .with_received(rule.topic.clone())
                        .with_hint(reason),
                );
            }
        }
        if self.qos_out_of_range() {
            errors.push(
                FieldError::new("qos", "out_of_range").with_expected("0-2"),
            );
        }
    }

    fn qos_out_of_range(&self) -> bool {
        self.response.iter().any(|r| r.qos > 2)
            || self.retained.iter().any(|r| r.qos > 2)
            || self.simulator.iter().any(|s| s.qos > 2)
    }
}

// ---------------------------------------------------------------------------
// SSE

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseMockSpec {
    pub path: String,
    /// Event list emitted on the fixed cadence
    #[serde(default)]
    pub events: Vec<SseEventSpec>,
    /// Cadence between events, in milliseconds
    #[serde(default = "default_sse_interval")]
    pub interval_ms: u64,
    #[serde(default)]
    pub lifecycle: SseLifecycle,
}

fn default_sse_interval() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEventSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Data payload; templated
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SseLifecycle {
    /// Close the stream after this many events
    pub max_events: Option<usize>,
    /// Restart from the top of the event list instead of closing
    pub repeat: bool,
}

// ---------------------------------------------------------------------------
// SOAP

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapMockSpec {
    /// Endpoint path the envelope is POSTed to
    pub path: String,
    /// Local name of the first body child element
    pub operation: String,
    /// Optional XPath predicate against the envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<XPathPredicate>,
    /// Response envelope; body is an XML string template
    #[serde(default)]
    pub response: ResponseSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful: Option<StatefulBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XPathPredicate {
    /// Slash-separated element path, e.g. `/Envelope/Body/GetUser/id`
    pub path: String,
    /// Required text content; `None` means the element must merely exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
}

impl SoapMockSpec {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        if self.operation.is_empty() {
            errors.push(FieldError::new("operation", "required"));
        }
        if self.path.is_empty() {
            errors.push(FieldError::new("path", "required"));
        }
    }
}

// ---------------------------------------------------------------------------
// OAuth

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthMockSpec {
    /// Token endpoint path
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Accepted grant types
    #[serde(default = "default_grants")]
    pub grants: Vec<String>,
    /// Registered clients; empty accepts any client
    #[serde(default)]
    pub clients: Vec<OAuthClient>,
    /// Token lifetime in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    /// Scope string echoed into issued tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_path() -> String {
    "/oauth/token".to_string()
}

fn default_grants() -> Vec<String> {
    vec!["client_credentials".to_string(), "password".to_string()]
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mock_roundtrip() {
        let yaml = r#"
type: http
name: hello
matcher:
  method: GET
  path: /hello
response:
  statusCode: 200
  body: hi
"#;
        let mut mock: Mock = serde_yaml::from_str(yaml).expect("parse");
        mock.fill_defaults();
        assert_eq!(mock.protocol(), Protocol::Http);
        assert!(!mock.id.is_empty());
        assert!(mock.enabled);
        let MockSpec::Http(spec) = &mock.spec else {
            panic!("expected http spec");
        };
        assert_eq!(spec.matcher.method.as_deref(), Some("GET"));
        assert_eq!(spec.response.status_code, 200);
    }

    #[test]
    fn derived_ids_are_stable() {
        let yaml = "type: http\nmatcher:\n  method: GET\n  path: /a\n";
        let mut a: Mock = serde_yaml::from_str(yaml).expect("parse");
        let mut b: Mock = serde_yaml::from_str(yaml).expect("parse");
        a.fill_defaults();
        b.fill_defaults();
        assert_eq!(a.id, b.id);

        let mut c: Mock =
            serde_yaml::from_str("type: http\nmatcher:\n  method: GET\n  path: /b\n")
                .expect("parse");
        c.fill_defaults();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn invalid_mqtt_filter_rejected() {
        let yaml = "type: mqtt\ntopic: \"devices/#/status\"\n";
        let mock: Mock = serde_yaml::from_str(yaml).expect("parse");
        let errors = mock.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "invalid_topic_filter");
    }

    #[test]
    fn grpc_spec_requires_service_and_method() {
        let yaml = "type: grpc\nport: 50051\nservice: \"\"\nmethod: \"\"\n";
        let mock: Mock = serde_yaml::from_str(yaml).expect("parse");
        let errors = mock.validate();
        assert!(errors.iter().any(|e| e.location == "service"));
        assert!(errors.iter().any(|e| e.location == "method"));
    }
}
