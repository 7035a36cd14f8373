//! gRPC matcher: service FQN + method, metadata, decoded-field equality

use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::GrpcMockSpec;

/// Evaluate a gRPC mock against a request snapshot.
///
/// The snapshot's `path` carries `/Service/Method`, its `headers` the
/// request metadata, and its `body` the request message already decoded to
/// field-number keyed JSON by the wire codec.
pub fn eval(spec: &GrpcMockSpec, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();

    let (service, method) = split_path(&snapshot.path);
    if service == spec.service && method == spec.method {
        eval.pass("service/method", 2);
    } else {
        eval.fail(format!(
            "expected {}/{}, got {}/{}",
            spec.service, spec.method, service, method
        ));
    }

    for (name, expected) in &spec.metadata {
        match snapshot.header(name) {
            Some(actual) if actual == expected => {
                eval.pass(format!("metadata {name}"), 1);
            }
            Some(actual) => eval.fail(format!(
                "metadata {name} expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("metadata {name} expected {expected}, missing")),
        }
    }

    if !spec.fields.is_empty() {
        let message = snapshot.body_json().unwrap_or(serde_json::Value::Null);
        for (field, expected) in &spec.fields {
            match message.get(field) {
                Some(actual) if actual == expected => {
                    eval.pass(format!("field {field}"), 1);
                }
                Some(actual) => eval.fail(format!(
                    "field {field} expected {expected}, got {actual}"
                )),
                None => eval.fail(format!("field {field} expected {expected}, missing")),
            }
        }
    }

    eval.finish()
}

/// Split `/pkg.Service/Method` into its parts
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) => (service, method),
        None => (trimmed, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    fn spec(service: &str, method: &str) -> GrpcMockSpec {
        GrpcMockSpec {
            port: 50051,
            service: service.to_string(),
            method: method.to_string(),
            metadata: Default::default(),
            fields: Default::default(),
            response: Default::default(),
            stateful: None,
        }
    }

    #[test]
    fn matches_on_service_and_method() {
        let snapshot = RequestSnapshot::new(Protocol::Grpc, "Foo", "/svcA.Greeter/Foo");
        assert!(eval(&spec("svcA.Greeter", "Foo"), &snapshot).matched);
        assert!(!eval(&spec("svcA.Greeter", "Bar"), &snapshot).matched);
    }

    #[test]
    fn field_equality_on_decoded_message() {
        let mut s = spec("svc.Echo", "Say");
        s.fields.insert("1".to_string(), serde_json::json!("hello"));
        let snapshot = RequestSnapshot::new(Protocol::Grpc, "Say", "/svc.Echo/Say")
            .with_body(br#"{"1":"hello"}"#.to_vec());
        assert!(eval(&s, &snapshot).matched);

        let other = RequestSnapshot::new(Protocol::Grpc, "Say", "/svc.Echo/Say")
            .with_body(br#"{"1":"bye"}"#.to_vec());
        assert!(!eval(&s, &other).matched);
    }
}
