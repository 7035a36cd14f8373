//! SOAP matcher: envelope parsing, operation extraction, XPath predicates
//!
//! The operation is the local name of the first child element of the SOAP
//! Body. XPath predicates are the slash-separated element-path subset, with
//! optional text equality.

use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::{SoapMockSpec, XPathPredicate};
use roxmltree::{Document, Node};

/// Extract the operation name from a SOAP envelope
pub fn extract_operation(envelope: &str) -> Option<String> {
    let doc = Document::parse(envelope).ok()?;
    let body = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Body")?;
    body.children()
        .find(|n| n.is_element())
        .map(|n| n.tag_name().name().to_string())
}

/// Evaluate an element-path predicate against an envelope.
///
/// The path walks element local names from the document root; a leading
/// `/Envelope` is accepted but optional.
pub fn xpath_holds(envelope: &str, predicate: &XPathPredicate) -> Result<bool, String> {
    let doc = Document::parse(envelope).map_err(|e| format!("invalid XML: {e}"))?;
    let segments: Vec<&str> = predicate
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return Err("empty XPath".to_string());
    }

    let root = doc.root_element();
    let mut start = 0;
    if segments[0] == root.tag_name().name() || segments[0] == "Envelope" {
        start = 1;
    }
    let nodes = walk(root, &segments[start..]);
    if nodes.is_empty() {
        return Ok(false);
    }
    match &predicate.equals {
        None => Ok(true),
        Some(expected) => Ok(nodes
            .iter()
            .any(|n| n.text().map(str::trim) == Some(expected.as_str()))),
    }
}

fn walk<'a>(node: Node<'a, 'a>, segments: &[&str]) -> Vec<Node<'a, 'a>> {
    let Some((head, rest)) = segments.split_first() else {
        return vec![node];
    };
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == *head)
        .flat_map(|c| walk(c, rest))
        .collect()
}

pub fn eval(spec: &SoapMockSpec, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();

    if snapshot.path == spec.path {
        eval.pass("path", 3);
    } else {
        eval.fail(format!("path expected {}, got {}", spec.path, snapshot.path));
    }

    let envelope = snapshot.body_text().unwrap_or_default();
    match extract_operation(&envelope) {
        Some(operation) if operation == spec.operation => eval.pass("operation", 2),
        Some(operation) => eval.fail(format!(
            "operation expected {}, got {}",
            spec.operation, operation
        )),
        None => eval.fail("request is not a SOAP envelope".to_string()),
    }

    if let Some(predicate) = &spec.xpath {
        match xpath_holds(&envelope, predicate) {
            Ok(true) => eval.pass("xpath", 1),
            Ok(false) => eval.fail(format!("xpath {} not satisfied", predicate.path)),
            Err(reason) => eval.fail(reason),
        }
    }

    eval.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    const ENVELOPE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GetUser xmlns="urn:users">
      <id>42</id>
    </GetUser>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn operation_is_first_body_child() {
        assert_eq!(extract_operation(ENVELOPE).as_deref(), Some("GetUser"));
        assert_eq!(extract_operation("<not-soap/>"), None);
    }

    #[test]
    fn xpath_text_equality() {
        let holds = xpath_holds(
            ENVELOPE,
            &XPathPredicate {
                path: "/Envelope/Body/GetUser/id".to_string(),
                equals: Some("42".to_string()),
            },
        );
        assert_eq!(holds, Ok(true));

        let misses = xpath_holds(
            ENVELOPE,
            &XPathPredicate {
                path: "/Envelope/Body/GetUser/id".to_string(),
                equals: Some("7".to_string()),
            },
        );
        assert_eq!(misses, Ok(false));
    }

    #[test]
    fn full_eval() {
        let spec = SoapMockSpec {
            path: "/soap".to_string(),
            operation: "GetUser".to_string(),
            xpath: None,
            response: Default::default(),
            stateful: None,
        };
        let snapshot = RequestSnapshot::new(Protocol::Soap, "GetUser", "/soap")
            .with_body(ENVELOPE.as_bytes().to_vec());
        assert!(eval(&spec, &snapshot).matched);
    }
}
