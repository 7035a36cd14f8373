//! WebSocket and SSE matchers: upgrade-path matching plus per-frame
//! dispatch within an established session

use super::http::match_path;
use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::{WebSocketMockSpec, WsFrameMatcher, WsRule};

/// Match a stream mock's path (shared by WebSocket upgrades and SSE)
pub fn eval_path(pattern: &str, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();
    match match_path(pattern, &snapshot.path) {
        Some((kind, params)) => {
            eval.path_params = params;
            eval.pass("path", kind.weight());
        }
        None => eval.fail(format!("path expected {}, got {}", pattern, snapshot.path)),
    }
    eval.finish()
}

pub fn eval_upgrade(spec: &WebSocketMockSpec, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = eval_path(&spec.path, snapshot);
    if let Some(subprotocol) = &spec.subprotocol {
        let offered = snapshot.header("sec-websocket-protocol").unwrap_or("");
        if offered.split(',').any(|p| p.trim() == subprotocol) {
            eval.pass("subprotocol", 1);
        } else {
            eval.fail(format!(
                "subprotocol expected {subprotocol}, offered {offered:?}"
            ));
        }
        eval = eval.finish();
    }
    eval
}

/// Find the first session rule matching an incoming frame payload
pub fn match_frame<'a>(rules: &'a [WsRule], payload: &str) -> Option<&'a WsRule> {
    rules.iter().find(|rule| frame_matches(&rule.matcher, payload))
}

fn frame_matches(matcher: &WsFrameMatcher, payload: &str) -> bool {
    if let Some(expected) = &matcher.equals {
        if expected != payload {
            return false;
        }
    }
    if let Some(predicate) = &matcher.json_path {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return false;
        };
        let Ok(selector) = jsonpath::Selector::new(&predicate.path) else {
            return false;
        };
        if !selector.find(&value).any(|v| *v == predicate.equals) {
            return false;
        }
    }
    matcher.equals.is_some() || matcher.json_path.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JsonPathPredicate, Protocol, WsFrame};

    #[test]
    fn upgrade_requires_declared_subprotocol() {
        let spec = WebSocketMockSpec {
            path: "/ws".to_string(),
            subprotocol: Some("mqtt".to_string()),
            on_connect: vec![],
            rules: vec![],
        };
        let mut snapshot = RequestSnapshot::new(Protocol::WebSocket, "GET", "/ws");
        assert!(!eval_upgrade(&spec, &snapshot).matched);

        snapshot
            .headers
            .insert("sec-websocket-protocol".to_string(), "graphql-ws, mqtt".to_string());
        assert!(eval_upgrade(&spec, &snapshot).matched);
    }

    #[test]
    fn frame_rules_dispatch_on_payload() {
        let rules = vec![
            WsRule {
                matcher: WsFrameMatcher {
                    equals: Some("ping".to_string()),
                    json_path: None,
                },
                response: vec![WsFrame {
                    kind: Default::default(),
                    body: serde_json::json!("pong"),
                    delay_ms: 0,
                }],
            },
            WsRule {
                matcher: WsFrameMatcher {
                    equals: None,
                    json_path: Some(JsonPathPredicate {
                        path: "$.op".to_string(),
                        equals: serde_json::json!("subscribe"),
                    }),
                },
                response: vec![],
            },
        ];

        assert!(match_frame(&rules, "ping").is_some());
        assert!(match_frame(&rules, r#"{"op":"subscribe"}"#).is_some());
        assert!(match_frame(&rules, "unknown").is_none());
    }

    #[test]
    fn empty_matcher_never_matches_frames() {
        let matcher = WsFrameMatcher::default();
        assert!(!frame_matches(&matcher, "anything"));
    }
}
