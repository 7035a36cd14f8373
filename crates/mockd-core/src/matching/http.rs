//! HTTP matcher: method, path patterns, headers, query, body predicates

use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::{BodyPredicate, HttpMatcher};
use std::collections::HashMap;

/// Specificity weight of a path constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Literal match
    Exact,
    /// `{param}` placeholders or `*` globs
    Pattern,
    /// Trailing `**` prefix match
    Prefix,
}

impl PathKind {
    pub fn weight(self) -> u32 {
        match self {
            Self::Exact => 3,
            Self::Pattern => 2,
            Self::Prefix => 1,
        }
    }
}

/// Match a request path against a pattern.
///
/// Supported forms: literal (`/users/42`), `{param}` placeholders
/// (`/users/{id}`, captured), single-segment globs (`/users/*`), and a
/// trailing `**` that matches any remainder (`/files/**`).
pub fn match_path(pattern: &str, path: &str) -> Option<(PathKind, HashMap<String, String>)> {
    if pattern == path {
        return Some((PathKind::Exact, HashMap::new()));
    }

    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    let prefix = pattern_parts.last() == Some(&"**");
    if prefix {
        if path_parts.len() < pattern_parts.len() - 1 {
            return None;
        }
    } else if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    let mut saw_wildcard = false;
    for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
        if *pattern_part == "**" {
            return Some((PathKind::Prefix, params));
        }
        if let Some(name) = pattern_part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            params.insert(name.to_string(), (*path_part).to_string());
            saw_wildcard = true;
        } else if *pattern_part == "*" {
            saw_wildcard = true;
        } else if pattern_part != path_part {
            return None;
        }
    }
    if prefix {
        // Pattern ended with `/**` and the path had exactly the prefix
        return Some((PathKind::Prefix, params));
    }
    let kind = if saw_wildcard {
        PathKind::Pattern
    } else {
        PathKind::Exact
    };
    Some((kind, params))
}

/// Evaluate the HTTP matcher. An empty matcher matches every request with
/// score zero (lowest specificity).
pub fn eval(matcher: &HttpMatcher, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();

    if let Some(method) = &matcher.method {
        if method.eq_ignore_ascii_case(&snapshot.method) {
            eval.pass("method", 1);
        } else {
            eval.fail(format!(
                "method expected {}, got {}",
                method, snapshot.method
            ));
        }
    }

    if let Some(pattern) = &matcher.path {
        match match_path(pattern, &snapshot.path) {
            Some((kind, params)) => {
                eval.path_params = params;
                eval.pass("path", kind.weight());
            }
            None => eval.fail(format!("path expected {}, got {}", pattern, snapshot.path)),
        }
    }

    for (name, expected) in &matcher.headers {
        match snapshot.header(name) {
            Some(_) if expected == "*" => {
                eval.pass(format!("header {name}"), 1);
            }
            Some(actual) if actual == expected => {
                eval.pass(format!("header {name}"), 2);
            }
            Some(actual) => eval.fail(format!(
                "header {name} expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("header {name} expected {expected}, missing")),
        }
    }

    for (name, expected) in &matcher.query {
        match snapshot.query.get(name) {
            Some(actual) if actual == expected => {
                eval.pass(format!("query {name}"), 1);
            }
            Some(actual) => eval.fail(format!(
                "query {name} expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("query {name} expected {expected}, missing")),
        }
    }

    for predicate in &matcher.body {
        eval_body_predicate(predicate, snapshot, &mut eval);
    }

    eval.finish()
}

fn eval_body_predicate(
    predicate: &BodyPredicate,
    snapshot: &RequestSnapshot,
    eval: &mut MatchEval,
) {
    match predicate {
        BodyPredicate::Contains { value } => {
            let body = snapshot.body_text().unwrap_or_default();
            if body.contains(value.as_str()) {
                eval.pass("body contains", 1);
            } else {
                eval.fail(format!("body does not contain {value:?}"));
            }
        }
        BodyPredicate::Regex { pattern } => {
            let body = snapshot.body_text().unwrap_or_default();
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(&body) => eval.pass("body regex", 1),
                Ok(_) => eval.fail(format!("body does not match /{pattern}/")),
                Err(_) => eval.fail(format!("invalid body regex /{pattern}/")),
            }
        }
        BodyPredicate::JsonPath { path, equals } => {
            match json_path_matches(path, equals, snapshot) {
                Ok(true) => eval.pass(format!("body {path}"), 1),
                Ok(false) => eval.fail(format!("body {path} != {equals}")),
                Err(reason) => eval.fail(reason),
            }
        }
    }
}

pub(crate) fn json_path_matches(
    path: &str,
    equals: &serde_json::Value,
    snapshot: &RequestSnapshot,
) -> Result<bool, String> {
    let Some(body) = snapshot.body_json() else {
        return Err("body is not JSON".to_string());
    };
    let selector =
        jsonpath::Selector::new(path).map_err(|_| format!("invalid JSONPath {path}"))?;
    Ok(selector.find(&body).any(|v| v == equals))
}
