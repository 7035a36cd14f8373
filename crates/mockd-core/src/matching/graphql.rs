//! GraphQL matcher: operation type, operation name, top-level field
//!
//! The incoming query is parsed once per request; matchers compare the
//! extracted operation against their declared fields plus optional variable
//! predicates.

use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::GraphQlMatcher;
use async_graphql::parser::types::{DocumentOperations, OperationType, Selection};
use serde::Deserialize;
use std::collections::HashMap;

/// The parsed shape of one incoming GraphQL request
#[derive(Debug, Clone, Default)]
pub struct GraphQlRequestInfo {
    pub operation_type: Option<String>,
    pub operation_name: Option<String>,
    /// Top-level selection fields
    pub fields: Vec<String>,
    pub variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQlHttpBody {
    query: String,
    #[serde(rename = "operationName")]
    operation_name: Option<String>,
    #[serde(default)]
    variables: Option<HashMap<String, serde_json::Value>>,
}

impl GraphQlRequestInfo {
    /// Parse the request body of a GraphQL-over-HTTP POST
    pub fn from_snapshot(snapshot: &RequestSnapshot) -> Option<Self> {
        let body: GraphQlHttpBody = serde_json::from_slice(snapshot.body.as_deref()?).ok()?;
        let doc = async_graphql::parser::parse_query(&body.query).ok()?;

        let mut info = Self {
            operation_name: body.operation_name.clone(),
            variables: body.variables.unwrap_or_default(),
            ..Default::default()
        };

        let operation = match &doc.operations {
            DocumentOperations::Single(op) => Some((None, op)),
            DocumentOperations::Multiple(ops) => {
                // Prefer the operation named by the request, else the first
                match &body.operation_name {
                    Some(name) => ops
                        .iter()
                        .find(|(n, _)| n.as_str() == name)
                        .map(|(n, op)| (Some(n.to_string()), op)),
                    None => ops.iter().next().map(|(n, op)| (Some(n.to_string()), op)),
                }
            }
        };

        if let Some((name, op)) = operation {
            if info.operation_name.is_none() {
                info.operation_name = name;
            }
            info.operation_type = Some(
                match op.node.ty {
                    OperationType::Query => "query",
                    OperationType::Mutation => "mutation",
                    OperationType::Subscription => "subscription",
                }
                .to_string(),
            );
            for item in &op.node.selection_set.node.items {
                if let Selection::Field(field) = &item.node {
                    info.fields.push(field.node.name.node.to_string());
                }
            }
        }
        Some(info)
    }
}

pub fn eval(matcher: &GraphQlMatcher, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();
    let Some(info) = GraphQlRequestInfo::from_snapshot(snapshot) else {
        eval.fail("request body is not a parseable GraphQL query".to_string());
        return eval.finish();
    };

    if let Some(expected) = &matcher.operation_type {
        match info.operation_type.as_deref() {
            Some(actual) if actual == expected => eval.pass("operationType", 1),
            Some(actual) => eval.fail(format!(
                "operation type expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("operation type expected {expected}, missing")),
        }
    }

    if let Some(expected) = &matcher.operation_name {
        match info.operation_name.as_deref() {
            Some(actual) if actual == expected => eval.pass("operationName", 2),
            Some(actual) => eval.fail(format!(
                "operation name expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("operation name expected {expected}, missing")),
        }
    }

    if let Some(expected) = &matcher.field {
        if info.fields.iter().any(|f| f == expected) {
            eval.pass("field", 2);
        } else {
            eval.fail(format!(
                "field expected {expected}, got [{}]",
                info.fields.join(", ")
            ));
        }
    }

    for (name, expected) in &matcher.variables {
        match info.variables.get(name) {
            Some(actual) if actual == expected => {
                eval.pass(format!("variable {name}"), 1);
            }
            Some(actual) => eval.fail(format!(
                "variable {name} expected {expected}, got {actual}"
            )),
            None => eval.fail(format!("variable {name} expected {expected}, missing")),
        }
    }

    eval.finish()
}
