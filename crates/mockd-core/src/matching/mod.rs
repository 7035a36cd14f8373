//! Protocol-specific matcher functions and the specificity model
//!
//! Every matcher evaluates to a [`MatchEval`]: whether the mock applies, the
//! specificity score used for tie-breaking, and the field-by-field
//! agreement record that feeds near-miss diagnostics when nothing matches.

pub mod graphql;
pub mod grpc;
pub mod http;
pub mod mqtt;
pub mod soap;
pub mod ws;

use crate::events::RequestSnapshot;
use crate::model::{Mock, MockSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of evaluating one mock's matcher against one request
#[derive(Debug, Clone, Default)]
pub struct MatchEval {
    /// All declared constraints held
    pub matched: bool,
    /// Sum of satisfied constraint weights; ranks mocks of equal priority
    pub score: u32,
    /// Constraints that held, as `field` labels
    pub agreed: Vec<String>,
    /// Constraints that failed, as human-readable reasons
    pub disagreed: Vec<String>,
    /// `{param}` captures from the path pattern
    pub path_params: HashMap<String, String>,
}

impl MatchEval {
    pub(crate) fn pass(&mut self, label: impl Into<String>, weight: u32) {
        self.agreed.push(label.into());
        self.score += weight;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.disagreed.push(reason.into());
    }

    pub(crate) fn finish(mut self) -> Self {
        self.matched = self.disagreed.is_empty();
        self
    }
}

/// Near-miss diagnostic for one mock that failed to match
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub mock_id: String,
    pub mock_name: String,
    /// Matcher fields that agreed
    pub matched_fields: Vec<String>,
    /// Matcher fields that disagreed, with reasons
    pub failed_fields: Vec<String>,
    /// Percentage of declared fields satisfied
    pub percent: u8,
    /// One-line summary, e.g. "path matched, but method expected GET, got DELETE"
    pub reason: String,
}

impl NearMiss {
    pub(crate) fn from_eval(mock: &Mock, eval: &MatchEval) -> Self {
        let total = eval.agreed.len() + eval.disagreed.len();
        let percent = if total == 0 {
            0
        } else {
            (eval.agreed.len() * 100 / total) as u8
        };
        let reason = match (eval.agreed.is_empty(), eval.disagreed.first()) {
            (false, Some(failed)) => {
                format!("{} matched, but {}", eval.agreed.join(", "), failed)
            }
            (true, Some(failed)) => failed.clone(),
            (_, None) => "matched".to_string(),
        };
        Self {
            mock_id: mock.id.clone(),
            mock_name: mock.name.clone(),
            matched_fields: eval.agreed.clone(),
            failed_fields: eval.disagreed.clone(),
            percent,
            reason,
        }
    }
}

/// Evaluate a mock's matcher against a request of the same protocol.
///
/// Callers are expected to have filtered by protocol already; a mismatched
/// protocol evaluates to a non-match with no diagnostics.
pub fn match_mock(mock: &Mock, snapshot: &RequestSnapshot) -> MatchEval {
    if mock.protocol() != snapshot.protocol {
        let mut eval = MatchEval::default();
        eval.fail(format!(
            "protocol expected {}, got {}",
            mock.protocol(),
            snapshot.protocol
        ));
        return eval.finish();
    }
    match &mock.spec {
        MockSpec::Http(spec) => http::eval(&spec.matcher, snapshot),
        MockSpec::Grpc(spec) => grpc::eval(spec, snapshot),
        MockSpec::GraphQl(spec) => graphql::eval(&spec.matcher, snapshot),
        MockSpec::WebSocket(spec) => ws::eval_upgrade(spec, snapshot),
        MockSpec::Sse(spec) => ws::eval_path(&spec.path, snapshot),
        MockSpec::Mqtt(spec) => mqtt::eval(spec, snapshot),
        MockSpec::Soap(spec) => soap::eval(spec, snapshot),
        MockSpec::OAuth(spec) => {
            // OAuth mocks answer their token endpoint path only
            let mut eval = MatchEval::default();
            if snapshot.path == spec.token_path {
                eval.pass("path", 3);
            } else {
                eval.fail(format!(
                    "path expected {}, got {}",
                    spec.token_path, snapshot.path
                ));
            }
            eval.finish()
        }
    }
}
