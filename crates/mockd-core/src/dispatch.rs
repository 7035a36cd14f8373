//! Mock selection: priority partition, specificity ranking, deterministic
//! tie-break, and near-miss diagnostics when nothing matches

use crate::events::RequestSnapshot;
use crate::matching::{match_mock, MatchEval, NearMiss};
use crate::model::Mock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The winning mock for a request, with its evaluation detail
#[derive(Debug, Clone)]
pub struct DispatchHit {
    pub mock: Arc<Mock>,
    pub score: u32,
    /// `{param}` captures from the path pattern, fed into the template context
    pub path_params: HashMap<String, String>,
}

/// Result of dispatching one request against the current mock set
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Matched(DispatchHit),
    /// No mock matched; per-mock diagnostics for every candidate of the
    /// request's protocol
    NoMatch { near_misses: Vec<NearMiss> },
}

impl DispatchOutcome {
    pub fn hit(&self) -> Option<&DispatchHit> {
        match self {
            Self::Matched(hit) => Some(hit),
            Self::NoMatch { .. } => None,
        }
    }
}

/// Select the single best-matching mock for a request.
///
/// Procedure: discard disabled mocks and non-matches, keep the
/// highest-priority partition of the survivors, rank by specificity score,
/// and break ties on insertion order (lower index wins), which keeps
/// behavior deterministic across processes loading the same config.
pub fn dispatch(mocks: &[Arc<Mock>], snapshot: &RequestSnapshot) -> DispatchOutcome {
    let mut evals: Vec<(&Arc<Mock>, MatchEval)> = Vec::new();
    for mock in mocks {
        if mock.protocol() != snapshot.protocol {
            continue;
        }
        if !mock.enabled {
            continue;
        }
        evals.push((mock, match_mock(mock, snapshot)));
    }

    let mut winner: Option<(&Arc<Mock>, MatchEval)> = None;
    for (mock, eval) in &evals {
        if !eval.matched {
            continue;
        }
        let better = match &winner {
            None => true,
            Some((current, current_eval)) => {
                (mock.priority, eval.score, std::cmp::Reverse(mock.insertion_index))
                    > (
                        current.priority,
                        current_eval.score,
                        std::cmp::Reverse(current.insertion_index),
                    )
            }
        };
        if better {
            winner = Some((*mock, eval.clone()));
        }
    }

    match winner {
        Some((mock, eval)) => {
            debug!(
                mock_id = %mock.id,
                score = eval.score,
                priority = mock.priority,
                "dispatch matched"
            );
            DispatchOutcome::Matched(DispatchHit {
                mock: Arc::clone(mock),
                score: eval.score,
                path_params: eval.path_params,
            })
        }
        None => {
            let near_misses = evals
                .iter()
                .map(|(mock, eval)| NearMiss::from_eval(mock, eval))
                .collect();
            DispatchOutcome::NoMatch { near_misses }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMatcher, HttpMockSpec, MockSpec, Protocol, ResponseSpec};

    fn http_mock(id: &str, method: &str, path: &str, priority: i32, index: u64) -> Arc<Mock> {
        Arc::new(Mock {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            priority,
            workspace: None,
            spec: MockSpec::Http(HttpMockSpec {
                matcher: HttpMatcher {
                    method: Some(method.to_string()),
                    path: Some(path.to_string()),
                    ..Default::default()
                },
                response: ResponseSpec::default(),
                stateful: None,
            }),
            insertion_index: index,
        })
    }

    fn get(path: &str) -> RequestSnapshot {
        RequestSnapshot::new(Protocol::Http, "GET", path)
    }

    #[test]
    fn higher_priority_wins() {
        let mocks = vec![
            http_mock("low", "GET", "/x", 5, 0),
            http_mock("high", "GET", "/x", 10, 1),
        ];
        let outcome = dispatch(&mocks, &get("/x"));
        assert_eq!(outcome.hit().expect("hit").mock.id, "high");
    }

    #[test]
    fn equal_priority_breaks_on_insertion_order() {
        let mocks = vec![
            http_mock("first", "GET", "/x", 10, 0),
            http_mock("second", "GET", "/x", 10, 1),
        ];
        let outcome = dispatch(&mocks, &get("/x"));
        assert_eq!(outcome.hit().expect("hit").mock.id, "first");
    }

    #[test]
    fn specificity_beats_insertion_order_within_priority() {
        let mocks = vec![
            http_mock("pattern", "GET", "/users/{id}", 0, 0),
            http_mock("literal", "GET", "/users/42", 0, 1),
        ];
        let outcome = dispatch(&mocks, &get("/users/42"));
        assert_eq!(outcome.hit().expect("hit").mock.id, "literal");
    }

    #[test]
    fn disabled_mocks_are_skipped() {
        let mut mock = http_mock("off", "GET", "/x", 0, 0);
        Arc::get_mut(&mut mock).expect("unshared").enabled = false;
        let outcome = dispatch(&[mock], &get("/x"));
        assert!(outcome.hit().is_none());
    }

    #[test]
    fn near_misses_cover_same_protocol_candidates() {
        let mocks = vec![
            http_mock("a", "GET", "/hello", 0, 0),
            http_mock("b", "POST", "/other", 0, 1),
        ];
        let DispatchOutcome::NoMatch { near_misses } = dispatch(&mocks, &get("/nope")) else {
            panic!("expected no match");
        };
        assert_eq!(near_misses.len(), 2);
        assert!(near_misses[0].reason.contains("path"));
    }

    #[test]
    fn winner_priority_dominates_any_match() {
        // If an enabled mock matches, the returned mock has >= its priority
        let mocks = vec![
            http_mock("broad", "GET", "/users/{id}", 1, 0),
            http_mock("narrow", "GET", "/users/42", 99, 1),
        ];
        let outcome = dispatch(&mocks, &get("/users/42"));
        assert_eq!(outcome.hit().expect("hit").mock.priority, 99);
    }
}
