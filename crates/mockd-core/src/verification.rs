//! Per-mock verification: call counters and recent invocation snapshots
//!
//! Counters are atomic and updated on every dispatch; a short ring of
//! invocation snapshots backs the `/invocations/{id}` admin endpoint and
//! WireMock-style `verify` assertions in test code.

use crate::events::RequestSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const INVOCATION_RING_CAPACITY: usize = 25;

/// A recorded invocation of one mock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub request: RequestSnapshot,
}

#[derive(Debug, Default)]
struct MockStats {
    count: AtomicU64,
    recent: Mutex<VecDeque<InvocationSnapshot>>,
}

/// Count assertion for `verify`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "count", rename_all = "camelCase")]
pub enum VerifyAssertion {
    Exactly(u64),
    AtLeast(u64),
    AtMost(u64),
    Never,
}

/// Result of a verification check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub passed: bool,
    pub actual: u64,
    pub expected: VerifyAssertion,
}

/// The verification store, keyed by mock id
#[derive(Debug, Default)]
pub struct VerificationStore {
    stats: RwLock<HashMap<String, Arc<MockStats>>>,
}

impl VerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch hit for a mock
    pub async fn record(&self, mock_id: &str, request: &RequestSnapshot) {
        let stats = {
            let read = self.stats.read().await;
            read.get(mock_id).cloned()
        };
        let stats = match stats {
            Some(stats) => stats,
            None => {
                let mut write = self.stats.write().await;
                Arc::clone(write.entry(mock_id.to_string()).or_default())
            }
        };
        stats.count.fetch_add(1, Ordering::Relaxed);
        let mut recent = stats.recent.lock();
        recent.push_front(InvocationSnapshot {
            timestamp: Utc::now(),
            request: request.clone(),
        });
        while recent.len() > INVOCATION_RING_CAPACITY {
            recent.pop_back();
        }
    }

    /// Total calls recorded for a mock; 0 when never called
    pub async fn count(&self, mock_id: &str) -> u64 {
        self.stats
            .read()
            .await
            .get(mock_id)
            .map(|s| s.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Recent invocation snapshots, most recent first
    pub async fn invocations(&self, mock_id: &str) -> Vec<InvocationSnapshot> {
        self.stats
            .read()
            .await
            .get(mock_id)
            .map(|s| s.recent.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn verify(&self, mock_id: &str, assertion: VerifyAssertion) -> VerifyResult {
        let actual = self.count(mock_id).await;
        let passed = match assertion {
            VerifyAssertion::Exactly(n) => actual == n,
            VerifyAssertion::AtLeast(n) => actual >= n,
            VerifyAssertion::AtMost(n) => actual <= n,
            VerifyAssertion::Never => actual == 0,
        };
        VerifyResult {
            passed,
            actual,
            expected: assertion,
        }
    }

    /// Per-mock counters keyed by id, for the status/metrics endpoints
    pub async fn counts(&self) -> HashMap<String, u64> {
        self.stats
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.count.load(Ordering::Relaxed)))
            .collect()
    }

    pub async fn reset(&self) {
        self.stats.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    fn request() -> RequestSnapshot {
        RequestSnapshot::new(Protocol::Http, "GET", "/x")
    }

    #[tokio::test]
    async fn counts_and_assertions() {
        let store = VerificationStore::new();
        for _ in 0..3 {
            store.record("m1", &request()).await;
        }
        assert_eq!(store.count("m1").await, 3);
        assert!(store.verify("m1", VerifyAssertion::Exactly(3)).await.passed);
        assert!(store.verify("m1", VerifyAssertion::AtLeast(2)).await.passed);
        assert!(!store.verify("m1", VerifyAssertion::AtMost(2)).await.passed);
        assert!(store.verify("m2", VerifyAssertion::Never).await.passed);
    }

    #[tokio::test]
    async fn invocation_ring_is_bounded() {
        let store = VerificationStore::new();
        for _ in 0..(INVOCATION_RING_CAPACITY + 10) {
            store.record("m1", &request()).await;
        }
        assert_eq!(
            store.invocations("m1").await.len(),
            INVOCATION_RING_CAPACITY
        );
        assert_eq!(
            store.count("m1").await,
            (INVOCATION_RING_CAPACITY + 10) as u64
        );
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = VerificationStore::new();
        store.record("m1", &request()).await;
        store.reset().await;
        assert_eq!(store.count("m1").await, 0);
        assert!(store.invocations("m1").await.is_empty());
    }
}
