//! Bounded request log shared by every listener
//!
//! A fixed-capacity ring: push evicts the oldest entry. Reads copy under
//! the read lock so queries never block writers for long.

use crate::events::{RequestSnapshot, ResponseRecord};
use crate::matching::NearMiss;
use crate::model::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// One logged request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    /// Matched mock, or `None` for an unmatched request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
    pub request: RequestSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
    /// Diagnostics attached when no mock matched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub near_misses: Vec<NearMiss>,
    pub response_time_ms: u64,
}

impl RequestLogEntry {
    pub fn new(request: RequestSnapshot) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            protocol: request.protocol,
            mock_id: None,
            request,
            response: None,
            near_misses: Vec::new(),
            response_time_ms: 0,
        }
    }

    pub fn matched(mut self, mock_id: impl Into<String>) -> Self {
        self.mock_id = Some(mock_id.into());
        self
    }

    pub fn with_response(mut self, response: ResponseRecord) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_near_misses(mut self, near_misses: Vec<NearMiss>) -> Self {
        self.near_misses = near_misses;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.response_time_ms = elapsed_ms;
        self
    }
}

/// Query filters for the admin surface
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub protocol: Option<Protocol>,
    /// Only unmatched requests (near-miss inspection)
    pub unmatched_only: bool,
    /// Only matched requests
    pub matched_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Fixed-capacity ring of request log entries, most recent first
#[derive(Debug)]
pub struct RequestLog {
    entries: RwLock<VecDeque<RequestLogEntry>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity.
    ///
    /// A zero-capacity log accepts writes but always reads empty.
    pub async fn push(&self, entry: RequestLogEntry) {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    pub async fn query(&self, query: &LogQuery) -> Vec<RequestLogEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|entry| {
                if let Some(protocol) = query.protocol {
                    if entry.protocol != protocol {
                        return false;
                    }
                }
                if query.unmatched_only && entry.mock_id.is_some() {
                    return false;
                }
                if query.matched_only && entry.mock_id.is_none() {
                    return false;
                }
                if let Some(since) = query.since {
                    if entry.timestamp < since {
                        return false;
                    }
                }
                if let Some(until) = query.until {
                    if entry.timestamp > until {
                        return false;
                    }
                }
                true
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> RequestLogEntry {
        RequestLogEntry::new(RequestSnapshot::new(Protocol::Http, "GET", path))
    }

    #[tokio::test]
    async fn ring_evicts_oldest() {
        let log = RequestLog::new(2);
        log.push(entry("/1")).await;
        log.push(entry("/2")).await;
        log.push(entry("/3")).await;
        let entries = log.query(&LogQuery::default()).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request.path, "/3");
        assert_eq!(entries[1].request.path, "/2");
    }

    #[tokio::test]
    async fn zero_capacity_accepts_writes_but_reads_empty() {
        let log = RequestLog::new(0);
        log.push(entry("/x")).await;
        assert!(log.query(&LogQuery::default()).await.is_empty());
    }

    #[tokio::test]
    async fn filters_by_match_state_and_protocol() {
        let log = RequestLog::new(10);
        log.push(entry("/miss")).await;
        log.push(entry("/hit").matched("mock-1")).await;

        let unmatched = log
            .query(&LogQuery {
                unmatched_only: true,
                ..Default::default()
            })
            .await;
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].request.path, "/miss");

        let matched = log
            .query(&LogQuery {
                matched_only: true,
                ..Default::default()
            })
            .await;
        assert_eq!(matched.len(), 1);

        let mqtt = log
            .query(&LogQuery {
                protocol: Some(Protocol::Mqtt),
                ..Default::default()
            })
            .await;
        assert!(mqtt.is_empty());
    }
}
