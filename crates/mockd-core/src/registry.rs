//! The mock registry: single owner of all mock declarations
//!
//! All writes go through one write lock and rebuild a per-protocol snapshot
//! index; readers clone an `Arc` of the index at request start, keeping
//! per-request matching lock-free. A request either sees the prior mock set
//! or the new one, never a half-applied change.

use crate::error::{Error, Result};
use crate::model::{Mock, MockSpec, Protocol};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
struct RegistryInner {
    mocks: HashMap<String, Arc<Mock>>,
    /// Insertion order of ids, drives deterministic listing and tie-breaks
    order: Vec<String>,
    /// Snapshot index consulted by dispatch
    by_protocol: HashMap<Protocol, Arc<Vec<Arc<Mock>>>>,
    next_index: u64,
}

impl RegistryInner {
    fn rebuild_index(&mut self) {
        let mut by_protocol: HashMap<Protocol, Vec<Arc<Mock>>> = HashMap::new();
        for id in &self.order {
            if let Some(mock) = self.mocks.get(id) {
                by_protocol
                    .entry(mock.protocol())
                    .or_default()
                    .push(Arc::clone(mock));
            }
        }
        self.by_protocol = by_protocol
            .into_iter()
            .map(|(protocol, mocks)| (protocol, Arc::new(mocks)))
            .collect();
    }

    /// Port-level conflicts: same gRPC port+service+method, or same MQTT
    /// port+topic filter. Returns the offending existing mock's id.
    fn find_conflict(&self, candidate: &Mock) -> Option<String> {
        for id in &self.order {
            let Some(existing) = self.mocks.get(id) else {
                continue;
            };
            if existing.id == candidate.id {
                continue;
            }
            let clash = match (&existing.spec, &candidate.spec) {
                (MockSpec::Grpc(a), MockSpec::Grpc(b)) => {
                    a.port == b.port && a.service == b.service && a.method == b.method
                }
                (MockSpec::Mqtt(a), MockSpec::Mqtt(b)) => {
                    a.port == b.port && a.topic == b.topic
                }
                _ => false,
            };
            if clash {
                return Some(existing.id.clone());
            }
        }
        None
    }
}

/// Result of a bulk import or config apply
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    /// Mocks folded into an existing listener on the same port
    pub merged_into: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Result of a config reload diff
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadReport {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

/// Concurrent mapping from mock id to mock, plus the protocol index
#[derive(Debug, Default)]
pub struct MockRegistry {
    inner: RwLock<RegistryInner>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new mock. Fails on duplicate id, schema failure, or a
    /// gRPC/MQTT set-level conflict.
    pub async fn insert(&self, mut mock: Mock) -> Result<Arc<Mock>> {
        mock.fill_defaults();
        let field_errors = mock.validate();
        if !field_errors.is_empty() {
            return Err(Error::validation_fields("mock failed validation", field_errors));
        }

        let mut inner = self.inner.write().await;
        if inner.mocks.contains_key(&mock.id) {
            return Err(Error::conflict(format!("mock {} already exists", mock.id)));
        }
        if let Some(existing) = inner.find_conflict(&mock) {
            return Err(Error::conflict(format!(
                "conflicts with existing mock {existing}"
            )));
        }
        mock.insertion_index = inner.next_index;
        inner.next_index += 1;

        let mock = Arc::new(mock);
        inner.order.push(mock.id.clone());
        inner.mocks.insert(mock.id.clone(), Arc::clone(&mock));
        inner.rebuild_index();
        info!(mock_id = %mock.id, protocol = %mock.protocol(), "mock registered");
        Ok(mock)
    }

    /// Replace an existing mock, keeping its insertion index
    pub async fn update(&self, id: &str, mut mock: Mock) -> Result<Arc<Mock>> {
        mock.id = id.to_string();
        mock.fill_defaults();
        let field_errors = mock.validate();
        if !field_errors.is_empty() {
            return Err(Error::validation_fields("mock failed validation", field_errors));
        }

        let mut inner = self.inner.write().await;
        let existing = inner
            .mocks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("mock {id} not found")))?;
        mock.insertion_index = existing.insertion_index;
        if let Some(conflicting) = inner.find_conflict(&mock) {
            return Err(Error::conflict(format!(
                "conflicts with existing mock {conflicting}"
            )));
        }
        let mock = Arc::new(mock);
        inner.mocks.insert(id.to_string(), Arc::clone(&mock));
        inner.rebuild_index();
        info!(mock_id = %id, "mock updated");
        Ok(mock)
    }

    /// Flip the enabled flag
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Arc<Mock>> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .mocks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("mock {id} not found")))?;
        let mut updated = Mock::clone(existing);
        updated.enabled = enabled;
        let updated = Arc::new(updated);
        inner.mocks.insert(id.to_string(), Arc::clone(&updated));
        inner.rebuild_index();
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<Arc<Mock>> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .mocks
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("mock {id} not found")))?;
        inner.order.retain(|existing| existing != id);
        inner.rebuild_index();
        info!(mock_id = %id, "mock removed");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Mock>> {
        self.inner
            .read()
            .await
            .mocks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("mock {id} not found")))
    }

    /// All mocks in insertion order
    pub async fn list(&self) -> Vec<Arc<Mock>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.mocks.get(id).cloned())
            .collect()
    }

    /// Immutable snapshot of one protocol's mocks, cheap to take per request
    pub async fn snapshot(&self, protocol: Protocol) -> Arc<Vec<Arc<Mock>>> {
        self.inner
            .read()
            .await
            .by_protocol
            .get(&protocol)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.mocks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bulk import: each mock is validated and inserted; conflicts are
    /// reported rather than aborting the batch.
    pub async fn import(&self, mocks: Vec<Mock>) -> ImportReport {
        let mut report = ImportReport::default();
        for mock in mocks {
            match self.insert(mock).await {
                Ok(inserted) => {
                    report.imported += 1;
                    // gRPC/MQTT mocks landing on an in-use port merge into
                    // that listener rather than binding a new socket
                    if self.shares_port(&inserted).await {
                        report.merged_into.push(inserted.id.clone());
                    }
                }
                Err(e) => report.conflicts.push(e.to_string()),
            }
        }
        report
    }

    /// How many mocks (including this one) share the mock's gRPC/MQTT
    /// port; drives the `merged` flag in admin create responses
    pub async fn port_peer_count(&self, mock: &Mock) -> usize {
        let port = match &mock.spec {
            MockSpec::Grpc(spec) => Some(spec.port),
            MockSpec::Mqtt(spec) => spec.port,
            _ => None,
        };
        let Some(port) = port else {
            return 1;
        };
        let inner = self.inner.read().await;
        inner
            .mocks
            .values()
            .filter(|other| match (&other.spec, &mock.spec) {
                (MockSpec::Grpc(a), MockSpec::Grpc(_)) => a.port == port,
                (MockSpec::Mqtt(a), MockSpec::Mqtt(_)) => a.port == Some(port),
                _ => false,
            })
            .count()
            .max(1)
    }

    async fn shares_port(&self, mock: &Mock) -> bool {
        let port = match &mock.spec {
            MockSpec::Grpc(spec) => Some(spec.port),
            MockSpec::Mqtt(spec) => spec.port,
            _ => None,
        };
        let Some(port) = port else {
            return false;
        };
        let inner = self.inner.read().await;
        inner.mocks.values().any(|other| {
            other.id != mock.id
                && match (&other.spec, &mock.spec) {
                    (MockSpec::Grpc(a), MockSpec::Grpc(_)) => a.port == port,
                    (MockSpec::Mqtt(a), MockSpec::Mqtt(_)) => a.port == Some(port),
                    _ => false,
                }
        })
    }

    /// Reload: diff the running set against the desired set and apply the
    /// difference in a single write transaction.
    pub async fn reload(&self, desired: Vec<Mock>) -> Result<ReloadReport> {
        let mut prepared = Vec::with_capacity(desired.len());
        for mut mock in desired {
            mock.fill_defaults();
            let field_errors = mock.validate();
            if !field_errors.is_empty() {
                return Err(Error::validation_fields(
                    format!("mock {} failed validation", mock.id),
                    field_errors,
                ));
            }
            prepared.push(mock);
        }

        let mut inner = self.inner.write().await;
        let mut report = ReloadReport::default();
        let desired_ids: Vec<String> = prepared.iter().map(|m| m.id.clone()).collect();

        for id in inner.order.clone() {
            if !desired_ids.contains(&id) {
                inner.mocks.remove(&id);
                report.removed += 1;
            }
        }
        inner.order.retain(|id| desired_ids.contains(id));

        for mut mock in prepared {
            match inner.mocks.get(&mock.id) {
                Some(existing) => {
                    mock.insertion_index = existing.insertion_index;
                    report.updated += 1;
                }
                None => {
                    mock.insertion_index = inner.next_index;
                    inner.next_index += 1;
                    inner.order.push(mock.id.clone());
                    report.added += 1;
                }
            }
            inner.mocks.insert(mock.id.clone(), Arc::new(mock));
        }
        inner.rebuild_index();
        info!(
            added = report.added,
            removed = report.removed,
            updated = report.updated,
            "registry reloaded"
        );
        Ok(report)
    }
}
