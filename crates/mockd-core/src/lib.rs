//! # mockd core
//!
//! Shared foundations for the mockd multi-protocol mock server: the mock
//! data model, protocol matchers and dispatch, the template engine, the
//! chaos engine, and the concurrent in-memory stores (registry, stateful
//! resources, request log, verification counters).
//!
//! Protocol listeners live in their own crates (`mockd-http`, `mockd-grpc`,
//! `mockd-mqtt`); the admin surface in `mockd-admin`; lifecycle in
//! `mockd-server`. Everything they share flows through [`Stores`].
//!
//! ## Quick start: dispatch against a registry
//!
//! ```rust,no_run
//! use mockd_core::{dispatch, MockRegistry, Protocol, RequestSnapshot};
//!
//! # async fn example(registry: MockRegistry) {
//! let snapshot = RequestSnapshot::new(Protocol::Http, "GET", "/hello");
//! let mocks = registry.snapshot(Protocol::Http).await;
//! let outcome = dispatch::dispatch(&mocks, &snapshot);
//! # }
//! ```

pub mod chaos;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod matching;
pub mod model;
pub mod registry;
pub mod request_log;
pub mod sequence;
pub mod state;
pub mod template;
pub mod tokens;
pub mod verification;

pub use chaos::{ChaosAction, ChaosDecision, ChaosEngine, ChaosSettings};
pub use config::MockdConfig;
pub use dispatch::{DispatchHit, DispatchOutcome};
pub use error::{Error, FieldError, Result};
pub use events::{ClientCertInfo, RequestSnapshot, ResponseRecord};
pub use matching::NearMiss;
pub use model::{Mock, MockSpec, Protocol};
pub use registry::{ImportReport, MockRegistry, ReloadReport};
pub use request_log::{LogQuery, RequestLog, RequestLogEntry};
pub use sequence::SequenceStore;
pub use state::{ListQuery, StatefulStore};
pub use template::{Template, TemplateContext};
pub use tokens::TokenStore;
pub use verification::{VerificationStore, VerifyAssertion};

use state::CustomOperation;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The shared store set handed to every listener and the admin surface.
///
/// Each store owns its entities exclusively; handlers work on snapshots and
/// ids, never on pointers shared across store boundaries.
#[derive(Debug)]
pub struct Stores {
    pub registry: MockRegistry,
    pub state: StatefulStore,
    pub request_log: RequestLog,
    pub verification: VerificationStore,
    pub chaos: ChaosEngine,
    pub sequences: SequenceStore,
    /// Tokens issued by OAuth mocks
    pub tokens: TokenStore,
    /// Custom multi-step operations, keyed by name
    pub operations: RwLock<HashMap<String, CustomOperation>>,
}

impl Stores {
    /// Build the store set from a loaded config document
    pub async fn from_config(config: &MockdConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let stores = Arc::new(Self {
            registry: MockRegistry::new(),
            state: StatefulStore::new(),
            request_log: RequestLog::new(config.max_log_entries),
            verification: VerificationStore::new(),
            chaos: ChaosEngine::new(config.chaos.clone().unwrap_or_default()),
            sequences: SequenceStore::new(),
            tokens: TokenStore::new(),
            operations: RwLock::new(HashMap::new()),
        });

        for mock in config.mocks.clone() {
            stores.registry.insert(mock).await?;
        }
        for resource in config.stateful_resources.clone() {
            stores.state.register(resource).await;
        }
        let mut operations = stores.operations.write().await;
        for op in config.custom_operations.clone() {
            operations.insert(op.name.clone(), op);
        }
        drop(operations);
        Ok(stores)
    }

    /// Export the current mock set as a config document (snapshot path)
    pub async fn export_config(&self, base: &MockdConfig) -> MockdConfig {
        let mut config = base.clone();
        config.mocks = self
            .registry
            .list()
            .await
            .iter()
            .map(|m| Mock::clone(m))
            .collect();
        config.chaos = Some(self.chaos.settings().await);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_from_config_registers_everything() {
        let config = MockdConfig::from_str(
            r#"
mocks:
  - type: http
    matcher:
      path: /ping
statefulResources:
  - name: users
    seedData:
      - id: "1"
customOperations:
  - name: Touch
    steps:
      - action: read
        resource: users
        id: "1"
"#,
        )
        .expect("parse");
        let stores = Stores::from_config(&config).await.expect("stores");
        assert_eq!(stores.registry.len().await, 1);
        assert_eq!(stores.state.resource_names().await, vec!["users"]);
        assert!(stores.operations.read().await.contains_key("Touch"));
    }

    #[tokio::test]
    async fn export_reflects_registry_changes() {
        let config = MockdConfig::default();
        let stores = Stores::from_config(&config).await.expect("stores");
        let exported = stores.export_config(&config).await;
        assert!(exported.mocks.is_empty());
    }
}
