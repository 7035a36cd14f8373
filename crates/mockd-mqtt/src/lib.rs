//! # mockd MQTT
//!
//! Embedded MQTT 3.1.1 broker support: packet codec, topic tree with
//! retained messages, the broker itself, and the listener set that merges
//! mocks declaring the same port onto one broker instead of binding a
//! second socket.

pub mod broker;
pub mod codec;
pub mod topics;

pub use broker::{BrokerConfig, MqttBroker};
pub use codec::{Packet, ProtocolError};

use mockd_core::model::MockSpec;
use mockd_core::{Error, Mock, Result, Stores};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// All running brokers, keyed by port.
///
/// Registering a mock whose port is already bound folds its topics into the
/// existing broker (port merging); set-level conflicts were already
/// rejected by the registry.
pub struct MqttListenerSet {
    stores: Arc<Stores>,
    /// Port a mock with no explicit port attaches to
    default_port: u16,
    brokers: Mutex<HashMap<u16, (Arc<MqttBroker>, JoinHandle<()>)>>,
}

impl MqttListenerSet {
    pub fn new(stores: Arc<Stores>, default_port: u16) -> Self {
        Self {
            stores,
            default_port,
            brokers: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a broker is bound on the port, then attach the mock to it.
    /// Returns `true` when the mock merged into an already-running broker.
    pub async fn register_mock(&self, mock: Arc<Mock>) -> Result<bool> {
        let MockSpec::Mqtt(spec) = &mock.spec else {
            return Err(Error::internal("not an mqtt mock"));
        };
        let port = spec.port.unwrap_or(self.default_port);

        let mut brokers = self.brokers.lock().await;
        if let Some((broker, _)) = brokers.get(&port) {
            broker.add_mock(mock).await;
            info!(port, "mqtt mock merged into running broker");
            return Ok(true);
        }
        let broker = MqttBroker::new(BrokerConfig::new(port), Arc::clone(&self.stores));
        let handle = broker.start().await?;
        broker.add_mock(mock).await;
        brokers.insert(port, (broker, handle));
        Ok(false)
    }

    /// Detach a mock; brokers stay up so later mocks can reuse the port
    pub async fn remove_mock(&self, mock_id: &str) {
        let brokers = self.brokers.lock().await;
        for (broker, _) in brokers.values() {
            broker.remove_mock(mock_id).await;
        }
    }

    /// Bring up the primary broker even before any mock declares a topic
    pub async fn ensure_primary(&self) -> Result<()> {
        let mut brokers = self.brokers.lock().await;
        if brokers.contains_key(&self.default_port) {
            return Ok(());
        }
        let broker = MqttBroker::new(
            BrokerConfig::new(self.default_port),
            Arc::clone(&self.stores),
        );
        let handle = broker.start().await?;
        brokers.insert(self.default_port, (broker, handle));
        Ok(())
    }

    pub async fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.brokers.lock().await.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Stop every broker. Each broker's `stop` joins its simulators
    /// outside the broker's own locks.
    pub async fn shutdown(&self) {
        let brokers = {
            let mut brokers = self.brokers.lock().await;
            std::mem::take(&mut *brokers)
        };
        for (port, (broker, handle)) in brokers {
            broker.stop().await;
            handle.abort();
            info!(port, "mqtt broker stopped");
        }
    }
}
