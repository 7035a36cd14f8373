//! # mockd server
//!
//! Engine lifecycle: bring every listener up in a fixed order with atomic
//! rollback on partial failure, drain and stop on shutdown, and reload by
//! diffing the running mock set against a new config in one registry
//! transaction.

use async_trait::async_trait;
use mockd_admin::{AdminState, EngineInfo, ListenerHook};
use mockd_core::model::MockSpec;
use mockd_core::{Error, Mock, MockdConfig, Protocol, Result, Stores};
use mockd_grpc::GrpcListenerSet;
use mockd_mqtt::MqttListenerSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DRAIN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);

/// Wires admin mock writes to the per-mock listener sets
struct EngineHook {
    grpc: Arc<GrpcListenerSet>,
    mqtt: Arc<MqttListenerSet>,
}

#[async_trait]
impl ListenerHook for EngineHook {
    async fn mock_added(&self, mock: Arc<Mock>) -> Result<()> {
        match mock.protocol() {
            Protocol::Grpc => self.grpc.register_mock(mock).await.map(|_| ()),
            Protocol::Mqtt => self.mqtt.register_mock(mock).await.map(|_| ()),
            _ => Ok(()),
        }
    }

    async fn mock_removed(&self, mock_id: &str) {
        self.grpc.remove_mock(mock_id).await;
        self.mqtt.remove_mock(mock_id).await;
    }

    async fn ports(&self) -> (Vec<u16>, Vec<u16>) {
        (self.grpc.ports().await, self.mqtt.ports().await)
    }
}

/// The running engine: stores plus every live listener
pub struct Engine {
    config: MockdConfig,
    stores: Arc<Stores>,
    shutdown: watch::Sender<bool>,
    /// Listener tasks in start order; stopped in reverse
    handles: Vec<(&'static str, JoinHandle<()>)>,
    grpc: Arc<GrpcListenerSet>,
    mqtt: Arc<MqttListenerSet>,
    info: Arc<RwLock<EngineInfo>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Bring up all listeners in a fixed order: HTTP, HTTPS, admin,
    /// per-mock gRPC, per-mock MQTT. If any step fails, the already-bound
    /// listeners are closed in reverse order and the error returns; no
    /// listener leaks on partial failure.
    pub async fn start(mut config: MockdConfig) -> Result<Self> {
        config.apply_env();
        config.validate()?;
        let stores = Stores::from_config(&config).await?;

        let (shutdown, _) = watch::channel(false);
        let grpc = Arc::new(GrpcListenerSet::new(Arc::clone(&stores)));
        let mqtt = Arc::new(MqttListenerSet::new(
            Arc::clone(&stores),
            config.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
        ));

        let mut engine = Self {
            stores: Arc::clone(&stores),
            shutdown,
            handles: Vec::new(),
            grpc,
            mqtt,
            info: Arc::new(RwLock::new(EngineInfo {
                context: config.context.clone(),
                workspace: config.workspace.clone(),
                http_port: config.port,
                admin_port: config.admin_port,
                https_port: config.https_port,
                ..Default::default()
            })),
            config,
        };

        match engine.start_listeners().await {
            Ok(()) => {
                info!(
                    http = engine.config.port,
                    admin = engine.config.admin_port,
                    "engine started"
                );
                Ok(engine)
            }
            Err(e) => {
                error!(error = %e, "engine start failed, rolling back");
                engine.stop().await;
                Err(e)
            }
        }
    }

    async fn start_listeners(&mut self) -> Result<()> {
        let config = &self.config;
        let stores = &self.stores;

        // 1. HTTP
        let router = mockd_http::build_router(
            Arc::clone(stores),
            self.shutdown.subscribe(),
            &config.cors_origins,
            config.rate_limit,
            Some(config.read_timeout),
        );
        let handle = mockd_http::serve(config.port, router.clone(), self.shutdown.subscribe()).await?;
        self.handles.push(("http", handle));

        // 2. HTTPS (opt-in, certs from disk)
        if let Some(https_port) = config.https_port {
            let tls = config.tls.as_ref().ok_or_else(|| {
                Error::config("httpsPort set but no tls cert/key configured")
            })?;
            let tls_config = mockd_http::tls::load_server_config(tls)?;
            let handle = mockd_http::tls::serve_https(
                https_port,
                router,
                tls_config,
                self.shutdown.subscribe(),
            )
            .await?;
            self.handles.push(("https", handle));
        }

        // 3. Admin
        let token = self.admin_token()?;
        let hook: Arc<dyn ListenerHook> = Arc::new(EngineHook {
            grpc: Arc::clone(&self.grpc),
            mqtt: Arc::clone(&self.mqtt),
        });
        let admin_state = AdminState {
            stores: Arc::clone(stores),
            info: Arc::clone(&self.info),
            hook: Some(hook),
        };
        let admin_router = mockd_admin::build_router(admin_state, token);
        let handle =
            mockd_admin::serve(config.admin_port, admin_router, self.shutdown.subscribe()).await?;
        self.handles.push(("admin", handle));

        // 4. Per-mock gRPC listeners
        for mock in self.stores.registry.list().await {
            if matches!(mock.spec, MockSpec::Grpc(_)) {
                self.grpc.register_mock(mock).await?;
            }
        }

        // 5. MQTT: the primary broker when opted in, plus per-mock brokers
        if self.config.mqtt_port.is_some() {
            self.mqtt.ensure_primary().await?;
        }
        for mock in self.stores.registry.list().await {
            if matches!(mock.spec, MockSpec::Mqtt(_)) {
                self.mqtt.register_mock(mock).await?;
            }
        }
        Ok(())
    }

    fn admin_token(&self) -> Result<Option<String>> {
        let Some(auth) = &self.config.auth else {
            return Ok(None);
        };
        if !auth.enabled {
            return Ok(None);
        }
        if let Some(token) = &auth.token {
            return Ok(Some(token.clone()));
        }
        let dir = config_dir();
        let token = mockd_admin::load_or_create_api_key(&dir)?;
        Ok(Some(token))
    }

    pub fn stores(&self) -> Arc<Stores> {
        Arc::clone(&self.stores)
    }

    pub fn config(&self) -> &MockdConfig {
        &self.config
    }

    /// Reload: diff the running mock set against the new document and
    /// apply in a single registry transaction; stateful resources and
    /// chaos settings follow.
    pub async fn reload(&self, mut config: MockdConfig) -> Result<mockd_core::ReloadReport> {
        config.apply_env();
        config.validate()?;
        let before: Vec<String> = self
            .stores
            .registry
            .list()
            .await
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let report = self.stores.registry.reload(config.mocks.clone()).await?;
        for resource in config.stateful_resources.clone() {
            self.stores.state.register(resource).await;
        }
        if let Some(chaos) = config.chaos.clone() {
            self.stores.chaos.update(chaos).await;
        }
        // Detach every pre-reload mock from the listener sets, then
        // re-register the surviving set: removed mocks disappear, kept
        // ones re-attach exactly once, new ones bind
        for id in &before {
            self.grpc.remove_mock(id).await;
            self.mqtt.remove_mock(id).await;
        }
        for mock in self.stores.registry.list().await {
            match mock.protocol() {
                Protocol::Grpc => {
                    let _ = self.grpc.register_mock(mock).await;
                }
                Protocol::Mqtt => {
                    let _ = self.mqtt.register_mock(mock).await;
                }
                _ => {}
            }
        }
        info!(
            added = report.added,
            removed = report.removed,
            updated = report.updated,
            "engine reloaded"
        );
        Ok(report)
    }

    /// Stop accepting, drain in-flight handlers up to a deadline, then
    /// force-close. Brokers are stopped outside their own locks.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);

        // MQTT and gRPC sets own per-mock listeners; brokers join their
        // simulators before the watch fires inside `stop`
        self.mqtt.shutdown().await;
        self.grpc.shutdown().await;

        for (name, handle) in self.handles.drain(..).rev() {
            match tokio::time::timeout(DRAIN_DEADLINE, handle).await {
                Ok(_) => info!(listener = name, "listener drained"),
                Err(_) => warn!(listener = name, "listener drain deadline hit, aborting"),
            }
        }

        if let Some(path) = &self.config.snapshot_on_shutdown {
            let snapshot = self.stores.export_config(&self.config).await;
            if let Err(e) = snapshot.save(path).await {
                // Snapshot failures must not block the shutdown path
                warn!(error = %e, "config snapshot failed");
            }
        }
        info!("engine stopped");
    }
}

fn config_dir() -> PathBuf {
    if let Ok(config) = std::env::var("MOCKD_CONFIG") {
        if let Some(parent) = PathBuf::from(config).parent() {
            return parent.to_path_buf();
        }
    }
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".mockd"))
        .unwrap_or_else(|_| PathBuf::from(".mockd"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ask the OS for a free port
    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        listener.local_addr().expect("addr").port()
    }

    async fn test_config() -> MockdConfig {
        MockdConfig {
            port: free_port().await,
            admin_port: free_port().await,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_serves_http_and_admin_then_stops() {
        let config = test_config().await;
        let http_port = config.port;
        let admin_port = config.admin_port;
        let mut engine = Engine::start(config).await.expect("start");

        let health = reqwest::get(format!("http://127.0.0.1:{admin_port}/health"))
            .await
            .expect("admin reachable");
        assert_eq!(health.status(), 200);

        let miss = reqwest::get(format!("http://127.0.0.1:{http_port}/nothing"))
            .await
            .expect("http reachable");
        assert_eq!(miss.status(), 404);

        engine.stop().await;
        // The ports are free again after stop
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tokio::net::TcpListener::bind(("127.0.0.1", http_port))
            .await
            .expect("http port released");
    }

    #[tokio::test]
    async fn partial_failure_rolls_back_bound_listeners() {
        let port = free_port().await;
        // Same port for HTTP and admin: admin bind fails after HTTP is up
        let config = MockdConfig {
            port,
            admin_port: port,
            ..Default::default()
        };
        let err = Engine::start(config).await.expect_err("conflict");
        assert!(err.to_string().contains("bind"));

        // Rollback released the HTTP listener
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("port released after rollback");
    }

    #[tokio::test]
    async fn reload_applies_mock_diff() {
        let config = test_config().await;
        let http_port = config.port;
        let mut engine = Engine::start(config.clone()).await.expect("start");

        let reloaded = MockdConfig {
            mocks: mockd_core::MockdConfig::from_str(
                "mocks:\n  - type: http\n    matcher: { method: GET, path: /fresh }\n    response: { body: fresh }\n",
            )
            .expect("parse")
            .mocks,
            ..config
        };
        let report = engine.reload(reloaded).await.expect("reload");
        assert_eq!(report.added, 1);

        let hit = reqwest::get(format!("http://127.0.0.1:{http_port}/fresh"))
            .await
            .expect("reachable");
        assert_eq!(hit.status(), 200);
        assert_eq!(hit.text().await.expect("body"), "fresh");

        engine.stop().await;
    }

    #[tokio::test]
    async fn end_to_end_mock_create_via_admin() {
        let config = test_config().await;
        let http_port = config.port;
        let admin_port = config.admin_port;
        let mut engine = Engine::start(config).await.expect("start");

        let client = reqwest::Client::new();
        let created = client
            .post(format!("http://127.0.0.1:{admin_port}/mocks"))
            .json(&serde_json::json!({
                "type": "http",
                "matcher": {"method": "GET", "path": "/hello"},
                "response": {"statusCode": 200, "body": "hi"}
            }))
            .send()
            .await
            .expect("create");
        assert_eq!(created.status(), 201);

        let hit = reqwest::get(format!("http://127.0.0.1:{http_port}/hello"))
            .await
            .expect("reachable");
        assert_eq!(hit.status(), 200);
        assert_eq!(hit.text().await.expect("body"), "hi");

        let miss = reqwest::get(format!("http://127.0.0.1:{http_port}/other"))
            .await
            .expect("reachable");
        assert_eq!(miss.status(), 404);
        assert_eq!(
            miss.headers()
                .get("x-mockd-near-misses")
                .expect("near miss header"),
            "1"
        );

        engine.stop().await;
    }

    #[tokio::test]
    async fn snapshot_on_shutdown_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot_path = dir.path().join("snapshot.yaml");
        let mut config = test_config().await;
        config.snapshot_on_shutdown = Some(snapshot_path.clone());
        config.mocks = MockdConfig::from_str(
            "mocks:\n  - type: http\n    matcher: { path: /seeded }\n",
        )
        .expect("parse")
        .mocks;

        let mut engine = Engine::start(config).await.expect("start");
        engine.stop().await;

        let reloaded = MockdConfig::from_file(&snapshot_path)
            .await
            .expect("snapshot parses");
        assert_eq!(reloaded.mocks.len(), 1);
    }
}
