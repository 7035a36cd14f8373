//! # mockd gRPC
//!
//! Per-port gRPC listeners speaking HTTP/2 cleartext (h2c) through the
//! hyper stack. Mocks declare a service FQN, method and response message;
//! no proto descriptors are involved. Request messages decode through the
//! schema-less wire codec and responses encode from field-number keyed
//! JSON. Mocks declaring an already-bound port merge into that listener.

pub mod framing;
pub mod service;
pub mod wire;

pub use service::{handle_request, PortState};

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use mockd_core::model::MockSpec;
use mockd_core::{Error, Mock, Result, Stores};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct PortListener {
    state: Arc<PortState>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// All running gRPC listeners, keyed by port
pub struct GrpcListenerSet {
    stores: Arc<Stores>,
    listeners: Mutex<HashMap<u16, PortListener>>,
}

impl GrpcListenerSet {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self {
            stores,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Bind (or reuse) the mock's port and attach its service. Returns
    /// `true` when the mock merged into an already-running listener.
    pub async fn register_mock(&self, mock: Arc<Mock>) -> Result<bool> {
        let MockSpec::Grpc(spec) = &mock.spec else {
            return Err(Error::internal("not a grpc mock"));
        };
        let port = spec.port;

        let mut listeners = self.listeners.lock().await;
        if let Some(listener) = listeners.get(&port) {
            listener.state.mocks.write().await.push(mock);
            info!(port, "grpc mock merged into running listener");
            return Ok(true);
        }

        let state = Arc::new(PortState {
            mocks: RwLock::new(vec![mock]),
            stores: Arc::clone(&self.stores),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn_listener(port, Arc::clone(&state), shutdown_rx).await?;
        listeners.insert(
            port,
            PortListener {
                state,
                shutdown,
                handle,
            },
        );
        Ok(false)
    }

    pub async fn remove_mock(&self, mock_id: &str) {
        let listeners = self.listeners.lock().await;
        for listener in listeners.values() {
            listener.state.mocks.write().await.retain(|m| m.id != mock_id);
        }
    }

    pub async fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.lock().await.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub async fn shutdown(&self) {
        let listeners = {
            let mut listeners = self.listeners.lock().await;
            std::mem::take(&mut *listeners)
        };
        for (port, listener) in listeners {
            let _ = listener.shutdown.send(true);
            listener.handle.abort();
            info!(port, "grpc listener stopped");
        }
    }
}

async fn spawn_listener(
    port: u16,
    state: Arc<PortState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::listener(format!("grpc bind {addr}: {e}")))?;
    info!(%addr, "grpc listener up");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "grpc connection accepted");
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move {
                                        Ok::<_, std::convert::Infallible>(
                                            handle_request(state, req).await,
                                        )
                                    }
                                });
                                let builder = auto::Builder::new(TokioExecutor::new());
                                if let Err(e) = builder
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!(error = %e, "grpc connection ended");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "grpc accept failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!(port, "grpc listener stopping");
                    break;
                }
            }
        }
    }))
}
