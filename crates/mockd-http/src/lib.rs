//! # mockd HTTP
//!
//! The primary mock listener: plain HTTP, SOAP, GraphQL, OAuth, SSE and
//! WebSocket mocks plus stateful CRUD base paths, all on one port, with an
//! opt-in HTTPS (and mTLS) twin serving the same router.

pub mod graphql;
pub mod handler;
pub mod oauth;
pub mod response;
pub mod soap;
pub mod sse;
pub mod stateful;
pub mod tls;
pub mod ws;

pub use handler::{HttpState, RateLimiter};

use axum::Router;
use mockd_core::{Error, Result, Stores};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any as CorsAny, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the primary listener's router.
///
/// `read_timeout_secs` doubles as the per-connection deadline: a request
/// (including one held by chaos timeout injection) is cut off when it
/// elapses. Streaming bodies already in flight are unaffected.
pub fn build_router(
    stores: Arc<Stores>,
    shutdown: watch::Receiver<bool>,
    cors_origins: &[String],
    rate_limit: Option<u32>,
    read_timeout_secs: Option<u64>,
) -> Router {
    let state = HttpState {
        stores,
        shutdown,
        rate_limiter: rate_limit.map(|limit| Arc::new(RateLimiter::new(limit))),
    };
    let mut router = Router::new()
        .fallback(handler::handle)
        .with_state(state)
        // Handler panics surface as 500s instead of dropped connections
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());
    if let Some(secs) = read_timeout_secs {
        router = router.layer(tower_http::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(secs.max(1)),
        ));
    }
    if let Some(cors) = cors_layer(cors_origins) {
        router = router.layer(cors);
    }
    router
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let layer = if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(CorsAny)
            .allow_methods(CorsAny)
            .allow_headers(CorsAny)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(CorsAny)
            .allow_headers(CorsAny)
    };
    Some(layer)
}

/// Bind and serve the plain-HTTP listener. The bind happens before the
/// task spawns so partial-failure rollback sees the error.
pub async fn serve(
    port: u16,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::listener(format!("http bind {addr}: {e}")))?;
    info!(%addr, "http listener up");
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "http listener failed");
        }
        info!(port, "http listener stopped");
    }))
}
