//! # mockd admin
//!
//! The admin REST surface on its own port: mock CRUD and bulk import,
//! request-log queries with near-miss payloads, chaos control, stateful
//! resource management, verification, token introspection and the system
//! endpoints (`/health`, `/status`, `/ports`, `/metrics`, `/engines`,
//! `/formats`). All writes go through the same stores protocol handlers
//! read; a bearer token guards every path when auth is enabled.

mod api;
pub mod auth;
pub mod problem;

pub use auth::{load_or_create_api_key, AdminAuth};
pub use problem::Problem;

use async_trait::async_trait;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use mockd_core::{Error, Mock, Result, Stores};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

/// What the engine exposes to the system endpoints
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub version: String,
    pub context: Option<String>,
    pub workspace: Option<String>,
    pub http_port: u16,
    pub admin_port: u16,
    pub https_port: Option<u16>,
    pub grpc_ports: Vec<u16>,
    pub mqtt_ports: Vec<u16>,
    pub started_at: DateTime<Utc>,
}

impl Default for EngineInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            context: None,
            workspace: None,
            http_port: 4280,
            admin_port: 4290,
            https_port: None,
            grpc_ports: Vec::new(),
            mqtt_ports: Vec::new(),
            started_at: Utc::now(),
        }
    }
}

/// Engine-side reactions to admin mock writes: bind or merge per-mock
/// listeners, tear them down on delete, report live ports.
#[async_trait]
pub trait ListenerHook: Send + Sync {
    /// A mock was committed to the registry; bind or merge any per-mock
    /// listener it needs. An error here rolls the registry write back.
    async fn mock_added(&self, mock: Arc<Mock>) -> Result<()>;
    /// A mock was removed
    async fn mock_removed(&self, mock_id: &str);
    /// Live (grpc, mqtt) ports
    async fn ports(&self) -> (Vec<u16>, Vec<u16>);
}

/// Shared state for the admin surface
#[derive(Clone)]
pub struct AdminState {
    pub stores: Arc<Stores>,
    pub info: Arc<RwLock<EngineInfo>>,
    pub hook: Option<Arc<dyn ListenerHook>>,
}

impl AdminState {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self {
            stores,
            info: Arc::new(RwLock::new(EngineInfo::default())),
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ListenerHook>) -> Self {
        self.hook = Some(hook);
        self
    }
}

/// Build the admin router; `token` enables bearer auth when set
pub fn build_router(state: AdminState, token: Option<String>) -> Router {
    let router = Router::new()
        .route("/mocks", get(api::list_mocks).post(api::create_mock))
        .route("/mocks/bulk", post(api::bulk_create))
        .route(
            "/mocks/{id}",
            get(api::get_mock)
                .put(api::update_mock)
                .patch(api::patch_mock)
                .delete(api::delete_mock),
        )
        .route("/config", get(api::export_config).post(api::import_config))
        .route(
            "/requests",
            get(api::list_requests).delete(api::clear_requests),
        )
        .route("/chaos", get(api::get_chaos).put(api::put_chaos))
        .route("/chaos/profiles", get(api::list_chaos_profiles))
        .route(
            "/chaos/profiles/{name}/apply",
            post(api::apply_chaos_profile),
        )
        .route("/chaos/reset", post(api::reset_chaos))
        .route("/state/resources", get(api::list_resources))
        .route(
            "/state/resources/{name}",
            get(api::list_resource_items)
                .post(api::create_resource_item)
                .delete(api::clear_resource),
        )
        .route(
            "/state/resources/{name}/{id}",
            get(api::get_resource_item).delete(api::delete_resource_item),
        )
        .route("/state/reset", post(api::reset_state))
        .route("/state/operations/{name}", post(api::run_operation))
        .route("/verify/{id}", get(api::verify))
        .route("/verify/reset", post(api::reset_verification))
        .route("/invocations/{id}", get(api::invocations))
        .route("/introspect", post(api::introspect))
        .route("/health", get(api::health))
        .route("/status", get(api::status))
        .route("/ports", get(api::ports))
        .route("/engines", get(api::engines))
        .route("/formats", get(api::formats))
        .route("/metrics", get(api::metrics))
        .with_state(state);

    router
        .layer(middleware::from_fn_with_state(
            AdminAuth { token },
            auth::require_bearer,
        ))
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the admin listener
pub async fn serve(
    port: u16,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::listener(format!("admin bind {addr}: {e}")))?;
    info!(%addr, "admin api listening");
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "admin listener failed");
        }
        info!(port, "admin listener stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use mockd_core::MockdConfig;
    use tower::ServiceExt;

    async fn admin_router(token: Option<String>) -> (Router, Arc<Stores>) {
        let stores = Stores::from_config(&MockdConfig::default())
            .await
            .expect("stores");
        let state = AdminState::new(Arc::clone(&stores));
        (build_router(state, token), stores)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn mock_crud_roundtrip() {
        let (router, _) = admin_router(None).await;

        let created = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/mocks",
                serde_json::json!({
                    "type": "http",
                    "name": "hello",
                    "matcher": {"method": "GET", "path": "/hello"},
                    "response": {"statusCode": 200, "body": "hi"}
                }),
            ))
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);
        let mock = body_json(created).await;
        let id = mock["id"].as_str().expect("id").to_string();

        let fetched = router
            .clone()
            .oneshot(
                Request::get(format!("/mocks/{id}"))
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(fetched.status(), StatusCode::OK);

        let toggled = router
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/mocks/{id}"),
                serde_json::json!({"enabled": false}),
            ))
            .await
            .expect("response");
        assert_eq!(body_json(toggled).await["enabled"], false);

        let deleted = router
            .clone()
            .oneshot(
                Request::delete(format!("/mocks/{id}"))
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn invalid_mock_yields_problem_with_field_errors() {
        let (router, _) = admin_router(None).await;
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/mocks",
                serde_json::json!({"type": "mqtt", "topic": "a/#/b"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .expect("content type"),
            "application/problem+json"
        );
        let doc = body_json(response).await;
        assert_eq!(doc["errors"][0]["code"], "invalid_topic_filter");
    }

    #[tokio::test]
    async fn grpc_port_merge_statuses() {
        let (router, _) = admin_router(None).await;
        let first = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/mocks",
                serde_json::json!({"type": "grpc", "port": 50051, "service": "svcA", "method": "Foo"}),
            ))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::CREATED);

        let merged = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/mocks",
                serde_json::json!({"type": "grpc", "port": 50051, "service": "svcB", "method": "Bar"}),
            ))
            .await
            .expect("response");
        assert_eq!(merged.status(), StatusCode::OK);
        let doc = body_json(merged).await;
        assert_eq!(doc["merged"], true);
        assert_eq!(doc["total"], 2);

        let conflict = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/mocks",
                serde_json::json!({"type": "grpc", "port": 50051, "service": "svcA", "method": "Foo"}),
            ))
            .await
            .expect("response");
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn bearer_auth_guards_every_path() {
        let (router, _) = admin_router(Some("secret-token".to_string())).await;
        let denied = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .clone()
            .oneshot(
                Request::get("/health")
                    .header("authorization", "Bearer secret-token")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chaos_profile_apply_and_reset() {
        let (router, stores) = admin_router(None).await;
        let applied = router
            .clone()
            .oneshot(
                Request::post("/chaos/profiles/flaky/apply")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(applied.status(), StatusCode::OK);
        assert!(stores.chaos.settings().await.enabled);

        let unknown = router
            .clone()
            .oneshot(
                Request::post("/chaos/profiles/nope/apply")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let reset = router
            .clone()
            .oneshot(Request::post("/chaos/reset").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(reset.status(), StatusCode::NO_CONTENT);
        assert!(!stores.chaos.settings().await.enabled);
    }

    #[tokio::test]
    async fn chaos_put_clamps_probabilities() {
        let (router, stores) = admin_router(None).await;
        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/chaos",
                serde_json::json!({"enabled": true, "errorRate": 42.0}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stores.chaos.settings().await.error_rate, 1.0);
    }

    #[tokio::test]
    async fn verify_and_invocations() {
        let (router, stores) = admin_router(None).await;
        let snapshot = mockd_core::RequestSnapshot::new(
            mockd_core::Protocol::Http,
            "GET",
            "/x",
        );
        stores.verification.record("m1", &snapshot).await;
        stores.verification.record("m1", &snapshot).await;

        let plain = router
            .clone()
            .oneshot(Request::get("/verify/m1").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(body_json(plain).await["count"], 2);

        let asserted = router
            .clone()
            .oneshot(
                Request::get("/verify/m1?assert=exactly&count=2")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(body_json(asserted).await["passed"], true);

        let invocations = router
            .clone()
            .oneshot(
                Request::get("/invocations/m1")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(
            body_json(invocations).await["invocations"]
                .as_array()
                .expect("array")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn config_import_reports_counts() {
        let (router, stores) = admin_router(None).await;
        let document = r#"
mocks:
  - type: http
    matcher: { path: /a }
  - type: http
    matcher: { path: /b }
statefulResources:
  - name: users
    seedData: [{ id: "1" }]
"#;
        let response = router
            .clone()
            .oneshot(
                Request::post("/config")
                    .header("content-type", "application/yaml")
                    .body(Body::from(document))
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert_eq!(doc["imported"], 2);
        assert_eq!(stores.state.resource_names().await, vec!["users"]);
    }

    #[tokio::test]
    async fn clear_resource_empties_without_restoring_seed() {
        let (router, stores) = admin_router(None).await;
        stores
            .state
            .register(mockd_core::state::ResourceConfig {
                name: "users".to_string(),
                base_path: None,
                id_field: "id".to_string(),
                parent_field: None,
                seed_data: vec![serde_json::json!({"id": "1", "name": "Alice"})],
                max_items: None,
            })
            .await;

        let cleared = router
            .clone()
            .oneshot(
                Request::delete("/state/resources/users")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
        let page = stores
            .state
            .list("users", &mockd_core::ListQuery::default())
            .await
            .expect("list");
        assert_eq!(page.meta.total, 0);

        // Reset is the path that brings the seed back
        let reset = router
            .clone()
            .oneshot(Request::post("/state/reset").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(reset.status(), StatusCode::NO_CONTENT);
        let page = stores
            .state
            .list("users", &mockd_core::ListQuery::default())
            .await
            .expect("list");
        assert_eq!(page.meta.total, 1);

        let unknown = router
            .clone()
            .oneshot(
                Request::delete("/state/resources/nope")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn introspect_reports_issued_tokens() {
        let (router, stores) = admin_router(None).await;
        let token = stores.tokens.issue("app", None, 60).await;
        let response = router
            .clone()
            .oneshot(
                Request::post("/introspect")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(format!("token={}", token.token)))
                    .expect("req"),
            )
            .await
            .expect("response");
        let doc = body_json(response).await;
        assert_eq!(doc["active"], true);
        assert_eq!(doc["client_id"], "app");

        let unknown = router
            .clone()
            .oneshot(
                Request::post("/introspect")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"token":"nope"}"#))
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(body_json(unknown).await["active"], false);
    }

    #[tokio::test]
    async fn metrics_exposition_is_prometheus_text() {
        let (router, _) = admin_router(None).await;
        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("req"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("mockd_uptime_seconds"));
        assert!(text.contains("# TYPE mockd_mocks gauge"));
    }
}
