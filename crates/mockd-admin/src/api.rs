//! Admin REST handlers
//!
//! Every mutating endpoint validates against the mock schema before commit
//! and answers RFC 7807 problems on failure. Writes go through the same
//! stores the protocol handlers read.

use crate::problem::{problem, Problem};
use crate::{AdminState, EngineInfo};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mockd_core::model::Protocol;
use mockd_core::state::ListQuery;
use mockd_core::{Error, LogQuery, Mock, MockdConfig, VerifyAssertion};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

// ---------------------------------------------------------------------------
// Mocks

pub(crate) async fn list_mocks(State(state): State<AdminState>) -> Response {
    let mocks = state.stores.registry.list().await;
    let enabled = mocks.iter().filter(|m| m.enabled).count();
    Json(json!({
        "mocks": mocks.iter().map(|m| Mock::clone(m)).collect::<Vec<_>>(),
        "total": mocks.len(),
        "enabled": enabled,
    }))
    .into_response()
}

pub(crate) async fn get_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Response {
    match state.stores.registry.get(&id).await {
        Ok(mock) => Json(Mock::clone(&mock)).into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn create_mock(
    State(state): State<AdminState>,
    Json(mock): Json<Mock>,
) -> Response {
    match insert_with_listeners(&state, mock).await {
        Ok((mock, merged, total)) => {
            if merged {
                (
                    StatusCode::OK,
                    Json(json!({"merged": true, "total": total, "mock": Mock::clone(&mock)})),
                )
                    .into_response()
            } else {
                (StatusCode::CREATED, Json(Mock::clone(&mock))).into_response()
            }
        }
        Err(e) => problem(&e),
    }
}

/// Insert into the registry, then let the engine bind or merge listeners.
/// A listener failure rolls the registry insert back.
async fn insert_with_listeners(
    state: &AdminState,
    mock: Mock,
) -> mockd_core::Result<(Arc<Mock>, bool, usize)> {
    let inserted = state.stores.registry.insert(mock).await?;
    if let Some(hook) = &state.hook {
        if let Err(e) = hook.mock_added(Arc::clone(&inserted)).await {
            let _ = state.stores.registry.remove(&inserted.id).await;
            return Err(e);
        }
    }
    let total = state.stores.registry.port_peer_count(&inserted).await;
    Ok((inserted, total > 1, total))
}

pub(crate) async fn update_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(mock): Json<Mock>,
) -> Response {
    match state.stores.registry.update(&id, mock).await {
        Ok(updated) => Json(Mock::clone(&updated)).into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn patch_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    // A lone `enabled` flag is the toggle; anything else merges into the
    // stored declaration
    let Some(patch_map) = patch.as_object() else {
        return problem(&Error::validation("patch body must be a JSON object"));
    };
    if patch_map.len() == 1 {
        if let Some(enabled) = patch_map.get("enabled").and_then(serde_json::Value::as_bool) {
            return match state.stores.registry.set_enabled(&id, enabled).await {
                Ok(updated) => Json(Mock::clone(&updated)).into_response(),
                Err(e) => problem(&e),
            };
        }
    }

    let existing = match state.stores.registry.get(&id).await {
        Ok(existing) => existing,
        Err(e) => return problem(&e),
    };
    let mut merged = match serde_json::to_value(Mock::clone(&existing)) {
        Ok(value) => value,
        Err(e) => return problem(&Error::from(e)),
    };
    if let Some(target) = merged.as_object_mut() {
        for (key, value) in patch_map {
            target.insert(key.clone(), value.clone());
        }
    }
    let updated: Mock = match serde_json::from_value(merged) {
        Ok(updated) => updated,
        Err(e) => return problem(&Error::validation(format!("invalid patch: {e}"))),
    };
    match state.stores.registry.update(&id, updated).await {
        Ok(updated) => Json(Mock::clone(&updated)).into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn delete_mock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Response {
    match state.stores.registry.remove(&id).await {
        Ok(_) => {
            if let Some(hook) = &state.hook {
                hook.mock_removed(&id).await;
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => problem(&e),
    }
}

pub(crate) async fn bulk_create(
    State(state): State<AdminState>,
    Json(mocks): Json<Vec<Mock>>,
) -> Response {
    Json(import_mocks(&state, mocks).await).into_response()
}

async fn import_mocks(state: &AdminState, mocks: Vec<Mock>) -> serde_json::Value {
    let mut imported = 0usize;
    let mut merged_into = Vec::new();
    let mut conflicts = Vec::new();
    for mock in mocks {
        match insert_with_listeners(state, mock).await {
            Ok((mock, merged, _)) => {
                imported += 1;
                if merged {
                    merged_into.push(mock.id.clone());
                }
            }
            Err(e) => conflicts.push(e.to_string()),
        }
    }
    json!({"imported": imported, "mergedInto": merged_into, "conflicts": conflicts})
}

/// POST /config: bulk-import a whole configuration document
pub(crate) async fn import_config(State(state): State<AdminState>, body: String) -> Response {
    let config = match MockdConfig::from_str(&body) {
        Ok(config) => config,
        Err(e) => return problem(&e),
    };
    if let Err(e) = config.validate() {
        return problem(&e);
    }
    for resource in config.stateful_resources.clone() {
        state.stores.state.register(resource).await;
    }
    {
        let mut operations = state.stores.operations.write().await;
        for op in config.custom_operations.clone() {
            operations.insert(op.name.clone(), op);
        }
    }
    if let Some(chaos) = config.chaos.clone() {
        state.stores.chaos.update(chaos).await;
    }
    info!(mocks = config.mocks.len(), "config document imported");
    Json(import_mocks(&state, config.mocks).await).into_response()
}

#[derive(Deserialize)]
pub(crate) struct FormatParam {
    format: Option<String>,
}

/// GET /config: export the effective mock set
pub(crate) async fn export_config(
    State(state): State<AdminState>,
    Query(format): Query<FormatParam>,
) -> Response {
    let base = MockdConfig::default();
    let config = state.stores.export_config(&base).await;
    if format.format.as_deref() == Some("yaml") {
        match config.to_yaml() {
            Ok(yaml) => ([("content-type", "application/yaml")], yaml).into_response(),
            Err(e) => problem(&e),
        }
    } else {
        Json(config).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request log

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestsQuery {
    unmatched_only: Option<bool>,
    matched_only: Option<bool>,
    protocol: Option<String>,
    limit: Option<usize>,
}

pub(crate) async fn list_requests(
    State(state): State<AdminState>,
    Query(params): Query<RequestsQuery>,
) -> Response {
    let protocol = match params.protocol.as_deref() {
        None => None,
        Some(raw) => match serde_json::from_value::<Protocol>(json!(raw)) {
            Ok(protocol) => Some(protocol),
            Err(_) => {
                return problem(&Error::validation(format!("unknown protocol {raw}")));
            }
        },
    };
    let entries = state
        .stores
        .request_log
        .query(&LogQuery {
            protocol,
            unmatched_only: params.unmatched_only.unwrap_or(false),
            matched_only: params.matched_only.unwrap_or(false),
            limit: params.limit,
            ..Default::default()
        })
        .await;
    Json(json!({"requests": entries, "total": entries.len()})).into_response()
}

pub(crate) async fn clear_requests(State(state): State<AdminState>) -> Response {
    state.stores.request_log.clear().await;
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// Chaos

pub(crate) async fn get_chaos(State(state): State<AdminState>) -> Response {
    Json(state.stores.chaos.settings().await).into_response()
}

pub(crate) async fn put_chaos(
    State(state): State<AdminState>,
    Json(settings): Json<mockd_core::ChaosSettings>,
) -> Response {
    state.stores.chaos.update(settings).await;
    Json(state.stores.chaos.settings().await).into_response()
}

pub(crate) async fn list_chaos_profiles() -> Response {
    Json(json!({"profiles": mockd_core::chaos::PROFILE_NAMES})).into_response()
}

pub(crate) async fn apply_chaos_profile(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match state.stores.chaos.apply_profile(&name).await {
        Some(settings) => Json(settings).into_response(),
        None => problem(&Error::not_found(format!("unknown chaos profile {name}"))),
    }
}

pub(crate) async fn reset_chaos(State(state): State<AdminState>) -> Response {
    state.stores.chaos.reset().await;
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// State

pub(crate) async fn list_resources(State(state): State<AdminState>) -> Response {
    Json(json!({"resources": state.stores.state.resource_names().await})).into_response()
}

pub(crate) async fn list_resource_items(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut query = ListQuery {
        parent_id: params.get("parentId").cloned(),
        sort: params.get("sort").cloned(),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        offset: params.get("offset").and_then(|v| v.parse().ok()),
        ..Default::default()
    };
    for (key, value) in &params {
        if !matches!(key.as_str(), "parentId" | "sort" | "limit" | "offset") {
            query.filters.insert(key.clone(), value.clone());
        }
    }
    match state.stores.state.list(&name, &query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn create_resource_item(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(item): Json<serde_json::Value>,
) -> Response {
    match state.stores.state.create(&name, item).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => problem(&e),
    }
}

/// DELETE /state/resources/{name}: remove every item without restoring
/// seed (reset is the seed-restoring path)
pub(crate) async fn clear_resource(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match state.stores.state.clear(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn get_resource_item(
    State(state): State<AdminState>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    match state.stores.state.get(&name, &id).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => problem(&e),
    }
}

pub(crate) async fn delete_resource_item(
    State(state): State<AdminState>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    match state.stores.state.delete(&name, &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => problem(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct ResetParams {
    resource: Option<String>,
}

pub(crate) async fn reset_state(
    State(state): State<AdminState>,
    Query(params): Query<ResetParams>,
) -> Response {
    match state.stores.state.reset(params.resource.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => problem(&e),
    }
}

/// POST /state/operations/{name}: run a custom multi-step operation
pub(crate) async fn run_operation(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(params): Json<HashMap<String, serde_json::Value>>,
) -> Response {
    let operation = {
        let operations = state.stores.operations.read().await;
        operations.get(&name).cloned()
    };
    let Some(operation) = operation else {
        return problem(&Error::not_found(format!("unknown operation {name}")));
    };
    for param in &operation.params {
        if !params.contains_key(param) {
            return problem(&Error::validation_fields(
                "missing operation parameters",
                vec![mockd_core::FieldError::new(param.clone(), "required")],
            ));
        }
    }
    match state.stores.state.run_operation(&operation, &params).await {
        Ok(result) => Json(json!({"result": result})).into_response(),
        Err(e) => problem(&e),
    }
}

// ---------------------------------------------------------------------------
// Verification

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyParams {
    #[serde(rename = "assert")]
    assertion: Option<String>,
    count: Option<u64>,
}

pub(crate) async fn verify(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let count = state.stores.verification.count(&id).await;
    let Some(assertion) = params.assertion.as_deref() else {
        return Json(json!({"mockId": id, "count": count})).into_response();
    };
    let expected = params.count.unwrap_or(0);
    let assertion = match assertion {
        "exactly" => VerifyAssertion::Exactly(expected),
        "atLeast" => VerifyAssertion::AtLeast(expected),
        "atMost" => VerifyAssertion::AtMost(expected),
        "never" => VerifyAssertion::Never,
        other => {
            return problem(&Error::validation(format!(
                "unknown assertion {other}; use exactly, atLeast, atMost or never"
            )));
        }
    };
    Json(state.stores.verification.verify(&id, assertion).await).into_response()
}

pub(crate) async fn invocations(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Response {
    let invocations = state.stores.verification.invocations(&id).await;
    Json(json!({"mockId": id, "invocations": invocations})).into_response()
}

pub(crate) async fn reset_verification(State(state): State<AdminState>) -> Response {
    state.stores.verification.reset().await;
    state.stores.sequences.reset();
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// Introspection (RFC 7662)

#[derive(Deserialize)]
pub(crate) struct IntrospectBody {
    token: String,
}

pub(crate) async fn introspect(
    State(state): State<AdminState>,
    body: String,
) -> Response {
    // Accept both JSON and form-encoded bodies
    let token = serde_json::from_str::<IntrospectBody>(&body)
        .map(|b| b.token)
        .ok()
        .or_else(|| {
            body.split('&').find_map(|pair| {
                pair.strip_prefix("token=").map(str::to_string)
            })
        });
    let Some(token) = token else {
        return problem(&Error::validation("missing token parameter"));
    };
    match state.stores.tokens.introspect(&token).await {
        Some(issued) => Json(json!({
            "active": issued.active(),
            "client_id": issued.client_id,
            "scope": issued.scope,
            "iat": issued.issued_at.timestamp(),
            "exp": issued.expires_at.timestamp(),
        }))
        .into_response(),
        None => Json(json!({"active": false})).into_response(),
    }
}

// ---------------------------------------------------------------------------
// System

pub(crate) async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

pub(crate) async fn status(State(state): State<AdminState>) -> Response {
    let info = state.info.read().await.clone();
    let mocks = state.stores.registry.len().await;
    Json(json!({
        "version": info.version,
        "context": info.context,
        "workspace": info.workspace,
        "startedAt": info.started_at,
        "uptimeSeconds": (chrono::Utc::now() - info.started_at).num_seconds(),
        "mocks": mocks,
        "loggedRequests": state.stores.request_log.len().await,
    }))
    .into_response()
}

pub(crate) async fn ports(State(state): State<AdminState>) -> Response {
    let info = state.info.read().await.clone();
    let (grpc, mqtt) = match &state.hook {
        Some(hook) => hook.ports().await,
        None => (info.grpc_ports.clone(), info.mqtt_ports.clone()),
    };
    Json(json!({
        "http": info.http_port,
        "admin": info.admin_port,
        "https": info.https_port,
        "grpc": grpc,
        "mqtt": mqtt,
    }))
    .into_response()
}

pub(crate) async fn engines(State(state): State<AdminState>) -> Response {
    let info = state.info.read().await.clone();
    let (grpc, mqtt) = match &state.hook {
        Some(hook) => hook.ports().await,
        None => (info.grpc_ports.clone(), info.mqtt_ports.clone()),
    };
    Json(json!({"engines": [
        {"protocol": "http", "running": true, "port": info.http_port},
        {"protocol": "https", "running": info.https_port.is_some(), "port": info.https_port},
        {"protocol": "grpc", "running": !grpc.is_empty(), "ports": grpc},
        {"protocol": "mqtt", "running": !mqtt.is_empty(), "ports": mqtt},
    ]}))
    .into_response()
}

pub(crate) async fn formats() -> Response {
    Json(json!({"formats": ["yaml", "json"]})).into_response()
}

/// Prometheus text exposition assembled from the stores
pub(crate) async fn metrics(State(state): State<AdminState>) -> Response {
    let info: EngineInfo = state.info.read().await.clone();
    let uptime = (chrono::Utc::now() - info.started_at).num_seconds();
    let mocks = state.stores.registry.len().await;
    let logged = state.stores.request_log.len().await;
    let counts = state.stores.verification.counts().await;

    let mut out = String::new();
    out.push_str("# HELP mockd_uptime_seconds Seconds since engine start\n");
    out.push_str("# TYPE mockd_uptime_seconds gauge\n");
    out.push_str(&format!("mockd_uptime_seconds {uptime}\n"));
    out.push_str("# HELP mockd_mocks Registered mocks\n");
    out.push_str("# TYPE mockd_mocks gauge\n");
    out.push_str(&format!("mockd_mocks {mocks}\n"));
    out.push_str("# HELP mockd_logged_requests Entries in the request log\n");
    out.push_str("# TYPE mockd_logged_requests gauge\n");
    out.push_str(&format!("mockd_logged_requests {logged}\n"));
    out.push_str("# HELP mockd_mock_calls_total Dispatch hits per mock\n");
    out.push_str("# TYPE mockd_mock_calls_total counter\n");
    let mut ids: Vec<_> = counts.iter().collect();
    ids.sort_by(|a, b| a.0.cmp(b.0));
    for (id, count) in ids {
        out.push_str(&format!("mockd_mock_calls_total{{mock_id=\"{id}\"}} {count}\n"));
    }
    ([("content-type", "text/plain; version=0.0.4")], out).into_response()
}
