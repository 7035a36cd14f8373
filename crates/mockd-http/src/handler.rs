//! The primary listener's catch-all handler
//!
//! One port serves plain HTTP, SOAP, GraphQL, OAuth, SSE and WebSocket
//! mocks plus the stateful CRUD base paths. Requests are classified by
//! shape, dispatched against the matching protocol's mock set (falling
//! back to plain HTTP mocks), run through the chaos pipeline, and answered
//! from the winning mock's template. Total misses answer 404 with
//! near-miss diagnostics.

use crate::{graphql, oauth, response, soap, sse, stateful, ws};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{request::Parts, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use mockd_core::dispatch::{dispatch, DispatchHit, DispatchOutcome};
use mockd_core::model::MockSpec;
use mockd_core::state::ListQuery;
use mockd_core::template::TemplateContext;
use mockd_core::{
    ChaosAction, ClientCertInfo, NearMiss, Protocol, RequestLogEntry, RequestSnapshot,
    ResponseRecord, Stores,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared state for the primary listener
#[derive(Clone)]
pub struct HttpState {
    pub stores: Arc<Stores>,
    pub shutdown: watch::Receiver<bool>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Fixed-window request limiter for the `rateLimit` server option
#[derive(Debug)]
pub struct RateLimiter {
    per_second: u32,
    window: parking_lot::Mutex<(std::time::Instant, u32)>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            window: parking_lot::Mutex::new((std::time::Instant::now(), 0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut window = self.window.lock();
        let now = std::time::Instant::now();
        if now.duration_since(window.0) >= Duration::from_secs(1) {
            *window = (now, 0);
        }
        if window.1 >= self.per_second {
            return false;
        }
        window.1 += 1;
        true
    }
}

/// Entry point wired as the router's fallback
pub async fn handle(State(state): State<HttpState>, req: Request) -> Response {
    let started = std::time::Instant::now();

    if let Some(limiter) = &state.rate_limiter {
        if !limiter.try_acquire() {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "rate_limited"})),
            )
                .into_response();
        }
    }

    let (mut parts, body) = req.into_parts();

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => handle_ws_upgrade(state, &parts, upgrade, started).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
    };

    let mut snapshot = snapshot_from_parts(&parts, Protocol::Http);
    if !body.is_empty() {
        snapshot.body = Some(body.to_vec());
    }

    // Chaos pre-check: timeout and error rolls happen before matching work
    let decision = state.stores.chaos.decide(&snapshot.path).await;
    match decision.action {
        ChaosAction::Timeout { hold } => {
            // Hold the connection to the deadline, then end without a body
            tokio::time::sleep(hold).await;
            return StatusCode::REQUEST_TIMEOUT.into_response();
        }
        ChaosAction::Error {
            status,
            retry_after_s,
        } => {
            if let Some(latency) = decision.extra_latency {
                tokio::time::sleep(latency).await;
            }
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut response =
                (status, Json(json!({"error": "chaos_injected"}))).into_response();
            if let Some(secs) = retry_after_s {
                if let Ok(value) = secs.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
            }
            log_exchange(&state, snapshot, None, response.status().as_u16(), started, vec![])
                .await;
            return response;
        }
        ChaosAction::None => {}
    }

    // Classify by shape, dispatch, falling back to plain HTTP mocks
    let class = classify(&snapshot);
    let mut near_misses: Vec<NearMiss> = Vec::new();
    let mut winner: Option<DispatchHit> = None;
    for protocol in attempt_order(class) {
        snapshot.protocol = protocol;
        let mocks = state.stores.registry.snapshot(protocol).await;
        match dispatch(&mocks, &snapshot) {
            DispatchOutcome::Matched(hit) => {
                winner = Some(hit);
                break;
            }
            DispatchOutcome::NoMatch { near_misses: misses } => near_misses.extend(misses),
        }
    }

    match winner {
        Some(hit) => {
            snapshot.path_params = hit.path_params.clone();
            state
                .stores
                .verification
                .record(&hit.mock.id, &snapshot)
                .await;
            let response =
                execute_mock(&state, &hit, &snapshot, decision.extra_latency).await;
            log_exchange(
                &state,
                snapshot,
                Some(hit.mock.id.clone()),
                response.status().as_u16(),
                started,
                vec![],
            )
            .await;
            response
        }
        None => {
            // Stateful base paths serve CRUD without any mock declared
            if let Some(response) = stateful::handle_base_path(&state.stores, &snapshot).await {
                log_exchange(
                    &state,
                    snapshot,
                    None,
                    response.status().as_u16(),
                    started,
                    vec![],
                )
                .await;
                return response;
            }
            let response = no_match_response(&near_misses);
            log_exchange(&state, snapshot, None, 404, started, near_misses).await;
            response
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Shape-based protocol classification for the shared listener
fn classify(snapshot: &RequestSnapshot) -> Protocol {
    if snapshot
        .header("accept")
        .is_some_and(|accept| accept.contains("text/event-stream"))
    {
        return Protocol::Sse;
    }
    let content_type = snapshot.header("content-type").unwrap_or("");
    if content_type.contains("xml") || snapshot.header("soapaction").is_some() {
        return Protocol::Soap;
    }
    if content_type.contains("x-www-form-urlencoded")
        && snapshot
            .body_text()
            .is_some_and(|body| body.contains("grant_type="))
    {
        return Protocol::OAuth;
    }
    if snapshot
        .body_json()
        .as_ref()
        .and_then(|body| body.get("query"))
        .is_some_and(serde_json::Value::is_string)
    {
        return Protocol::GraphQl;
    }
    Protocol::Http
}

fn attempt_order(class: Protocol) -> Vec<Protocol> {
    if class == Protocol::Http {
        vec![Protocol::Http]
    } else {
        vec![class, Protocol::Http]
    }
}

async fn execute_mock(
    state: &HttpState,
    hit: &DispatchHit,
    snapshot: &RequestSnapshot,
    chaos_latency: Option<Duration>,
) -> Response {
    let declared_delay = match &hit.mock.spec {
        MockSpec::Http(spec) => spec.response.delay_ms,
        MockSpec::Soap(spec) => spec.response.delay_ms,
        MockSpec::GraphQl(spec) => spec.response.delay_ms,
        _ => None,
    };
    // Delay: the larger of the mock's own delay and the chaos draw
    let mock_delay = Duration::from_millis(declared_delay.unwrap_or(0));
    let delay = chaos_latency.map_or(mock_delay, |l| l.max(mock_delay));
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let stores = &state.stores;
    let ctx = TemplateContext::for_request(snapshot, &hit.mock.id)
        .with_sequences(&stores.sequences)
        .with_state(&stores.state);

    match &hit.mock.spec {
        MockSpec::Http(spec) => {
            if let Some(binding) = &spec.stateful {
                return stateful::handle_binding(
                    stores,
                    &binding.resource,
                    binding.action,
                    snapshot,
                )
                .await;
            }
            response::render(&spec.response, &ctx).await
        }
        MockSpec::Soap(spec) => {
            if let Some(binding) = &spec.stateful {
                let action = binding.action.unwrap_or(mockd_core::model::CrudAction::Get);
                if let Err(e) = stores
                    .state
                    .apply(
                        &binding.resource,
                        action,
                        snapshot.path_params.get("id").map(String::as_str),
                        snapshot.body_json(),
                        &ListQuery::default(),
                    )
                    .await
                {
                    warn!(error = %e, "soap stateful side-effect failed");
                    return stateful::error_response(&e);
                }
            }
            soap::respond(spec, &ctx).await
        }
        MockSpec::GraphQl(spec) => graphql::respond(spec, &ctx).await,
        MockSpec::OAuth(spec) => oauth::respond(stores, spec, snapshot).await,
        MockSpec::Sse(spec) => {
            sse::respond(
                Arc::clone(stores),
                spec.clone(),
                snapshot.clone(),
                hit.mock.id.clone(),
                state.shutdown.clone(),
            )
            .await
        }
        other => {
            debug!(protocol = %other.protocol(), "mock type not servable on the http listener");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_ws_upgrade(
    state: HttpState,
    parts: &Parts,
    upgrade: WebSocketUpgrade,
    started: std::time::Instant,
) -> Response {
    let snapshot = snapshot_from_parts(parts, Protocol::WebSocket);
    let mocks = state.stores.registry.snapshot(Protocol::WebSocket).await;
    match dispatch(&mocks, &snapshot) {
        DispatchOutcome::Matched(hit) => {
            state
                .stores
                .verification
                .record(&hit.mock.id, &snapshot)
                .await;
            let MockSpec::WebSocket(spec) = hit.mock.spec.clone() else {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            log_exchange(
                &state,
                snapshot.clone(),
                Some(hit.mock.id.clone()),
                101,
                started,
                vec![],
            )
            .await;

            let stores = Arc::clone(&state.stores);
            let shutdown = state.shutdown.clone();
            let mock_id = hit.mock.id.clone();
            let upgrade = match &spec.subprotocol {
                Some(subprotocol) => upgrade.protocols([subprotocol.clone()]),
                None => upgrade,
            };
            upgrade.on_upgrade(move |socket| {
                ws::run_session(socket, spec, snapshot, mock_id, stores, shutdown)
            })
        }
        DispatchOutcome::NoMatch { near_misses } => {
            let response = no_match_response(&near_misses);
            log_exchange(&state, snapshot, None, 404, started, near_misses).await;
            response
        }
    }
}

fn snapshot_from_parts(parts: &Parts, protocol: Protocol) -> RequestSnapshot {
    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    let query = parts
        .uri
        .query()
        .map(parse_query)
        .unwrap_or_default();

    let mut snapshot = RequestSnapshot::new(
        protocol,
        parts.method.as_str(),
        parts.uri.path(),
    )
    .with_headers(headers)
    .with_query(query);
    // mTLS subject fields arrive via a connection-level extension
    if let Some(cert) = parts.extensions.get::<ClientCertInfo>() {
        snapshot.client_cert = Some(cert.clone());
    }
    snapshot
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return None;
            }
            Some((
                crate::oauth::url_decode(key),
                crate::oauth::url_decode(value),
            ))
        })
        .collect()
}

/// 404 with near-miss diagnostics: count in a header, detail in the body
fn no_match_response(near_misses: &[NearMiss]) -> Response {
    let mut response = (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": "no mock matched this request",
            "nearMisses": near_misses,
        })),
    )
        .into_response();
    if let Ok(count) = near_misses.len().to_string().parse() {
        response.headers_mut().insert("x-mockd-near-misses", count);
    }
    response
}

async fn log_exchange(
    state: &HttpState,
    snapshot: RequestSnapshot,
    mock_id: Option<String>,
    status: u16,
    started: std::time::Instant,
    near_misses: Vec<NearMiss>,
) {
    let mut entry = RequestLogEntry::new(snapshot)
        .with_response(ResponseRecord::new(status))
        .with_elapsed_ms(started.elapsed().as_millis() as u64)
        .with_near_misses(near_misses);
    if let Some(mock_id) = mock_id {
        entry = entry.matched(mock_id);
    }
    state.stores.request_log.push(entry).await;
}
