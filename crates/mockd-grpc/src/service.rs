//! Request handling for the gRPC listener
//!
//! Requests arrive as HTTP/2 `POST /Service/Method` with gRPC framing;
//! responses carry their status in trailers (`grpc-status`,
//! `grpc-message`). Status-code-only error reporting, no rich details.

use crate::framing::{decode_frames, encode_frame};
use crate::wire::{decode_message, encode_message};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response};
use http_body::Frame;
use http_body_util::BodyExt;
use mockd_core::dispatch::{dispatch, DispatchOutcome};
use mockd_core::model::{GrpcResponseSpec, MockSpec};
use mockd_core::template::{render_json, TemplateContext};
use mockd_core::{
    ChaosAction, Mock, Protocol, RequestLogEntry, RequestSnapshot, ResponseRecord, Stores,
};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// gRPC status codes used by the listener
mod status {
    pub const OK: u32 = 0;
    pub const INVALID_ARGUMENT: u32 = 3;
    pub const DEADLINE_EXCEEDED: u32 = 4;
    pub const NOT_FOUND: u32 = 5;
    pub const ALREADY_EXISTS: u32 = 6;
    pub const RESOURCE_EXHAUSTED: u32 = 8;
    pub const UNIMPLEMENTED: u32 = 12;
    pub const INTERNAL: u32 = 13;
    pub const UNAVAILABLE: u32 = 14;
}

/// gRPC analog of a store error, derived from its HTTP status
fn status_for(error: &mockd_core::Error) -> u32 {
    match error.http_status() {
        400 => status::INVALID_ARGUMENT,
        404 => status::NOT_FOUND,
        409 => status::ALREADY_EXISTS,
        507 => status::RESOURCE_EXHAUSTED,
        _ => status::INTERNAL,
    }
}

/// Mocks bound to one gRPC port, shared with the listener set
pub struct PortState {
    pub mocks: RwLock<Vec<Arc<Mock>>>,
    pub stores: Arc<Stores>,
}

/// Response body emitting data frames then trailers
pub struct GrpcBody {
    rx: mpsc::UnboundedReceiver<Frame<Bytes>>,
}

impl GrpcBody {
    fn channel() -> (mpsc::UnboundedSender<Frame<Bytes>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// A body that ends immediately (trailers-only responses)
    fn empty() -> Self {
        let (_tx, rx) = mpsc::unbounded_channel();
        Self { rx }
    }
}

impl http_body::Body for GrpcBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

fn grpc_trailers(code: u32, message: Option<&str>) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert(
        HeaderName::from_static("grpc-status"),
        HeaderValue::from_str(&code.to_string()).unwrap_or(HeaderValue::from_static("2")),
    );
    if let Some(message) = message {
        if let Ok(value) = HeaderValue::from_str(message) {
            trailers.insert(HeaderName::from_static("grpc-message"), value);
        }
    }
    trailers
}

/// Trailers-only response: the status travels in the response headers
fn trailers_only(code: u32, message: Option<&str>) -> Response<GrpcBody> {
    let mut response = Response::builder()
        .status(200)
        .header("content-type", "application/grpc");
    if let Some(headers) = response.headers_mut() {
        headers.extend(grpc_trailers(code, message));
    }
    response
        .body(GrpcBody::empty())
        .unwrap_or_else(|_| Response::new(GrpcBody::empty()))
}

/// Handle one gRPC request against the port's mock set
pub async fn handle_request<B>(state: Arc<PortState>, req: Request<B>) -> Response<GrpcBody>
where
    B: http_body::Body,
    B::Error: std::fmt::Display,
{
    let started = std::time::Instant::now();
    let path = req.uri().path().to_string();

    let mut metadata = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            metadata.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read grpc request body");
            return trailers_only(status::INTERNAL, Some("body read failed"));
        }
    };

    let message = decode_frames(&body)
        .first()
        .and_then(|frame| decode_message(frame))
        .unwrap_or_else(|| serde_json::json!({}));

    let method = path.rsplit('/').next().unwrap_or("").to_string();
    let mut snapshot = RequestSnapshot::new(Protocol::Grpc, method, path.clone());
    snapshot.headers = metadata;
    snapshot.body = serde_json::to_vec(&message).ok();

    // Chaos pre-check
    let decision = state.stores.chaos.decide(&path).await;
    match decision.action {
        ChaosAction::Timeout { hold } => {
            tokio::time::sleep(hold).await;
            return trailers_only(status::DEADLINE_EXCEEDED, Some("chaos timeout"));
        }
        ChaosAction::Error { .. } => {
            return trailers_only(status::UNAVAILABLE, Some("chaos injected"));
        }
        ChaosAction::None => {}
    }

    let mocks = state.mocks.read().await.clone();
    match dispatch(&mocks, &snapshot) {
        DispatchOutcome::Matched(hit) => {
            state.stores.verification.record(&hit.mock.id, &snapshot).await;
            let MockSpec::Grpc(spec) = &hit.mock.spec else {
                return trailers_only(status::INTERNAL, Some("mock is not grpc"));
            };
            let response_spec = spec.response.clone();

            // Stateful operations declare resource + action explicitly;
            // the id, when needed, rides in field 1 of the request message
            if let Some(binding) = &spec.stateful {
                if let Some(action) = binding.action {
                    let item_id = message
                        .get("1")
                        .map(mockd_core::template::json_to_text);
                    if let Err(e) = state
                        .stores
                        .state
                        .apply(
                            &binding.resource,
                            action,
                            item_id.as_deref(),
                            Some(message.clone()),
                            &Default::default(),
                        )
                        .await
                    {
                        warn!(error = %e, "grpc stateful side-effect failed");
                        return trailers_only(status_for(&e), Some(&e.to_string()));
                    }
                }
            }

            // Delay: the larger of the mock's own delay and chaos latency
            let mock_delay = Duration::from_millis(response_spec.delay_ms.unwrap_or(0));
            let delay = decision.extra_latency.map_or(mock_delay, |l| l.max(mock_delay));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let record = ResponseRecord::new(if response_spec.status == status::OK {
                200
            } else {
                500
            });
            state
                .stores
                .request_log
                .push(
                    RequestLogEntry::new(snapshot.clone())
                        .matched(&hit.mock.id)
                        .with_response(record)
                        .with_elapsed_ms(started.elapsed().as_millis() as u64),
                )
                .await;

            respond(&state, snapshot, &hit.mock.id, response_spec).await
        }
        DispatchOutcome::NoMatch { near_misses } => {
            debug!(path, candidates = near_misses.len(), "no grpc mock matched");
            state
                .stores
                .request_log
                .push(
                    RequestLogEntry::new(snapshot)
                        .with_near_misses(near_misses)
                        .with_elapsed_ms(started.elapsed().as_millis() as u64),
                )
                .await;
            trailers_only(status::UNIMPLEMENTED, Some("no matching mock"))
        }
    }
}

async fn respond(
    state: &Arc<PortState>,
    snapshot: RequestSnapshot,
    mock_id: &str,
    spec: GrpcResponseSpec,
) -> Response<GrpcBody> {
    if spec.status != status::OK {
        return trailers_only(spec.status, spec.status_message.as_deref());
    }

    let (tx, body) = GrpcBody::channel();
    let stores = Arc::clone(&state.stores);
    let mock_id = mock_id.to_string();
    tokio::spawn(async move {
        let ctx = TemplateContext::for_request(&snapshot, &mock_id)
            .with_sequences(&stores.sequences)
            .with_state(&stores.state);
        if spec.stream.is_empty() {
            let rendered = render_json(&spec.message, &ctx).await;
            let frame = encode_frame(&encode_message(&rendered));
            let _ = tx.send(Frame::data(frame));
        } else {
            // Server streaming: messages interleaved with their delays
            for message in &spec.stream {
                if message.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(message.delay_ms)).await;
                }
                let rendered = render_json(&message.message, &ctx).await;
                let frame = encode_frame(&encode_message(&rendered));
                if tx.send(Frame::data(frame)).is_err() {
                    // Client went away; stop emitting
                    return;
                }
            }
        }
        let _ = tx.send(Frame::trailers(grpc_trailers(status::OK, None)));
    });

    Response::builder()
        .status(200)
        .header("content-type", "application/grpc")
        .body(body)
        .unwrap_or_else(|_| trailers_only(status::INTERNAL, Some("response build failed")))
}
