//! SSE stream production
//!
//! Events are emitted on the mock's fixed cadence; the stream closes when
//! the event list is exhausted (unless `repeat`), `lifecycle.maxEvents` is
//! reached, the client disconnects, or the server shuts down. The emitter
//! checks cancellation between events and never holds it across a lock.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use mockd_core::model::{SseEventSpec, SseMockSpec};
use mockd_core::template::{render_json, render_str, TemplateContext};
use mockd_core::{RequestSnapshot, Stores};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Build the SSE response for a matched SSE mock
pub async fn respond(
    stores: Arc<Stores>,
    spec: SseMockSpec,
    snapshot: RequestSnapshot,
    mock_id: String,
    shutdown: watch::Receiver<bool>,
) -> Response {
    let stream = event_stream(stores, spec, snapshot, mock_id, shutdown);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    stores: Arc<Stores>,
    spec: SseMockSpec,
    snapshot: RequestSnapshot,
    mock_id: String,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(async move {
        let mut shutdown = shutdown;
        let cadence = Duration::from_millis(spec.interval_ms.max(1));
        let max_events = spec.lifecycle.max_events.unwrap_or(usize::MAX);
        let mut emitted = 0usize;
        let mut index = 0usize;

        loop {
            if spec.events.is_empty() || emitted >= max_events {
                break;
            }
            if index >= spec.events.len() {
                if spec.lifecycle.repeat {
                    index = 0;
                } else {
                    break;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = shutdown.changed() => {
                    debug!(%mock_id, "sse stream cancelled by shutdown");
                    break;
                }
            }
            let event = {
                let ctx = TemplateContext::for_request(&snapshot, &mock_id)
                    .with_sequences(&stores.sequences)
                    .with_state(&stores.state);
                render_event(&spec.events[index], &ctx).await
            };
            // A failed send means the client disconnected
            if tx.send(Ok(event)).await.is_err() {
                debug!(%mock_id, "sse client disconnected");
                break;
            }
            emitted += 1;
            index += 1;
        }
    });
    tokio_stream::wrappers::ReceiverStream::new(rx)
}

async fn render_event(spec: &SseEventSpec, ctx: &TemplateContext<'_>) -> Event {
    let mut event = Event::default();
    if let Some(name) = &spec.event {
        event = event.event(render_str(name, ctx).await);
    }
    if let Some(id) = &spec.id {
        event = event.id(render_str(id, ctx).await);
    }
    let data = match &spec.data {
        serde_json::Value::String(template) => render_str(template, ctx).await,
        other => render_json(other, ctx).await.to_string(),
    };
    event.data(data)
}
