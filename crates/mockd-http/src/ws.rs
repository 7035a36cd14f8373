//! WebSocket session handling
//!
//! After the upgrade, the matched mock's `on_connect` script runs, then
//! incoming frames dispatch against the mock's per-frame rules. The session
//! ends on client close, server shutdown, or socket error.

use axum::extract::ws::{Message, WebSocket};
use mockd_core::matching::ws::match_frame;
use mockd_core::model::{WebSocketMockSpec, WsFrame, WsFrameKind};
use mockd_core::template::{render_json, render_str, TemplateContext};
use mockd_core::{RequestSnapshot, Stores};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Sessions with no client traffic for this long are closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Drive one established WebSocket session to completion
pub async fn run_session(
    mut socket: WebSocket,
    spec: WebSocketMockSpec,
    snapshot: RequestSnapshot,
    mock_id: String,
    stores: Arc<Stores>,
    mut shutdown: watch::Receiver<bool>,
) {
    for frame in &spec.on_connect {
        if !send_frame(&mut socket, frame, &snapshot, &mock_id, &stores).await {
            return;
        }
    }

    loop {
        let message = tokio::select! {
            message = socket.recv() => message,
            _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                debug!(%mock_id, "websocket session idle timeout");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            _ = shutdown.changed() => {
                debug!(%mock_id, "websocket session cancelled by shutdown");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        };
        let payload = match message {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!(%mock_id, "websocket client closed");
                return;
            }
            Some(Err(e)) => {
                warn!(%mock_id, error = %e, "websocket receive failed");
                return;
            }
        };

        let Some(rule) = match_frame(&spec.rules, &payload) else {
            debug!(%mock_id, "no websocket rule matched frame");
            continue;
        };
        // Frame dispatch counts as an invocation of the mock
        let mut frame_snapshot = snapshot.clone();
        frame_snapshot.body = Some(payload.into_bytes());
        stores.verification.record(&mock_id, &frame_snapshot).await;
        for frame in &rule.response {
            if !send_frame(&mut socket, frame, &frame_snapshot, &mock_id, &stores).await {
                return;
            }
        }
    }
}

/// Render and send one scripted frame; `false` when the socket is gone
async fn send_frame(
    socket: &mut WebSocket,
    frame: &WsFrame,
    snapshot: &RequestSnapshot,
    mock_id: &str,
    stores: &Arc<Stores>,
) -> bool {
    if frame.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(frame.delay_ms)).await;
    }
    let ctx = TemplateContext::for_request(snapshot, mock_id)
        .with_sequences(&stores.sequences)
        .with_state(&stores.state);
    let message = match frame.kind {
        WsFrameKind::Text => {
            let text = match &frame.body {
                serde_json::Value::String(template) => render_str(template, &ctx).await,
                other => render_json(other, &ctx).await.to_string(),
            };
            Message::Text(text.into())
        }
        WsFrameKind::Json => {
            let rendered = render_json(&frame.body, &ctx).await;
            Message::Text(rendered.to_string().into())
        }
        WsFrameKind::Binary => {
            let bytes = match &frame.body {
                serde_json::Value::String(template) => {
                    render_str(template, &ctx).await.into_bytes()
                }
                other => render_json(other, &ctx).await.to_string().into_bytes(),
            };
            Message::Binary(bytes.into())
        }
    };
    socket.send(message).await.is_ok()
}
