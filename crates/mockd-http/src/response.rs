//! Rendering a mock's `ResponseSpec` into an HTTP response

use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mockd_core::model::ResponseSpec;
use mockd_core::template::{render_json, render_str, TemplateContext};
use tracing::warn;

/// Render status, headers and body through the template context
pub async fn render(spec: &ResponseSpec, ctx: &TemplateContext<'_>) -> Response {
    let status = StatusCode::from_u16(spec.status_code).unwrap_or(StatusCode::OK);

    let (body, default_content_type) = match &spec.body {
        serde_json::Value::Null => (String::new(), "text/plain"),
        serde_json::Value::String(template) => {
            (render_str(template, ctx).await, "text/plain")
        }
        other => (
            render_json(other, ctx).await.to_string(),
            "application/json",
        ),
    };

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(default_content_type),
    );
    for (name, template) in &spec.headers {
        let value = render_str(template, ctx).await;
        match (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "skipping unrepresentable response header"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use mockd_core::{Protocol, RequestSnapshot};
    use std::collections::HashMap;

    #[tokio::test]
    async fn string_body_renders_templates() {
        let snapshot = RequestSnapshot::new(Protocol::Http, "GET", "/hello");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let spec = ResponseSpec {
            status_code: 201,
            headers: HashMap::from([(
                "X-Request-Path".to_string(),
                "{{request.path}}".to_string(),
            )]),
            body: serde_json::json!("you hit {{request.path}}"),
            delay_ms: None,
        };
        let response = render(&spec, &ctx).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("x-request-path").expect("header"),
            "/hello"
        );
        let body = to_bytes(response.into_body(), 1024).await.expect("body");
        assert_eq!(body.as_ref(), b"you hit /hello");
    }

    #[tokio::test]
    async fn json_body_sets_content_type() {
        let snapshot = RequestSnapshot::new(Protocol::Http, "GET", "/j");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let spec = ResponseSpec {
            body: serde_json::json!({"path": "{{request.path}}"}),
            ..Default::default()
        };
        let response = render(&spec, &ctx).await;
        assert_eq!(
            response.headers().get(CONTENT_TYPE).expect("ct"),
            "application/json"
        );
        let body = to_bytes(response.into_body(), 1024).await.expect("body");
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["path"], "/j");
    }
}
