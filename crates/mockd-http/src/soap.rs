//! SOAP response rendering: envelope bodies are XML string templates

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mockd_core::model::SoapMockSpec;
use mockd_core::template::{render_str, TemplateContext};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Render a matched SOAP mock's response envelope
pub async fn respond(spec: &SoapMockSpec, ctx: &TemplateContext<'_>) -> Response {
    let status =
        StatusCode::from_u16(spec.response.status_code).unwrap_or(StatusCode::OK);
    let body = match &spec.response.body {
        serde_json::Value::String(template) => render_str(template, ctx).await,
        serde_json::Value::Null => default_envelope(&spec.operation),
        other => render_str(&other.to_string(), ctx).await,
    };
    let body = if body.trim_start().starts_with("<?xml") || body.trim_start().starts_with('<') {
        body
    } else {
        // Bare payloads get wrapped into a response envelope
        wrap_envelope(&spec.operation, &body)
    };
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static(SOAP_CONTENT_TYPE),
    );
    response
}

fn default_envelope(operation: &str) -> String {
    wrap_envelope(operation, "")
}

fn wrap_envelope(operation: &str, inner: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\"?>",
            "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">",
            "<soap:Body><{op}Response>{inner}</{op}Response></soap:Body>",
            "</soap:Envelope>"
        ),
        op = operation,
        inner = inner,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use mockd_core::model::ResponseSpec;
    use mockd_core::{Protocol, RequestSnapshot};

    #[tokio::test]
    async fn bare_body_is_wrapped_in_an_envelope() {
        let spec = SoapMockSpec {
            path: "/soap".to_string(),
            operation: "GetUser".to_string(),
            xpath: None,
            response: ResponseSpec {
                body: serde_json::json!("<name>Alice</name>"),
                ..Default::default()
            },
            stateful: None,
        };
        let snapshot = RequestSnapshot::new(Protocol::Soap, "GetUser", "/soap");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let response = respond(&spec, &ctx).await;
        assert_eq!(
            response.headers().get(CONTENT_TYPE).expect("ct"),
            SOAP_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), 8192).await.expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("<name>Alice</name>"));
    }

    #[tokio::test]
    async fn full_envelope_passes_through() {
        let envelope = "<?xml version=\"1.0\"?><soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body/></soap:Envelope>";
        let spec = SoapMockSpec {
            path: "/soap".to_string(),
            operation: "Noop".to_string(),
            xpath: None,
            response: ResponseSpec {
                body: serde_json::json!(envelope),
                ..Default::default()
            },
            stateful: None,
        };
        let snapshot = RequestSnapshot::new(Protocol::Soap, "Noop", "/soap");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let response = respond(&spec, &ctx).await;
        let body = to_bytes(response.into_body(), 8192).await.expect("body");
        assert_eq!(body.as_ref(), envelope.as_bytes());
    }
}
