//! RFC 7807 Problem Details responses for the admin surface

use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mockd_core::{Error, FieldError};
use serde::Serialize;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// An RFC 7807 problem document, with field-level `errors` for validation
/// failures
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Problem {
    pub fn new(status: u16, kind: &str, title: impl Into<String>) -> Self {
        Self {
            kind: format!("https://mockd.dev/problems/{kind}"),
            title: title.into(),
            status,
            detail: None,
            errors: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<&Error> for Problem {
    fn from(error: &Error) -> Self {
        Self {
            kind: format!("https://mockd.dev/problems/{}", error.kind()),
            title: error.kind().replace('_', " "),
            status: error.http_status(),
            detail: Some(error.to_string()),
            errors: error.field_errors().to_vec(),
        }
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        response
    }
}

/// Shorthand for handler results
pub fn problem(error: &Error) -> Response {
    Problem::from(error).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validation_errors_carry_field_detail() {
        let error = Error::validation_fields(
            "mock failed validation",
            vec![FieldError::new("matcher.path", "required")],
        );
        let response = problem(&error);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).expect("ct"),
            PROBLEM_CONTENT_TYPE
        );
        let bytes = axum::body::to_bytes(response.into_body(), 8192)
            .await
            .expect("body");
        let doc: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(doc["errors"][0]["location"], "matcher.path");
        assert_eq!(doc["status"], 400);
    }
}
