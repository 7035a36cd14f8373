//! OAuth mock: token endpoint issuing canned bearer tokens
//!
//! Supports the client-credentials and password grants. Issued tokens land
//! in the shared token store so the admin surface can introspect them
//! (RFC 7662).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use base64::Engine;
use mockd_core::model::OAuthMockSpec;
use mockd_core::{RequestSnapshot, Stores};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Handle a token request against a matched OAuth mock
pub async fn respond(
    stores: &Arc<Stores>,
    spec: &OAuthMockSpec,
    snapshot: &RequestSnapshot,
) -> Response {
    let form = parse_form(snapshot);

    let Some(grant_type) = form.get("grant_type") else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing grant_type");
    };
    if !spec.grants.iter().any(|g| g == grant_type) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "grant type not enabled on this mock",
        );
    }

    let credentials = client_credentials(snapshot, &form);
    let client_id = match credentials {
        Some((client_id, client_secret)) => {
            let known = spec.clients.is_empty()
                || spec
                    .clients
                    .iter()
                    .any(|c| c.client_id == client_id && c.client_secret == client_secret);
            if !known {
                return oauth_error(
                    StatusCode::UNAUTHORIZED,
                    "invalid_client",
                    "unknown client credentials",
                );
            }
            client_id
        }
        None if spec.clients.is_empty() => "anonymous".to_string(),
        None => {
            return oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "client credentials required",
            )
        }
    };

    if grant_type == "password" && (form.get("username").is_none() || form.get("password").is_none())
    {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "password grant requires username and password",
        );
    }

    let scope = form
        .get("scope")
        .cloned()
        .or_else(|| spec.scope.clone());
    let token = stores
        .tokens
        .issue(&client_id, scope.clone(), spec.expires_in)
        .await;
    debug!(%client_id, "oauth token issued");

    Json(json!({
        "access_token": token.token,
        "token_type": "Bearer",
        "expires_in": spec.expires_in,
        "scope": scope,
    }))
    .into_response()
}

fn parse_form(snapshot: &RequestSnapshot) -> HashMap<String, String> {
    let body = snapshot.body_text().unwrap_or_default();
    body.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((url_decode(key), url_decode(value)))
        })
        .collect()
}

pub(crate) fn url_decode(input: &str) -> String {
    let mut out = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|h| {
                    std::str::from_utf8(h)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                });
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Client credentials from HTTP basic auth or form fields
fn client_credentials(
    snapshot: &RequestSnapshot,
    form: &HashMap<String, String>,
) -> Option<(String, String)> {
    if let Some(auth) = snapshot.header("authorization") {
        if let Some(encoded) = auth.strip_prefix("Basic ") {
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                let decoded = String::from_utf8_lossy(&decoded).into_owned();
                if let Some((id, secret)) = decoded.split_once(':') {
                    return Some((id.to_string(), secret.to_string()));
                }
            }
        }
    }
    match (form.get("client_id"), form.get("client_secret")) {
        (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
        _ => None,
    }
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({"error": code, "error_description": description})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::model::OAuthClient;
    use mockd_core::{MockdConfig, Protocol};

    fn token_request(body: &str) -> RequestSnapshot {
        RequestSnapshot::new(Protocol::OAuth, "POST", "/oauth/token")
            .with_body(body.as_bytes().to_vec())
    }

    fn oauth_spec() -> OAuthMockSpec {
        OAuthMockSpec {
            token_path: "/oauth/token".to_string(),
            grants: vec!["client_credentials".to_string(), "password".to_string()],
            clients: vec![OAuthClient {
                client_id: "app".to_string(),
                client_secret: "s3cret".to_string(),
            }],
            expires_in: 3600,
            scope: None,
        }
    }

    #[tokio::test]
    async fn client_credentials_grant_issues_a_token() {
        let stores = Stores::from_config(&MockdConfig::default())
            .await
            .expect("stores");
        let snapshot = token_request(
            "grant_type=client_credentials&client_id=app&client_secret=s3cret&scope=read",
        );
        let response = respond(&stores, &oauth_spec(), &snapshot).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stores.tokens.len().await, 1);
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_client() {
        let stores = Stores::from_config(&MockdConfig::default())
            .await
            .expect("stores");
        let snapshot =
            token_request("grant_type=client_credentials&client_id=app&client_secret=nope");
        let response = respond(&stores, &oauth_spec(), &snapshot).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(stores.tokens.is_empty().await);
    }

    #[tokio::test]
    async fn unsupported_grant_rejected() {
        let stores = Stores::from_config(&MockdConfig::default())
            .await
            .expect("stores");
        let snapshot = token_request("grant_type=authorization_code&code=x");
        let response = respond(&stores, &oauth_spec(), &snapshot).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn form_decoding_handles_escapes() {
        let snapshot = token_request("a=hello%20world&b=x%3Dy&c=1+2");
        let form = parse_form(&snapshot);
        assert_eq!(form["a"], "hello world");
        assert_eq!(form["b"], "x=y");
        assert_eq!(form["c"], "1 2");
    }
}
