//! Protocol-neutral request and response snapshots
//!
//! Listeners decode wire frames into a [`RequestSnapshot`]; dispatch, the
//! template context and the request log all consume it without knowing the
//! originating protocol.

use crate::model::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifying fields of one incoming request, captured once at the listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub protocol: Protocol,
    /// HTTP verb, gRPC method, GraphQL operation type, SOAP operation,
    /// or the MQTT packet kind
    pub method: String,
    /// HTTP path, gRPC `/Service/Method`, MQTT topic, WS/SSE path
    pub path: String,
    /// Headers (HTTP) or metadata (gRPC); lowercase keys
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// Path parameters captured by `{param}` placeholders after a match
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    /// Raw body bytes, when the protocol carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    /// Client certificate subject fields when mTLS is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<ClientCertInfo>,
    pub received_at: DateTime<Utc>,
}

impl RequestSnapshot {
    pub fn new(protocol: Protocol, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            protocol,
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            path_params: HashMap::new(),
            body: None,
            client_cert: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Body as UTF-8 text; lossy so matching never fails on encoding
    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Body parsed as JSON, if it is JSON
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body.as_ref().and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers.get(&lower).map(String::as_str).or_else(|| {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}

/// Client certificate subject fields surfaced to matchers and templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCertInfo {
    pub common_name: Option<String>,
    #[serde(default)]
    pub san_dns: Vec<String>,
    #[serde(default)]
    pub san_ip: Vec<String>,
    #[serde(default)]
    pub san_uri: Vec<String>,
}

/// What was sent back, recorded into the request log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Body preview, truncated to keep log entries bounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ResponseRecord {
    const BODY_PREVIEW_LIMIT: usize = 4096;

    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        let mut preview = body.to_string();
        if preview.len() > Self::BODY_PREVIEW_LIMIT {
            let mut cut = Self::BODY_PREVIEW_LIMIT;
            while !preview.is_char_boundary(cut) {
                cut -= 1;
            }
            preview.truncate(cut);
        }
        self.body = Some(preview);
        self
    }
}
