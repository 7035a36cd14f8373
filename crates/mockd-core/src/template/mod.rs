//! Template engine for response bodies, headers and streaming scripts
//!
//! Placeholders parse to a token tree once per distinct template string
//! (process-wide cache); per-request rendering walks the tree against a
//! [`TemplateContext`]. Errors are data: a token that cannot resolve renders
//! as the empty string with a warning, and rendering never panics.

pub mod faker;

use crate::events::RequestSnapshot;
use crate::sequence::SequenceStore;
use crate::state::StatefulStore;
use faker::FakerKind;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One parsed placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Uuid,
    UuidShort,
    Now,
    NowUnix,
    RandInt { min: i64, max: i64 },
    RandString { len: usize },
    Seq { name: String },
    MockId,
    RequestMethod,
    RequestPath,
    PathParam { name: String },
    Query { name: String },
    Header { name: String },
    Body,
    BodyPath { path: String },
    ClientCertCn,
    ClientCertSanDns,
    ClientCertSanIp,
    ClientCertSanUri,
    State {
        resource: String,
        id: String,
        field: String,
    },
    Faker(FakerKind),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A parsed template: literal runs interleaved with tokens
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

static COMPILE_CACHE: Lazy<Mutex<HashMap<String, Arc<Template>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

const COMPILE_CACHE_CAP: usize = 4096;

impl Template {
    /// Parse a template string. Parsing never fails; malformed or unknown
    /// placeholders become [`Token::Unknown`] and render empty.
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            let (literal, after) = rest.split_at(start);
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal.to_string()));
            }
            match after[2..].find("}}") {
                Some(end) => {
                    let raw = after[2..2 + end].trim();
                    segments.push(Segment::Token(parse_token(raw)));
                    rest = &after[2 + end + 2..];
                }
                None => {
                    // Unterminated opener is literal text
                    segments.push(Segment::Literal(after.to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Self { segments }
    }

    /// Parse through the process-wide cache, so each distinct template
    /// string is compiled once regardless of request volume.
    pub fn compile(input: &str) -> Arc<Self> {
        let mut cache = COMPILE_CACHE.lock();
        if let Some(compiled) = cache.get(input) {
            return Arc::clone(compiled);
        }
        if cache.len() >= COMPILE_CACHE_CAP {
            cache.clear();
        }
        let compiled = Arc::new(Self::parse(input));
        cache.insert(input.to_string(), Arc::clone(&compiled));
        compiled
    }

    /// True if the template is a single literal run with no tokens
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render against the context. Unresolvable tokens render empty.
    pub async fn render(&self, ctx: &TemplateContext<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => out.push_str(&render_token(token, ctx).await),
            }
        }
        out
    }
}

fn parse_token(raw: &str) -> Token {
    let mut words = raw.split_whitespace();
    let head = words.next().unwrap_or("");
    let args: Vec<&str> = words.collect();

    match (head, args.as_slice()) {
        ("uuid", []) => Token::Uuid,
        ("uuid.short", []) => Token::UuidShort,
        ("now", []) => Token::Now,
        ("now.unix", []) => Token::NowUnix,
        ("mock.id", []) => Token::MockId,
        ("randInt", [min, max]) => match (min.parse(), max.parse()) {
            (Ok(min), Ok(max)) => Token::RandInt { min, max },
            _ => Token::Unknown(raw.to_string()),
        },
        ("randString", [len]) => match len.parse() {
            Ok(len) => Token::RandString { len },
            Err(_) => Token::Unknown(raw.to_string()),
        },
        ("seq", [name]) => Token::Seq {
            name: (*name).to_string(),
        },
        ("request.method", []) => Token::RequestMethod,
        ("request.path", []) => Token::RequestPath,
        ("request.body", []) => Token::Body,
        ("client.cert.cn", []) => Token::ClientCertCn,
        ("client.cert.san.dns", []) => Token::ClientCertSanDns,
        ("client.cert.san.ip", []) => Token::ClientCertSanIp,
        ("client.cert.san.uri", []) => Token::ClientCertSanUri,
        _ if args.is_empty() => parse_dotted(head, raw),
        _ => Token::Unknown(raw.to_string()),
    }
}

fn parse_dotted(head: &str, raw: &str) -> Token {
    if let Some(path) = head.strip_prefix("request.body.") {
        return Token::BodyPath {
            path: path.to_string(),
        };
    }
    if let Some(name) = head.strip_prefix("request.path.") {
        return Token::PathParam {
            name: name.to_string(),
        };
    }
    if let Some(name) = head.strip_prefix("request.query.") {
        return Token::Query {
            name: name.to_string(),
        };
    }
    if let Some(name) = head.strip_prefix("request.header.") {
        return Token::Header {
            name: name.to_string(),
        };
    }
    if let Some(kind) = head.strip_prefix("faker.") {
        return match FakerKind::parse(kind) {
            Some(kind) => Token::Faker(kind),
            None => Token::Unknown(raw.to_string()),
        };
    }
    if let Some(rest) = head.strip_prefix("state.") {
        let parts: Vec<&str> = rest.splitn(3, '.').collect();
        if let [resource, id, field] = parts.as_slice() {
            return Token::State {
                resource: (*resource).to_string(),
                id: (*id).to_string(),
                field: (*field).to_string(),
            };
        }
    }
    Token::Unknown(raw.to_string())
}

/// Everything a render can resolve against
#[derive(Clone, Default)]
pub struct TemplateContext<'a> {
    pub snapshot: Option<&'a RequestSnapshot>,
    pub mock_id: &'a str,
    pub sequences: Option<&'a SequenceStore>,
    /// Read-only access into the stateful store
    pub state: Option<&'a StatefulStore>,
}

impl<'a> TemplateContext<'a> {
    pub fn for_request(snapshot: &'a RequestSnapshot, mock_id: &'a str) -> Self {
        Self {
            snapshot: Some(snapshot),
            mock_id,
            sequences: None,
            state: None,
        }
    }

    pub fn with_sequences(mut self, sequences: &'a SequenceStore) -> Self {
        self.sequences = Some(sequences);
        self
    }

    pub fn with_state(mut self, state: &'a StatefulStore) -> Self {
        self.state = Some(state);
        self
    }
}

async fn render_token(token: &Token, ctx: &TemplateContext<'_>) -> String {
    match token {
        Token::Uuid => uuid::Uuid::new_v4().to_string(),
        Token::UuidShort => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            id[..8].to_string()
        }
        Token::Now => chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        Token::NowUnix => chrono::Utc::now().timestamp().to_string(),
        Token::RandInt { min, max } => {
            if min > max {
                warn!(min, max, "randInt range inverted, rendering empty");
                return String::new();
            }
            let mut rng = rand::rng();
            rng.random_range(*min..=*max).to_string()
        }
        Token::RandString { len } => {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
            let mut rng = rand::rng();
            (0..*len)
                .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
                .collect()
        }
        Token::Seq { name } => match ctx.sequences {
            Some(sequences) => sequences.next(name).to_string(),
            None => String::new(),
        },
        Token::MockId => ctx.mock_id.to_string(),
        Token::RequestMethod => ctx
            .snapshot
            .map(|s| s.method.clone())
            .unwrap_or_default(),
        Token::RequestPath => ctx.snapshot.map(|s| s.path.clone()).unwrap_or_default(),
        Token::PathParam { name } => ctx
            .snapshot
            .and_then(|s| s.path_params.get(name).cloned())
            .unwrap_or_default(),
        Token::Query { name } => ctx
            .snapshot
            .and_then(|s| s.query.get(name).cloned())
            .unwrap_or_default(),
        Token::Header { name } => ctx
            .snapshot
            .and_then(|s| s.header(name).map(str::to_string))
            .unwrap_or_default(),
        Token::Body => ctx.snapshot.and_then(|s| s.body_text()).unwrap_or_default(),
        Token::BodyPath { path } => render_body_path(path, ctx),
        Token::ClientCertCn => ctx
            .snapshot
            .and_then(|s| s.client_cert.as_ref())
            .and_then(|c| c.common_name.clone())
            .unwrap_or_default(),
        Token::ClientCertSanDns => cert_list(ctx, |c| &c.san_dns),
        Token::ClientCertSanIp => cert_list(ctx, |c| &c.san_ip),
        Token::ClientCertSanUri => cert_list(ctx, |c| &c.san_uri),
        Token::State {
            resource,
            id,
            field,
        } => match ctx.state {
            Some(state) => state
                .read_field(resource, id, field)
                .await
                .map(|v| json_to_text(&v))
                .unwrap_or_default(),
            None => String::new(),
        },
        Token::Faker(kind) => faker::generate(*kind),
        Token::Unknown(raw) => {
            warn!(token = %raw, "unknown template placeholder, rendering empty");
            String::new()
        }
    }
}

fn cert_list<'a>(
    ctx: &'a TemplateContext<'_>,
    pick: impl Fn(&'a crate::events::ClientCertInfo) -> &'a Vec<String>,
) -> String {
    ctx.snapshot
        .and_then(|s| s.client_cert.as_ref())
        .map(|c| pick(c).join(","))
        .unwrap_or_default()
}

fn render_body_path(path: &str, ctx: &TemplateContext<'_>) -> String {
    let Some(body) = ctx.snapshot.and_then(RequestSnapshot::body_json) else {
        return String::new();
    };
    let Ok(selector) = jsonpath::Selector::new(path) else {
        warn!(path, "invalid JSONPath in template, rendering empty");
        return String::new();
    };
    selector
        .find(&body)
        .next()
        .map(json_to_text)
        .unwrap_or_default()
}

/// Strings render raw; everything else renders as compact JSON
pub fn json_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convenience: compile and render in one call
pub async fn render_str(input: &str, ctx: &TemplateContext<'_>) -> String {
    Template::compile(input).render(ctx).await
}

/// Recursively render every string leaf of a JSON document
pub fn render_json<'a>(
    value: &'a serde_json::Value,
    ctx: &'a TemplateContext<'a>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = serde_json::Value> + Send + 'a>> {
    Box::pin(async move {
        match value {
            serde_json::Value::String(s) => {
                serde_json::Value::String(render_str(s, ctx).await)
            }
            serde_json::Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(render_json(item, ctx).await);
                }
                serde_json::Value::Array(rendered)
            }
            serde_json::Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), render_json(item, ctx).await);
                }
                serde_json::Value::Object(rendered)
            }
            other => other.clone(),
        }
    })
}
