//! Stateful CRUD over HTTP: base-path routes and mock-bound side-effects
//!
//! The HTTP verb maps onto the CRUD action: GET collection → list, GET item
//! → read, POST → create, PUT/PATCH → update, DELETE → delete. Side-effects
//! run inside the resource's own lock (the store serializes per resource).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use mockd_core::model::CrudAction;
use mockd_core::state::ListQuery;
use mockd_core::{Error, RequestSnapshot, Stores};
use serde_json::json;
use std::sync::Arc;

const RESERVED_QUERY_KEYS: &[&str] = &["limit", "offset", "sort", "parentId"];

/// Try to serve a request from a stateful resource's base path. `None`
/// when no resource claims the path.
pub async fn handle_base_path(
    stores: &Arc<Stores>,
    snapshot: &RequestSnapshot,
) -> Option<Response> {
    let resource = stores.state.resource_for_path(&snapshot.path).await?;
    let base = resource.config().base_path.clone()?;
    let name = resource.config().name.clone();

    let rest = snapshot.path.strip_prefix(&base).unwrap_or("");
    let item_id = rest.trim_matches('/');
    let action = match (snapshot.method.as_str(), item_id.is_empty()) {
        ("GET", true) => CrudAction::List,
        ("GET", false) => CrudAction::Get,
        ("POST", true) => CrudAction::Create,
        ("PUT" | "PATCH", false) => CrudAction::Update,
        ("DELETE", false) => CrudAction::Delete,
        _ => return Some(error_response(&Error::not_found("no such route"))),
    };
    Some(run_action(stores, &name, action, Some(item_id), snapshot).await)
}

/// Execute a CRUD action for a mock's stateful binding. The id comes from
/// the matched path params (an `{id}` capture) or the trailing segment.
pub async fn handle_binding(
    stores: &Arc<Stores>,
    resource: &str,
    declared: Option<CrudAction>,
    snapshot: &RequestSnapshot,
) -> Response {
    let action = declared.unwrap_or_else(|| match snapshot.method.as_str() {
        "POST" => CrudAction::Create,
        "PUT" | "PATCH" => CrudAction::Update,
        "DELETE" => CrudAction::Delete,
        // GET reads one item only when the matcher captured an `{id}`
        _ if snapshot.path_params.contains_key("id") => CrudAction::Get,
        _ => CrudAction::List,
    });
    run_action(stores, resource, action, item_id_from(snapshot), snapshot).await
}

fn item_id_from(snapshot: &RequestSnapshot) -> Option<&str> {
    snapshot
        .path_params
        .get("id")
        .map(String::as_str)
        .or_else(|| snapshot.path.rsplit('/').next().filter(|s| !s.is_empty()))
}

async fn run_action(
    stores: &Arc<Stores>,
    resource: &str,
    action: CrudAction,
    item_id: Option<&str>,
    snapshot: &RequestSnapshot,
) -> Response {
    match action {
        CrudAction::List => {
            let query = list_query_from(snapshot);
            match stores.state.list(resource, &query).await {
                Ok(page) => Json(page).into_response(),
                Err(e) => error_response(&e),
            }
        }
        CrudAction::Get => {
            let Some(id) = item_id else {
                return error_response(&Error::validation("missing item id"));
            };
            match stores.state.get(resource, id).await {
                Ok(item) => Json(item).into_response(),
                Err(e) => error_response(&e),
            }
        }
        CrudAction::Create => {
            let Some(body) = snapshot.body_json() else {
                return error_response(&Error::validation("request body must be JSON"));
            };
            match stores.state.create(resource, body).await {
                Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
                Err(e) => error_response(&e),
            }
        }
        CrudAction::Update => {
            let Some(id) = item_id else {
                return error_response(&Error::validation("missing item id"));
            };
            let Some(body) = snapshot.body_json() else {
                return error_response(&Error::validation("request body must be JSON"));
            };
            match stores.state.update(resource, id, body).await {
                Ok(updated) => Json(updated).into_response(),
                Err(e) => error_response(&e),
            }
        }
        CrudAction::Delete => {
            let Some(id) = item_id else {
                return error_response(&Error::validation("missing item id"));
            };
            match stores.state.delete(resource, id).await {
                Ok(()) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => error_response(&e),
            }
        }
    }
}

fn list_query_from(snapshot: &RequestSnapshot) -> ListQuery {
    let mut query = ListQuery {
        parent_id: snapshot.query.get("parentId").cloned(),
        sort: snapshot.query.get("sort").cloned(),
        limit: snapshot.query.get("limit").and_then(|v| v.parse().ok()),
        offset: snapshot.query.get("offset").and_then(|v| v.parse().ok()),
        ..Default::default()
    };
    for (key, value) in &snapshot.query {
        if !RESERVED_QUERY_KEYS.contains(&key.as_str()) {
            query.filters.insert(key.clone(), value.clone());
        }
    }
    query
}

/// Map a store error onto the mock surface (no RFC 7807 here; that is the
/// admin surface's shape)
pub fn error_response(error: &Error) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({
            "error": error.kind(),
            "message": error.to_string(),
        })),
    )
        .into_response()
}
