//! Bearer-token auth for the admin surface
//!
//! The API key is generated on first start and persisted to a user-only
//! file (mode 0600) under the config directory; every admin path requires
//! it when auth is enabled.

use crate::problem::Problem;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use mockd_core::{Error, Result};
use std::path::Path;
use tracing::info;

pub const API_KEY_FILE: &str = "admin-api-key";

/// Load the persisted API key, or generate and persist a fresh one
pub fn load_or_create_api_key(config_dir: &Path) -> Result<String> {
    let path = config_dir.join(API_KEY_FILE);
    if path.exists() {
        let key = std::fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("cannot read api key: {e}")))?;
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }
    std::fs::create_dir_all(config_dir)
        .map_err(|e| Error::config(format!("cannot create config dir: {e}")))?;
    let key = uuid::Uuid::new_v4().simple().to_string();
    std::fs::write(&path, &key).map_err(|e| Error::config(format!("cannot write api key: {e}")))?;
    restrict_permissions(&path)?;
    info!(path = %path.display(), "admin api key generated");
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, permissions)
        .map_err(|e| Error::config(format!("cannot restrict api key permissions: {e}")))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// The token the middleware checks against; `None` disables auth
#[derive(Clone, Default)]
pub struct AdminAuth {
    pub token: Option<String>,
}

/// Middleware: require `Authorization: Bearer <token>` when enabled
pub async fn require_bearer(
    State(auth): State<AdminAuth>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &auth.token else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        Problem::new(401, "unauthorized", "missing or invalid bearer token").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_created_once_and_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = load_or_create_api_key(dir.path()).expect("create");
        let second = load_or_create_api_key(dir.path()).expect("reuse");
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        load_or_create_api_key(dir.path()).expect("create");
        let metadata =
            std::fs::metadata(dir.path().join(API_KEY_FILE)).expect("metadata");
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
