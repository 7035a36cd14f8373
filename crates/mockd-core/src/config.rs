//! The versioned configuration document and environment overrides

use crate::chaos::ChaosSettings;
use crate::error::{Error, Result};
use crate::model::Mock;
use crate::state::{CustomOperation, ResourceConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Admin-API auth settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Fixed bearer token; generated and persisted on first start when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// TLS material locations (PEM). Generation is external; mockd only loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Enables mTLS when set; client subject fields flow into matchers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_path: Option<PathBuf>,
}

/// The top-level configuration document (YAML or JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockdConfig {
    pub version: String,
    pub mocks: Vec<Mock>,
    pub stateful_resources: Vec<ResourceConfig>,
    pub custom_operations: Vec<CustomOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos: Option<ChaosSettings>,

    // Server options
    pub port: u16,
    pub admin_port: u16,
    /// HTTPS is opt-in; requires `tls`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
    /// Primary MQTT broker port, opt-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_port: Option<u16>,
    /// Per-connection read timeout, seconds
    pub read_timeout: u64,
    /// Per-connection write timeout, seconds
    pub write_timeout: u64,
    pub max_log_entries: usize,
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Write the effective config here on shutdown when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_on_shutdown: Option<PathBuf>,
    /// Default workspace label applied to mocks that declare none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Context label surfaced via /status, used by clients to pick an
    /// admin server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Default for MockdConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            mocks: Vec::new(),
            stateful_resources: Vec::new(),
            custom_operations: Vec::new(),
            auth: None,
            chaos: None,
            port: 4280,
            admin_port: 4290,
            https_port: None,
            mqtt_port: None,
            read_timeout: 30,
            write_timeout: 30,
            max_log_entries: 1000,
            cors_origins: Vec::new(),
            rate_limit: None,
            tls: None,
            snapshot_on_shutdown: None,
            workspace: None,
            context: None,
        }
    }
}

impl MockdConfig {
    /// Parse a document; tries YAML first (a JSON document is also valid
    /// YAML)
    pub fn from_str(input: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(input)?;
        config.normalize();
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::from_str(&raw)?;
        info!(path = %path.display(), mocks = config.mocks.len(), "config loaded");
        Ok(config)
    }

    /// Render as YAML, the snapshot/export format
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_yaml()?).await?;
        info!(path = %path.display(), "config snapshot written");
        Ok(())
    }

    /// Fill deterministic defaults: mock ids/names and the workspace label
    fn normalize(&mut self) {
        for mock in &mut self.mocks {
            mock.fill_defaults();
            if mock.workspace.is_none() {
                mock.workspace = self.workspace.clone();
            }
        }
        if let Some(chaos) = &mut self.chaos {
            chaos.clamp();
        }
    }

    /// Validate the whole document, collecting every field failure
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (i, mock) in self.mocks.iter().enumerate() {
            for mut error in mock.validate() {
                error.location = format!("mocks[{i}].{}", error.location);
                errors.push(error);
            }
        }
        for (i, resource) in self.stateful_resources.iter().enumerate() {
            if resource.name.is_empty() {
                errors.push(crate::error::FieldError::new(
                    format!("statefulResources[{i}].name"),
                    "required",
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_fields("config failed validation", errors))
        }
    }

    /// Apply `MOCKD_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Same as [`Self::apply_env`], with an injectable source for tests
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("MOCKD_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(port) = var("MOCKD_ADMIN_PORT").and_then(|v| v.parse().ok()) {
            self.admin_port = port;
        }
        if let Some(port) = var("MOCKD_HTTPS_PORT").and_then(|v| v.parse().ok()) {
            self.https_port = Some(port);
        }
        if let Some(secs) = var("MOCKD_READ_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.read_timeout = secs;
        }
        if let Some(secs) = var("MOCKD_WRITE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.write_timeout = secs;
        }
        if let Some(max) = var("MOCKD_MAX_LOG_ENTRIES").and_then(|v| v.parse().ok()) {
            self.max_log_entries = max;
        }
        if let Some(workspace) = var("MOCKD_WORKSPACE") {
            self.workspace = Some(workspace);
        }
        if let Some(context) = var("MOCKD_CONTEXT") {
            self.context = Some(context);
        }
    }
}
