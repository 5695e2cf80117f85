//! Configuration loaded from environment variables.
//!
//! The backend connection parameters are mandatory where the backend cannot
//! work without them; everything about the HTTP listener falls back to a
//! default so a local instance can start with only the backend keys set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const API_KEY_VAR: &str = "DBHANDS_API_KEY";
pub const AUTH_DOMAIN_VAR: &str = "DBHANDS_AUTH_DOMAIN";
pub const PROJECT_ID_VAR: &str = "DBHANDS_PROJECT_ID";
pub const STORAGE_BUCKET_VAR: &str = "DBHANDS_STORAGE_BUCKET";
pub const MESSAGING_SENDER_ID_VAR: &str = "DBHANDS_MESSAGING_SENDER_ID";
pub const APP_ID_VAR: &str = "DBHANDS_APP_ID";
pub const MEASUREMENT_ID_VAR: &str = "DBHANDS_MEASUREMENT_ID";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for environment variable {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Connection parameters for the backend project.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Env: `DBHANDS_API_KEY` (required). Clients must present it on every
    /// `/api` request.
    pub api_key: String,
    pub auth_domain: Option<String>,
    /// Env: `DBHANDS_PROJECT_ID` (required). Names the database file.
    pub project_id: String,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    /// Optional analytics id.
    pub measurement_id: Option<String>,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::Missing(name));

        let api_key = required(API_KEY_VAR)?;
        let project_id = required(PROJECT_ID_VAR)?;
        if !project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid {
                name: PROJECT_ID_VAR,
                reason: "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
            });
        }

        Ok(Self {
            api_key,
            auth_domain: optional(AUTH_DOMAIN_VAR),
            project_id,
            storage_bucket: optional(STORAGE_BUCKET_VAR),
            messaging_sender_id: optional(MESSAGING_SENDER_ID_VAR),
            app_id: optional(APP_ID_VAR),
            measurement_id: optional(MEASUREMENT_ID_VAR),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            api_key: "test-api-key".to_string(),
            auth_domain: None,
            project_id: "test-project".to_string(),
            storage_bucket: None,
            messaging_sender_id: None,
            app_id: None,
            measurement_id: None,
        }
    }
}

/// HTTP listener and storage location.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Directory holding the project database.
    /// Env: `DBHANDS_DATA_DIR`
    /// Default: `$HOME/.dbhands`
    pub data_dir: PathBuf,

    /// Sessions unused for this long are signed out.
    /// Env: `DBHANDS_SESSION_TTL_SECS`
    /// Default: 7 days
    pub session_ttl: Duration,
}

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Default for ServerConfig {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            data_dir: PathBuf::from(home_dir).join(".dbhands"),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(dir) = std::env::var("DBHANDS_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(ttl) = std::env::var("DBHANDS_SESSION_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(secs) if secs > 0 => config.session_ttl = Duration::from_secs(secs),
                _ => tracing::warn!(value = %ttl, "Invalid DBHANDS_SESSION_TTL_SECS, using default"),
            }
        }

        config
    }

    pub fn database_path(&self, backend: &BackendConfig) -> PathBuf {
        self.data_dir.join(format!("{}.db", backend.project_id))
    }
}
