//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Session tokens are never stored in the TOML; they come from
//! AUTHED_FETCH_ACCESS_TOKEN / AUTHED_FETCH_REFRESH_TOKEN or the token file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use auth_refresh::classify::DEFAULT_AUTH_ENDPOINTS;
use common::Secret;
use serde::Deserialize;
use transport::HeaderInjection;

pub const ACCESS_TOKEN_ENV: &str = "AUTHED_FETCH_ACCESS_TOKEN";
pub const REFRESH_TOKEN_ENV: &str = "AUTHED_FETCH_REFRESH_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Backend API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session and refresh settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
    /// Where the user is sent when the session cannot be refreshed
    #[serde(default = "default_login_entry")]
    pub login_entry: String,
    #[serde(default)]
    pub refresh_timeout_secs: Option<u64>,
    /// Persist the session here; in-memory only when unset
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            exempt_paths: default_exempt_paths(),
            login_entry: default_login_entry(),
            refresh_timeout_secs: None,
            token_file: None,
            access_token: None,
            refresh_token: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_path() -> String {
    "/auth/refresh".into()
}

fn default_exempt_paths() -> Vec<String> {
    DEFAULT_AUTH_ENDPOINTS.iter().map(|p| p.to_string()).collect()
}

fn default_login_entry() -> String {
    "/login".into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::InvalidField {
                field: "base_url",
                reason: format!(
                    "must start with http:// or https://, got: {}",
                    config.api.base_url
                ),
            });
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::InvalidField {
                field: "timeout_secs",
                reason: "must be greater than 0".into(),
            });
        }

        if config.auth.refresh_timeout_secs == Some(0) {
            return Err(common::Error::InvalidField {
                field: "refresh_timeout_secs",
                reason: "must be greater than 0 when set".into(),
            });
        }

        if config.auth.refresh_path.trim().is_empty() {
            return Err(common::Error::InvalidField {
                field: "refresh_path",
                reason: "must not be empty".into(),
            });
        }

        config.auth.access_token = secret_from_env(ACCESS_TOKEN_ENV);
        config.auth.refresh_token = secret_from_env(REFRESH_TOKEN_ENV);

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("authed-fetch.toml")
    }

    /// Absolute refresh URL: `refresh_path` resolved against `base_url`.
    pub fn refresh_url(&self) -> String {
        let path = self.auth.refresh_path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.api.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.auth.refresh_timeout_secs.map(Duration::from_secs)
    }
}

fn secret_from_env(key: &str) -> Option<Secret<String>> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}
