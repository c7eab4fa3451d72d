// SPDX-License-Identifier: MIT
//! Pipeline configuration.
//!
//! Defaults live in code, `adbridge.toml` in the data directory overrides
//! them, and a handful of environment variables override the file — the
//! usual precedence for something that runs both on developer machines and
//! in CI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

use crate::fingerprint::DeviceSnapshot;
use crate::retry::RetryPolicy;

const DEFAULT_API_BASE_URL: &str = "https://graph.facebook.com/v19.0";
const DEFAULT_PROFILE_BASE_URL: &str = "https://api.adbridge.io";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

// ─── RetrySettings ────────────────────────────────────────────────────────────

/// Retry tuning (`[retry]` in adbridge.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum delivery attempts per event, including the first (default: 3).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds (default: 500).
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds (default: 30000).
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ─── PipelineConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding the SQLite database and adbridge.toml.
    pub data_dir: PathBuf,
    /// Ad-attribution API base URL.
    pub api_base_url: String,
    /// Application identifier registered with the attribution API.
    pub app_id: String,
    /// Attribution API access token. None = unauthenticated calls (dev).
    pub access_token: Option<String>,
    /// Document backend base URL (per-user records).
    pub profile_base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    pub retry: RetrySettings,
    /// Raw device fields for the fingerprint descriptor.
    pub device: DeviceSnapshot,
}

/// Shape of adbridge.toml. Every field optional — absent fields keep their
/// defaults.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    /// Override the attribution API base URL.
    api_base_url: Option<String>,
    /// Attribution API application id.
    app_id: Option<String>,
    /// Attribution API access token.
    access_token: Option<String>,
    /// Override the document backend base URL.
    profile_base_url: Option<String>,
    /// Per-request HTTP timeout in seconds (default: 10).
    http_timeout_secs: Option<u64>,
    /// Retry tuning (`[retry]`).
    retry: Option<RetrySettings>,
    /// Device fields (`[device]`).
    device: Option<DeviceSnapshot>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("adbridge.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse adbridge.toml — using defaults");
            None
        }
    }
}

impl PipelineConfig {
    /// Resolve the effective configuration for `data_dir`.
    pub fn load(data_dir: PathBuf) -> Self {
        let toml = load_toml(&data_dir).unwrap_or_default();

        let mut config = Self {
            data_dir,
            api_base_url: toml
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            app_id: toml.app_id.unwrap_or_default(),
            access_token: toml.access_token,
            profile_base_url: toml
                .profile_base_url
                .unwrap_or_else(|| DEFAULT_PROFILE_BASE_URL.to_string()),
            http_timeout_secs: toml.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            retry: toml.retry.unwrap_or_default(),
            device: toml.device.unwrap_or_default(),
        };

        // Environment overrides, highest precedence.
        if let Ok(v) = std::env::var("ADBRIDGE_API_URL") {
            config.api_base_url = v;
        }
        if let Ok(v) = std::env::var("ADBRIDGE_APP_ID") {
            config.app_id = v;
        }
        if let Ok(v) = std::env::var("ADBRIDGE_ACCESS_TOKEN") {
            config.access_token = Some(v);
        }
        if let Ok(v) = std::env::var("ADBRIDGE_PROFILE_URL") {
            config.profile_base_url = v;
        }

        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Platform-appropriate default data directory.
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("adbridge");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("adbridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("adbridge");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("adbridge");
        }
    }
    PathBuf::from(".adbridge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::load(dir.path().to_path_buf());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.http_timeout_secs, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("adbridge.toml"),
            r#"
            app_id = "123456"
            http_timeout_secs = 5

            [retry]
            max_attempts = 5
            base_delay_ms = 250

            [device]
            platform = "ios"
            bundle_id = "io.adbridge.demo"
            "#,
        )
        .unwrap();

        let config = PipelineConfig::load(dir.path().to_path_buf());
        assert_eq!(config.app_id, "123456");
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.device.bundle_id, "io.adbridge.demo");
        // Unset fields keep defaults.
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.profile_base_url, DEFAULT_PROFILE_BASE_URL);
    }

    #[test]
    fn retry_settings_convert_to_policy() {
        let settings = RetrySettings {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        let policy = settings.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_millis(1_000));
    }
}
