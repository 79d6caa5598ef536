pub mod env;
pub use env::{encryption_key_from_env, ENCRYPTION_KEY_VAR};

use crate::oauth::OAuthProviderConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete fleettrack configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default)]
    pub oauth: OAuthProviderConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Companion API endpoints
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Commander profile resource
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    /// Fleet carrier resource
    #[serde(default = "default_fleetcarrier_path")]
    pub fleetcarrier_path: String,
    /// Upper bound for every outbound HTTP call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://companion.orerve.net".to_string()
}

fn default_profile_path() -> String {
    "/profile".to_string()
}

fn default_fleetcarrier_path() -> String {
    "/fleetcarrier".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            profile_path: default_profile_path(),
            fleetcarrier_path: default_fleetcarrier_path(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn profile_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.profile_path)
    }

    pub fn fleetcarrier_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.fleetcarrier_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Background polling cadence
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollingConfig {
    /// Resource refresh cadence (seconds)
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Pause between consecutive API requests (milliseconds)
    #[serde(default = "default_inter_request_delay")]
    pub inter_request_delay_ms: u64,
    /// How often pending authorizations are checked (milliseconds)
    #[serde(default = "default_auth_poll_interval")]
    pub auth_poll_interval_ms: u64,
}

fn default_interval() -> u64 {
    60
}

fn default_inter_request_delay() -> u64 {
    500
}

fn default_auth_poll_interval() -> u64 {
    1000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            inter_request_delay_ms: default_inter_request_delay(),
            auth_poll_interval_ms: default_auth_poll_interval(),
        }
    }
}

/// Credential database location
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "fleettrack.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP API for the foreground consumer
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    3080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
        }
    }
}

/// Rolling log files written next to console output
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,
    /// Directory holding one daily-rotated file per binary
    #[serde(default = "default_log_directory")]
    pub directory: String,
}

fn default_file_enabled() -> bool {
    true
}

fn default_log_directory() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: default_file_enabled(),
            directory: default_log_directory(),
        }
    }
}

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrackerConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(TrackerConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TrackerConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.oauth.audience, "all");
        assert_eq!(config.api.profile_url(), "https://companion.orerve.net/profile");
        assert_eq!(
            config.api.fleetcarrier_url(),
            "https://companion.orerve.net/fleetcarrier"
        );
        assert_eq!(config.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.polling.inter_request_delay_ms, 500);
        assert_eq!(config.polling.auth_poll_interval_ms, 1000);
        assert_eq!(config.storage.database_path, "fleettrack.db");
        assert!(config.server.enabled);
        assert_eq!(config.server.port, 3080);
        assert!(config.logging.file_enabled);
        assert_eq!(config.logging.directory, "logs");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [oauth]
            client_id = "my-client"
            scopes = ["auth"]

            [api]
            base_url = "http://localhost:9000/"
            request_timeout_seconds = 5

            [polling]
            interval_seconds = 120

            [storage]
            database_path = "/var/lib/fleettrack/accounts.db"

            [server]
            enabled = false

            [logging]
            directory = "/var/log/fleettrack"
        "#;

        let config: TrackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.oauth.client_id, "my-client");
        assert_eq!(config.oauth.scopes, vec!["auth"]);
        assert_eq!(config.oauth.redirect_uri, "edft://redirect");
        assert_eq!(config.api.profile_url(), "http://localhost:9000/profile");
        assert_eq!(config.api.request_timeout_seconds, 5);
        assert_eq!(config.polling.interval_seconds, 120);
        assert_eq!(config.polling.inter_request_delay_ms, 500);
        assert_eq!(config.storage.database_path, "/var/lib/fleettrack/accounts.db");
        assert!(!config.server.enabled);
        assert_eq!(config.server.port, 3080);
        assert_eq!(config.logging.directory, "/var/log/fleettrack");
        assert!(config.logging.file_enabled);
    }

    #[test]
    fn test_partial_config() {
        let config: TrackerConfig = toml::from_str("").unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleettrack.toml");
        std::fs::write(&path, "[polling]\ninterval_seconds = 30\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.polling.interval_seconds, 30);
    }

    #[test]
    fn test_load_config_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[polling\ninterval_seconds = ").unwrap();

        assert!(load_config(&path).is_err());
    }
}
