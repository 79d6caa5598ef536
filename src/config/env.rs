//! Environment overrides applied on top of the TOML configuration.

use super::TrackerConfig;
use anyhow::{Context, Result};

/// Holds the base64 master key for token encryption. Never read from a file.
pub const ENCRYPTION_KEY_VAR: &str = "FLEETTRACK_ENCRYPTION_KEY";

impl TrackerConfig {
    /// Applies `FLEETTRACK_*` environment variables, falling back to the
    /// current values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FLEETTRACK_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = lookup("FLEETTRACK_DB") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("FLEETTRACK_API_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Some(v) = lookup("FLEETTRACK_LOG_DIR") {
            self.logging.directory = v;
        }
        if let Some(v) = lookup("FLEETTRACK_POLL_INTERVAL_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.polling.interval_seconds = n;
            }
        }
    }
}

/// Reads and validates the master encryption key.
pub fn encryption_key_from_env() -> Result<String> {
    let key = std::env::var(ENCRYPTION_KEY_VAR)
        .with_context(|| format!("{} environment variable is not set", ENCRYPTION_KEY_VAR))?;
    crate::credentials::validate_key(&key)
        .with_context(|| format!("{} is not a valid key", ENCRYPTION_KEY_VAR))?;
    Ok(key)
}
