//! Shared collaborators handed to every session at construction.

use anyhow::{Context, Result};
use fleettrack::config::{ApiConfig, TrackerConfig};
use fleettrack::oauth::OAuthProviderConfig;
use fleettrack::CredentialStore;
use std::sync::Arc;

/// Store handle, HTTP client and endpoint configuration for sessions.
pub struct SessionContext {
    pub store: Arc<CredentialStore>,
    pub http: reqwest::Client,
    pub oauth: OAuthProviderConfig,
    pub api: ApiConfig,
}

impl SessionContext {
    /// Builds a context whose HTTP client enforces the configured timeout.
    pub fn new(store: Arc<CredentialStore>, config: &TrackerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api.request_timeout())
            .user_agent(concat!("fleettrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            store,
            http,
            oauth: config.oauth.clone(),
            api: config.api.clone(),
        })
    }
}
