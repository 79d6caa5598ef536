//! Redirect helper.
//!
//! Registered as the handler for the `edft://` URI scheme. The operating
//! system launches it with the redirect URI as its only argument; it records
//! the authorization code against the account whose state token matches.

use anyhow::{bail, Context, Result};
use fleettrack::config::{self, encryption_key_from_env};
use fleettrack::logging;
use fleettrack::oauth::parse_callback;
use fleettrack::CredentialStore;
use tracing::{info, warn};

fn main() -> Result<()> {
    let config_path =
        std::env::var("FLEETTRACK_CONFIG").unwrap_or_else(|_| "fleettrack.toml".to_string());
    let mut config = config::load_config(&config_path)?;
    config.apply_env_overrides();

    let _log_guard = logging::init(&config.logging, "fleettrack-redirect", "fleettrack=info")?;

    let uri = match std::env::args().nth(1) {
        Some(uri) => uri,
        None => bail!("Usage: fleettrack-redirect <redirect-uri>"),
    };

    let callback = parse_callback(&uri, &config.oauth.redirect_uri)
        .context("Failed to parse redirect callback")?;

    let encryption_key = encryption_key_from_env()?;
    let store = CredentialStore::new(&config.storage.database_path, &encryption_key)
        .context("Failed to open credential store")?;

    if store.record_authorization_code(&callback.state, &callback.code)? {
        info!(state = %callback.state, "Authorization code recorded");
    } else {
        warn!(state = %callback.state, "No account is waiting on this state token");
    }

    Ok(())
}
