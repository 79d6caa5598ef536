//! Account manager - Orchestrates the account lifecycle.
//!
//! Opens the credential store, hydrates the registry and runs the background
//! tasks until shutdown.

use crate::registry::Registry;
use crate::runners::{AuthorizationWatcher, ResourcePoller};
use crate::session::SessionContext;
use anyhow::{Context, Result};
use fleettrack::{CredentialStore, TrackerConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Account manager - Owns the registry and its background tasks.
///
/// # Responsibilities
/// - Hydrate every stored account at startup
/// - Poll resources for authorized accounts
/// - Drive pending accounts through authorization
/// - Flush state on shutdown
pub struct AccountManager {
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    task_handles: Vec<JoinHandle<()>>,
}

impl AccountManager {
    /// Opens the configured store and starts all background tasks.
    ///
    /// # Arguments
    /// * `config` - Complete configuration
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub async fn start(config: &TrackerConfig, encryption_key: &str) -> Result<Self> {
        let store = CredentialStore::new(&config.storage.database_path, encryption_key)
            .context("Failed to initialize credential store")?;
        info!(database = %config.storage.database_path, "Credential store initialized");

        Self::start_with_store(config, Arc::new(store))
    }

    /// Starts against an already opened store.
    pub fn start_with_store(config: &TrackerConfig, store: Arc<CredentialStore>) -> Result<Self> {
        if config.oauth.client_id.is_empty() {
            warn!("No OAuth client_id configured, authorization will fail");
        }

        let ctx = Arc::new(SessionContext::new(store, config)?);
        let registry = Arc::new(Registry::load_all(ctx).context("Failed to load accounts")?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = ResourcePoller::new(Arc::clone(&registry), &config.polling);
        let watcher = AuthorizationWatcher::new(Arc::clone(&registry), &config.polling);
        let task_handles = vec![
            poller.start(shutdown_rx.clone()),
            watcher.start(shutdown_rx),
        ];

        info!("Account manager started");
        Ok(Self {
            registry,
            shutdown_tx,
            task_handles,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Stops the background tasks and flushes every dirty account.
    ///
    /// Network calls already in flight finish before the tasks exit.
    pub async fn shutdown(mut self) {
        info!("Shutting down account manager");

        // Receivers may already be gone if a task ended on its own
        let _ = self.shutdown_tx.send(true);

        for handle in self.task_handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let written = self.registry.sync_all().await;
        info!(accounts_synced = written, "Account manager stopped");
    }
}

impl Drop for AccountManager {
    fn drop(&mut self) {
        for handle in self.task_handles.drain(..) {
            handle.abort();
        }
    }
}
