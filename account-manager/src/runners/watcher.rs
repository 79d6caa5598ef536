//! Drives accounts through authorization.
//!
//! Each pass issues a URI for every account that needs one, then looks for
//! codes the redirect helper has recorded and exchanges them.

use super::{refresh_resources, stop_requested};
use crate::registry::Registry;
use crate::session::{ExchangeKind, SessionState};
use fleettrack::config::PollingConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Counts from one watcher pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// New authorization URIs issued
    pub prompted: usize,
    /// Accounts that completed the code exchange
    pub authorized: usize,
    /// Code exchanges the token endpoint rejected
    pub failed: usize,
}

pub struct AuthorizationWatcher {
    registry: Arc<Registry>,
    poll_interval: Duration,
    request_delay: Duration,
}

impl AuthorizationWatcher {
    pub fn new(registry: Arc<Registry>, config: &PollingConfig) -> Self {
        Self {
            registry,
            poll_interval: Duration::from_millis(config.auth_poll_interval_ms.max(100)),
            request_delay: Duration::from_millis(config.inter_request_delay_ms),
        }
    }

    /// Starts the watcher loop (non-blocking).
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_ms = self.poll_interval.as_millis() as u64,
                "Starting authorization watcher"
            );

            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_requested(&mut shutdown) => break,
                }
                self.run_once().await;
            }

            info!("Authorization watcher stopped");
        })
    }

    /// One pass over every session, then syncs.
    pub async fn run_once(&self) -> WatchSummary {
        let mut summary = WatchSummary::default();

        for handle in self.registry.sessions().await {
            let mut session = handle.lock().await;

            if session.auth_required()
                && !session.auth_prompted()
                && matches!(
                    session.state(),
                    SessionState::NeedsSetup | SessionState::RefreshFailed
                )
            {
                match session.begin_authorization() {
                    Ok(uri) => {
                        summary.prompted += 1;
                        info!(
                            identity = %handle.identity(),
                            authorization_uri = %uri,
                            "Account awaiting authorization, open the URI to continue"
                        );
                    }
                    Err(e) => warn!(
                        identity = %handle.identity(),
                        error = %e,
                        "Failed to begin authorization"
                    ),
                }
                continue;
            }

            if !session.auth_prompted() {
                continue;
            }

            match session.check_for_authorization_code() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(identity = %handle.identity(), error = %e, "Failed to check for authorization code");
                    continue;
                }
            }

            match session.exchange_tokens(ExchangeKind::Initial).await {
                Ok(()) => {
                    summary.authorized += 1;
                    info!(identity = %handle.identity(), "Account authorized");
                    refresh_resources(&mut session, self.request_delay).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        identity = %handle.identity(),
                        error = %e,
                        "Authorization code exchange failed, a new URI will be issued"
                    );
                    session.clear_authorization_prompt();
                }
            }
        }

        self.registry.sync_all().await;
        summary
    }
}
