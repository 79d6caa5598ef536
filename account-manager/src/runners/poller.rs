//! Fixed-cadence resource polling across all accounts.

use super::{refresh_resources, stop_requested};
use crate::registry::Registry;
use crate::session::FetchOutcome;
use fleettrack::config::PollingConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Delay before the first tick after start.
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Counts from one polling tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Sessions whose resources were requested
    pub polled: usize,
    /// Sessions skipped because they need authorization
    pub skipped: usize,
    /// Resources refreshed successfully
    pub updated: usize,
    /// Sessions that fell back to needing authorization this tick
    pub reauthorization_required: usize,
    /// Sessions written to the store at the end of the tick
    pub synced: usize,
    /// Tick ended early on a stop request
    pub interrupted: bool,
}

/// Polling scheduler.
///
/// Each tick visits sessions in registry order, fetching the profile then the
/// fleet carrier for every account not waiting on authorization. One
/// account's failure never stops the tick.
pub struct ResourcePoller {
    registry: Arc<Registry>,
    interval: Duration,
    request_delay: Duration,
    initial_delay: Duration,
}

impl ResourcePoller {
    pub fn new(registry: Arc<Registry>, config: &PollingConfig) -> Self {
        let interval = Duration::from_secs(config.interval_seconds.max(1));
        Self {
            registry,
            interval,
            request_delay: Duration::from_millis(config.inter_request_delay_ms),
            initial_delay: DEFAULT_INITIAL_DELAY.min(interval),
        }
    }

    /// Overrides the delay before the first tick.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Starts the polling loop (non-blocking).
    ///
    /// The loop exits promptly once `shutdown` becomes `true`. A fetch pair
    /// already in flight completes first.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                request_delay_ms = self.request_delay.as_millis() as u64,
                "Starting resource poller"
            );

            let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_requested(&mut shutdown) => break,
                }

                let summary = self.run_tick(&shutdown).await;
                info!(
                    polled = summary.polled,
                    skipped = summary.skipped,
                    updated = summary.updated,
                    reauthorization_required = summary.reauthorization_required,
                    synced = summary.synced,
                    "Polling tick complete"
                );
                if summary.interrupted {
                    break;
                }
            }

            info!("Resource poller stopped");
        })
    }

    /// Runs one tick over every session, then syncs.
    pub async fn run_tick(&self, shutdown: &watch::Receiver<bool>) -> TickSummary {
        let mut summary = TickSummary::default();

        for handle in self.registry.sessions().await {
            if *shutdown.borrow() {
                debug!("Stop requested, ending tick early");
                summary.interrupted = true;
                break;
            }

            let mut session = handle.lock().await;
            if session.auth_required() {
                summary.skipped += 1;
                continue;
            }

            summary.polled += 1;
            let outcomes = refresh_resources(&mut session, self.request_delay).await;
            summary.updated += outcomes
                .iter()
                .filter(|o| **o == FetchOutcome::Updated)
                .count();
            if outcomes.contains(&FetchOutcome::ReauthorizationRequired) {
                summary.reauthorization_required += 1;
            }
        }

        summary.synced = self.registry.sync_all().await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionContext, SessionState};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use fleettrack::config::TrackerConfig;
    use fleettrack::credentials::AccountSnapshot;
    use fleettrack::CredentialStore;

    fn make_registry(server_url: &str, authorized: &[&str], pending: &[&str]) -> Arc<Registry> {
        let key = BASE64.encode([0u8; 32]);
        let store = Arc::new(CredentialStore::new(":memory:", &key).unwrap());
        for identity in authorized {
            store
                .save(&AccountSnapshot {
                    access_token: Some("A"),
                    refresh_token: Some("R"),
                    auth_required: false,
                    ..AccountSnapshot::empty(identity)
                })
                .unwrap();
        }
        for identity in pending {
            store.insert_new(identity).unwrap();
        }

        let mut config = TrackerConfig::default();
        config.api.base_url = server_url.to_string();
        config.oauth.token_url = format!("{}/token", server_url);
        let ctx = Arc::new(SessionContext::new(store, &config).unwrap());
        Arc::new(Registry::load_all(ctx).unwrap())
    }

    fn fast_config() -> PollingConfig {
        PollingConfig {
            interval_seconds: 60,
            inter_request_delay_ms: 0,
            auth_poll_interval_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_tick_polls_authorized_and_skips_pending() {
        let mut server = mockito::Server::new_async().await;
        let profile = server
            .mock("GET", "/profile")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"commander":{"name":"Jameson","credits":10}}"#)
            .expect(2)
            .create_async()
            .await;
        let carrier = server
            .mock("GET", "/fleetcarrier")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"balance":5}"#)
            .expect(2)
            .create_async()
            .await;

        let registry = make_registry(&server.url(), &["Cmdr1", "Cmdr2"], &["Cmdr3"]);
        let poller = ResourcePoller::new(Arc::clone(&registry), &fast_config());
        let (_tx, rx) = watch::channel(false);

        let summary = poller.run_tick(&rx).await;

        profile.assert_async().await;
        carrier.assert_async().await;
        assert_eq!(summary.polled, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.updated, 4);
        assert_eq!(summary.synced, 2);
        assert!(!summary.interrupted);

        let cmdr1 = registry.get("Cmdr1").await.unwrap();
        assert!(cmdr1.lock().await.profile().is_some());
    }

    #[tokio::test]
    async fn test_one_failing_account_does_not_block_others() {
        let mut server = mockito::Server::new_async().await;
        let _profile = server
            .mock("GET", "/profile")
            .with_status(500)
            .create_async()
            .await;
        let _carrier = server
            .mock("GET", "/fleetcarrier")
            .with_status(500)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .with_status(400)
            .expect(2)
            .create_async()
            .await;

        let registry = make_registry(&server.url(), &["Cmdr1", "Cmdr2"], &[]);
        let poller = ResourcePoller::new(Arc::clone(&registry), &fast_config());
        let (_tx, rx) = watch::channel(false);

        let summary = poller.run_tick(&rx).await;

        // Each account tried one refresh, then gave up
        refresh.assert_async().await;
        assert_eq!(summary.polled, 2);
        assert_eq!(summary.reauthorization_required, 2);
        assert_eq!(registry.count_authorized().await, 0);
        for handle in registry.sessions().await {
            assert_eq!(handle.lock().await.state(), SessionState::RefreshFailed);
        }

        // Next tick skips them until re-authorized
        let summary = poller.run_tick(&rx).await;
        assert_eq!(summary.polled, 0);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_tick_stops_between_sessions() {
        let mut server = mockito::Server::new_async().await;
        let profile = server
            .mock("GET", "/profile")
            .expect(0)
            .create_async()
            .await;

        let registry = make_registry(&server.url(), &["Cmdr1"], &[]);
        let poller = ResourcePoller::new(registry, &fast_config());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = poller.run_tick(&rx).await;

        profile.assert_async().await;
        assert!(summary.interrupted);
        assert_eq!(summary.polled, 0);
    }

    #[tokio::test]
    async fn test_stop_mid_pair_finishes_current_account_only() {
        let mut server = mockito::Server::new_async().await;
        let (tx, rx) = watch::channel(false);

        // The stop arrives while the first profile request is being served
        let profile = server
            .mock("GET", "/profile")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                let _ = tx.send(true);
                br#"{"commander":{"name":"Jameson"}}"#.to_vec()
            })
            .expect(1)
            .create_async()
            .await;
        let carrier = server
            .mock("GET", "/fleetcarrier")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"balance":5}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = make_registry(&server.url(), &["Cmdr1", "Cmdr2"], &[]);
        let poller = ResourcePoller::new(Arc::clone(&registry), &fast_config());

        let summary = poller.run_tick(&rx).await;

        profile.assert_async().await;
        carrier.assert_async().await;
        assert!(summary.interrupted);
        assert_eq!(summary.polled, 1);
        assert_eq!(summary.updated, 2);

        let first = registry.get("Cmdr1").await.unwrap().view();
        assert!(first.fleet_carrier.is_some());
        let second = registry.get("Cmdr2").await.unwrap().view();
        assert!(second.profile.is_none());
    }

    #[tokio::test]
    async fn test_start_runs_first_tick_and_stops_on_signal() {
        let mut server = mockito::Server::new_async().await;
        let profile = server
            .mock("GET", "/profile")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"commander":{}}"#)
            .expect(1)
            .create_async()
            .await;
        let _carrier = server
            .mock("GET", "/fleetcarrier")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{}"#)
            .create_async()
            .await;

        let registry = make_registry(&server.url(), &["Cmdr1"], &[]);
        let (tx, rx) = watch::channel(false);
        let handle = ResourcePoller::new(Arc::clone(&registry), &fast_config())
            .with_initial_delay(Duration::from_millis(10))
            .start(rx);

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop within one second")
            .unwrap();
        profile.assert_async().await;
    }
}
