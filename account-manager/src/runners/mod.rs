//! Background tasks driving every session.
//!
//! - [`ResourcePoller`] refreshes cached API data on a fixed cadence
//! - [`AuthorizationWatcher`] issues authorization URIs and completes the
//!   code exchange once the redirect helper delivers a code
//!
//! Both stop when the shared `watch` channel flips to `true`.

mod poller;
mod watcher;

pub use poller::{ResourcePoller, TickSummary};
pub use watcher::{AuthorizationWatcher, WatchSummary};

use crate::session::{FetchOutcome, Resource, Session};
use std::time::Duration;
use tokio::sync::watch;

/// Fetches both resources in order, pausing after each request.
pub async fn refresh_resources(session: &mut Session, request_delay: Duration) -> [FetchOutcome; 2] {
    let mut outcomes = [FetchOutcome::Skipped; 2];
    for (slot, resource) in outcomes
        .iter_mut()
        .zip([Resource::Profile, Resource::FleetCarrier])
    {
        *slot = session.fetch_resource(resource).await;
        if *slot != FetchOutcome::Skipped && !request_delay.is_zero() {
            tokio::time::sleep(request_delay).await;
        }
    }
    outcomes
}

/// Resolves once a stop is requested or the sender is gone.
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
