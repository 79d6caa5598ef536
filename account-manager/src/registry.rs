//! In-memory collection of every tracked account.
//!
//! Sessions are held behind their own async mutex so network work on one
//! account never blocks another. Lock order is always registry, then session;
//! callers iterate over a snapshot from [`Registry::sessions`] so the registry
//! lock is never held across network calls.
//!
//! Display reads go through [`SessionHandle::view`], a copy published each
//! time the session lock is released. Reading it never waits on a fetch.

use crate::session::{Session, SessionContext, SessionState};
use crate::summary::AccountView;
use anyhow::{Context, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock as ViewLock};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// A session plus its immutable identity and last published view, all
/// readable without taking the session lock.
pub struct SessionHandle {
    identity: String,
    view: ViewLock<AccountView>,
    session: Mutex<Session>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            identity: session.identity().to_string(),
            view: ViewLock::new(AccountView::from_session(&session)),
            session: Mutex::new(session),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Waits for exclusive access. Holding the guard serializes all network
    /// operations for this account; dropping it publishes a fresh view.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self.session.lock().await,
            view: &self.view,
        }
    }

    /// State as of the last released lock.
    pub fn view(&self) -> AccountView {
        match self.view.read() {
            Ok(view) => view.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Exclusive access to one session.
pub struct SessionGuard<'a> {
    session: MutexGuard<'a, Session>,
    view: &'a ViewLock<AccountView>,
}

impl Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let fresh = AccountView::from_session(&self.session);
        match self.view.write() {
            Ok(mut view) => *view = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}

/// Registry mutation failures.
#[derive(Debug)]
pub enum RegistryError {
    /// Identity already tracked (exact, case-sensitive match)
    DuplicateIdentity(String),
    /// No account with this identity
    NotFound(String),
    /// Identity is blank
    InvalidIdentity,
    /// Credential store write failed
    StoreUnavailable(anyhow::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateIdentity(id) => write!(f, "Account '{}' already exists", id),
            RegistryError::NotFound(id) => write!(f, "Account '{}' not found", id),
            RegistryError::InvalidIdentity => write!(f, "Account name must not be blank"),
            RegistryError::StoreUnavailable(e) => {
                write!(f, "Credential store unavailable: {:#}", e)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

pub struct Registry {
    ctx: Arc<SessionContext>,
    sessions: RwLock<Vec<Arc<SessionHandle>>>,
}

impl Registry {
    /// Hydrates one session per stored record, in store order.
    ///
    /// A record that cannot be read is skipped with a warning; unreadable
    /// tokens are handled per record by [`Session::hydrate`].
    pub fn load_all(ctx: Arc<SessionContext>) -> Result<Self> {
        let identities = ctx
            .store
            .list_identities()
            .context("Failed to enumerate stored accounts")?;

        let mut sessions = Vec::with_capacity(identities.len());
        for identity in identities {
            match ctx.store.load(&identity) {
                Ok(Some(row)) => {
                    let session = Session::hydrate(row, Arc::clone(&ctx));
                    sessions.push(Arc::new(SessionHandle::new(session)));
                }
                Ok(None) => debug!(identity = %identity, "Account disappeared during load"),
                Err(e) => warn!(identity = %identity, error = %e, "Skipping unreadable account"),
            }
        }

        info!(count = sessions.len(), "Accounts loaded");
        Ok(Self {
            ctx,
            sessions: RwLock::new(sessions),
        })
    }

    /// Tracks a new account in `NEEDS_SETUP` and creates its stored record.
    pub async fn add(&self, identity: &str) -> Result<Arc<SessionHandle>, RegistryError> {
        if identity.trim().is_empty() {
            return Err(RegistryError::InvalidIdentity);
        }

        let mut sessions = self.sessions.write().await;
        if sessions.iter().any(|h| h.identity() == identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }

        let created = self
            .ctx
            .store
            .insert_new(identity)
            .map_err(RegistryError::StoreUnavailable)?;
        if !created {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }

        let handle = Arc::new(SessionHandle::new(Session::new(
            identity,
            Arc::clone(&self.ctx),
        )));
        sessions.push(Arc::clone(&handle));

        info!(identity = %identity, "Account added");
        Ok(handle)
    }

    /// Destroys the account's session and stored record.
    ///
    /// Waits for any in-flight operation on the account to finish first.
    pub async fn remove(&self, identity: &str) -> Result<(), RegistryError> {
        let handle = self
            .get(identity)
            .await
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))?;

        {
            let mut session = handle.lock().await;
            if session.state() == SessionState::Removed {
                return Err(RegistryError::NotFound(identity.to_string()));
            }
            session.destroy().map_err(|e| match e {
                crate::session::SessionError::StoreUnavailable(e) => {
                    RegistryError::StoreUnavailable(e)
                }
                other => RegistryError::StoreUnavailable(anyhow::Error::new(other)),
            })?;
        }

        self.sessions
            .write()
            .await
            .retain(|h| !Arc::ptr_eq(h, &handle));
        Ok(())
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|h| h.identity() == identity)
            .cloned()
    }

    /// Snapshot of all sessions in registry order.
    pub async fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Number of sessions currently `AUTHORIZED`.
    pub async fn count_authorized(&self) -> usize {
        self.sessions()
            .await
            .iter()
            .filter(|h| h.view().is_authorized())
            .count()
    }

    /// Flushes every dirty session. Failures are logged and the session
    /// stays dirty for the next attempt.
    ///
    /// Returns the number of sessions written.
    pub async fn sync_all(&self) -> usize {
        let mut written = 0;
        for handle in self.sessions().await {
            match handle.lock().await.sync() {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!(identity = %handle.identity(), error = %e, "Failed to sync account"),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use fleettrack::config::TrackerConfig;
    use fleettrack::credentials::AccountSnapshot;
    use fleettrack::CredentialStore;

    fn make_ctx() -> Arc<SessionContext> {
        let key = BASE64.encode([0u8; 32]);
        let store = Arc::new(CredentialStore::new(":memory:", &key).unwrap());
        Arc::new(SessionContext::new(store, &TrackerConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_load_all_empty_store() {
        let registry = Registry::load_all(make_ctx()).unwrap();
        assert!(registry.is_empty().await);
        assert_eq!(registry.count_authorized().await, 0);
    }

    #[tokio::test]
    async fn test_load_all_hydrates_in_store_order() {
        let ctx = make_ctx();
        ctx.store.insert_new("Zeta").unwrap();
        ctx.store
            .save(&AccountSnapshot {
                access_token: Some("A"),
                refresh_token: Some("R"),
                auth_required: false,
                ..AccountSnapshot::empty("Alpha")
            })
            .unwrap();

        let registry = Registry::load_all(Arc::clone(&ctx)).unwrap();
        let names: Vec<String> = registry
            .sessions()
            .await
            .iter()
            .map(|h| h.identity().to_string())
            .collect();

        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(registry.count_authorized().await, 1);
        let zeta = registry.get("Zeta").await.unwrap();
        assert_eq!(zeta.lock().await.state(), SessionState::NeedsSetup);
    }

    #[tokio::test]
    async fn test_add_creates_session_and_record() {
        let ctx = make_ctx();
        let registry = Registry::load_all(Arc::clone(&ctx)).unwrap();

        let handle = registry.add("Cmdr1").await.unwrap();

        assert_eq!(handle.identity(), "Cmdr1");
        assert_eq!(handle.lock().await.state(), SessionState::NeedsSetup);
        assert_eq!(registry.len().await, 1);
        assert!(ctx.store.load("Cmdr1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_duplicate_fails() {
        let registry = Registry::load_all(make_ctx()).unwrap();
        registry.add("X").await.unwrap();

        let result = registry.add("X").await;
        assert!(matches!(result, Err(RegistryError::DuplicateIdentity(ref id)) if id == "X"));
        assert_eq!(registry.len().await, 1);

        // Exact match only
        registry.add("x").await.unwrap();
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_add_blank_fails() {
        let registry = Registry::load_all(make_ctx()).unwrap();
        assert!(matches!(registry.add("").await, Err(RegistryError::InvalidIdentity)));
        assert!(matches!(registry.add("   ").await, Err(RegistryError::InvalidIdentity)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_clears_registry_and_store() {
        let ctx = make_ctx();
        let registry = Registry::load_all(Arc::clone(&ctx)).unwrap();
        let handle = registry.add("X").await.unwrap();

        registry.remove("X").await.unwrap();

        assert!(registry.is_empty().await);
        assert!(ctx.store.load("X").unwrap().is_none());
        assert_eq!(handle.lock().await.state(), SessionState::Removed);
    }

    #[tokio::test]
    async fn test_remove_missing_fails() {
        let registry = Registry::load_all(make_ctx()).unwrap();
        assert!(matches!(
            registry.remove("Nobody").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_view_is_readable_while_session_is_locked() {
        let registry = Registry::load_all(make_ctx()).unwrap();
        let handle = registry.add("Cmdr1").await.unwrap();

        let mut session = handle.lock().await;
        session.begin_authorization().unwrap();

        // Still the view from before the lock was taken
        let view = handle.view();
        assert_eq!(view.state, SessionState::NeedsSetup);
        assert!(view.authorization_uri.is_none());
        assert_eq!(registry.count_authorized().await, 0);

        drop(session);
        let view = handle.view();
        assert_eq!(view.state, SessionState::AwaitingAuth);
        assert!(view.auth_prompted);
        assert!(view.authorization_uri.is_some());
    }

    #[tokio::test]
    async fn test_sync_all_skips_clean_sessions() {
        let ctx = make_ctx();
        ctx.store.insert_new("Cmdr1").unwrap();
        ctx.store.insert_new("Cmdr2").unwrap();
        let registry = Registry::load_all(Arc::clone(&ctx)).unwrap();

        // Nothing dirty after a clean load
        assert_eq!(registry.sync_all().await, 0);

        let handle = registry.get("Cmdr1").await.unwrap();
        handle.lock().await.begin_authorization().unwrap();
        // begin_authorization persists directly and leaves the session clean
        assert_eq!(registry.sync_all().await, 0);
    }
}
