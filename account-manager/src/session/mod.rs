//! Per-account authentication and data state.
//!
//! A [`Session`] owns one account's authorization material, tokens and cached
//! API payloads. Network failures never escape as errors to the polling
//! loop; they become state transitions.
//!
//! ```text
//! NEEDS_SETUP ──begin_authorization──▶ AWAITING_AUTH ──exchange(INITIAL)──▶ AUTHORIZED
//!                                          ▲                                 │   ▲
//!                                          │                 refresh fails   │   │ exchange(REFRESH)
//!                                          └──begin_authorization── REFRESH_FAILED ◀┘
//!
//! any state ──destroy──▶ REMOVED
//! ```

mod context;


pub use context::SessionContext;

use chrono::{DateTime, Utc};
use fleettrack::credentials::{AccountSnapshot, StoredAccount};
use fleettrack::oauth::{
    self, exchange_token, ExchangeError, IssuedTokens, TokenGrant, DEFAULT_VERIFIER_BYTES,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a session stands in the authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NeedsSetup,
    AwaitingAuth,
    Authorized,
    RefreshFailed,
    Removed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::NeedsSetup => "NEEDS_SETUP",
            SessionState::AwaitingAuth => "AWAITING_AUTH",
            SessionState::Authorized => "AUTHORIZED",
            SessionState::RefreshFailed => "REFRESH_FAILED",
            SessionState::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Which grant `exchange_tokens` presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Initial,
    Refresh,
}

/// The two companion API resources tracked per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Commander profile (`/profile`)
    Profile,
    /// Fleet carrier (`/fleetcarrier`)
    FleetCarrier,
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Profile => "profile",
            Resource::FleetCarrier => "fleetcarrier",
        }
    }
}

/// Result of one `fetch_resource` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Cache replaced with a fresh payload
    Updated,
    /// Session not authorized; nothing was sent
    Skipped,
    /// Retry ceiling reached or refresh failed; the account needs the user
    ReauthorizationRequired,
}

/// Failures reported by session operations.
#[derive(Debug)]
pub enum SessionError {
    /// Token endpoint rejected the grant; only the user can recover
    AuthorizationExpired(ExchangeError),
    /// INITIAL exchange attempted before the redirect delivered a code
    MissingAuthorizationCode,
    /// REFRESH exchange attempted without a refresh token
    MissingRefreshToken,
    /// Operation not valid from the current state
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// Credential store unreachable; in-memory state is kept
    StoreUnavailable(anyhow::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AuthorizationExpired(e) => {
                write!(f, "Authorization expired: {}", e)
            }
            SessionError::MissingAuthorizationCode => {
                write!(f, "No authorization code has been received")
            }
            SessionError::MissingRefreshToken => write!(f, "No refresh token available"),
            SessionError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while session is {}", operation, state)
            }
            SessionError::StoreUnavailable(e) => write!(f, "Credential store unavailable: {:#}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::AuthorizationExpired(e) => Some(e),
            SessionError::StoreUnavailable(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// One tracked account.
pub struct Session {
    identity: String,
    state: SessionState,
    state_token: Option<String>,
    auth_code: Option<String>,
    pkce_challenge: Option<String>,
    pkce_verifier: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    auth_required: bool,
    auth_prompted: bool,
    dirty: bool,
    profile: Option<Value>,
    fleet_carrier: Option<Value>,
    retry_count: u32,
    authorization_uri: Option<String>,
    last_refreshed_at: Option<DateTime<Utc>>,
    ctx: Arc<SessionContext>,
}

impl Session {
    /// Creates a session for a newly added account.
    pub fn new(identity: impl Into<String>, ctx: Arc<SessionContext>) -> Self {
        Self {
            identity: identity.into(),
            state: SessionState::NeedsSetup,
            state_token: None,
            auth_code: None,
            pkce_challenge: None,
            pkce_verifier: None,
            access_token: None,
            refresh_token: None,
            auth_required: true,
            auth_prompted: false,
            dirty: false,
            profile: None,
            fleet_carrier: None,
            retry_count: 0,
            authorization_uri: None,
            last_refreshed_at: None,
            ctx,
        }
    }

    /// Rebuilds a session from its stored row.
    ///
    /// A row whose tokens cannot be decrypted comes back without tokens and
    /// flagged for re-authorization; the rest of the load is unaffected.
    pub fn hydrate(row: StoredAccount, ctx: Arc<SessionContext>) -> Self {
        let mut dirty = false;
        let mut auth_required = row.auth_required;

        let tokens = match ctx.store.decrypt_tokens(&row) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    identity = %row.identity,
                    error = %e,
                    "Stored tokens unreadable, account needs re-authorization"
                );
                auth_required = true;
                dirty = true;
                Default::default()
            }
        };

        let profile = parse_cache(&row.identity, Resource::Profile, row.resource_cache_a.as_deref());
        let fleet_carrier = parse_cache(
            &row.identity,
            Resource::FleetCarrier,
            row.resource_cache_b.as_deref(),
        );

        let has_access = tokens
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let state = if has_access && !auth_required {
            SessionState::Authorized
        } else if row.pkce_challenge.is_none() || row.pkce_verifier.is_none() {
            SessionState::NeedsSetup
        } else {
            SessionState::RefreshFailed
        };
        if state != SessionState::Authorized && !auth_required {
            auth_required = true;
            dirty = true;
        }

        debug!(identity = %row.identity, state = %state, "Hydrated session");

        Self {
            identity: row.identity,
            state,
            state_token: row.state_token,
            auth_code: None,
            pkce_challenge: row.pkce_challenge,
            pkce_verifier: row.pkce_verifier,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            auth_required,
            // A URI issued before a restart is never reused
            auth_prompted: false,
            dirty,
            profile,
            fleet_carrier,
            retry_count: 0,
            authorization_uri: None,
            last_refreshed_at: None,
            ctx,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn auth_required(&self) -> bool {
        self.auth_required
    }

    pub fn auth_prompted(&self) -> bool {
        self.auth_prompted
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_authorization_code(&self) -> bool {
        self.auth_code.is_some()
    }

    /// The last authorization URI issued, while it is still outstanding.
    pub fn authorization_uri(&self) -> Option<&str> {
        self.authorization_uri.as_deref()
    }

    pub fn state_token(&self) -> Option<&str> {
        self.state_token.as_deref()
    }

    pub fn pkce_challenge(&self) -> Option<&str> {
        self.pkce_challenge.as_deref()
    }

    pub fn profile(&self) -> Option<&Value> {
        self.profile.as_ref()
    }

    pub fn fleet_carrier(&self) -> Option<&Value> {
        self.fleet_carrier.as_ref()
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at
    }

    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// Starts a new authorization attempt and returns the URI to open.
    ///
    /// Every attempt gets a fresh state token. The PKCE pair is generated on
    /// the first attempt only and reused afterwards.
    pub fn begin_authorization(&mut self) -> Result<String, SessionError> {
        if !matches!(
            self.state,
            SessionState::NeedsSetup | SessionState::RefreshFailed
        ) {
            return Err(SessionError::InvalidState {
                operation: "begin authorization",
                state: self.state,
            });
        }

        let state_token = oauth::generate_state_token();
        let (challenge, verifier) = match (&self.pkce_challenge, &self.pkce_verifier) {
            (Some(c), Some(v)) => (c.clone(), v.clone()),
            _ => {
                let pair = oauth::generate_pkce_pair(DEFAULT_VERIFIER_BYTES);
                (pair.challenge, pair.verifier)
            }
        };

        self.ctx
            .store
            .save_authorization_attempt(&self.identity, &state_token, &challenge, &verifier)
            .map_err(SessionError::StoreUnavailable)?;

        let uri = self
            .ctx
            .oauth
            .build_authorization_uri(&challenge, &state_token);

        self.state_token = Some(state_token);
        self.pkce_challenge = Some(challenge);
        self.pkce_verifier = Some(verifier);
        self.auth_code = None;
        self.auth_required = true;
        self.auth_prompted = true;
        self.authorization_uri = Some(uri.clone());
        self.state = SessionState::AwaitingAuth;

        info!(identity = %self.identity, "Authorization URI issued");
        Ok(uri)
    }

    /// Stores the code delivered by the redirect helper for the next exchange.
    pub fn set_authorization_code(&mut self, code: impl Into<String>) {
        let code = code.into();
        if code.is_empty() {
            return;
        }
        self.auth_code = Some(code);
    }

    /// Picks up a code the redirect helper wrote for this account.
    ///
    /// Returns `true` when a code is now held in memory.
    pub fn check_for_authorization_code(&mut self) -> Result<bool, SessionError> {
        if self.auth_code.is_some() {
            return Ok(true);
        }
        if !self.auth_prompted {
            return Ok(false);
        }

        let code = self
            .ctx
            .store
            .pending_authorization_code(&self.identity)
            .map_err(SessionError::StoreUnavailable)?;

        match code {
            Some(code) => {
                debug!(identity = %self.identity, "Authorization code received");
                self.set_authorization_code(code);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Withdraws the outstanding authorization URI so a new one can be issued.
    pub fn clear_authorization_prompt(&mut self) {
        if !self.auth_prompted {
            return;
        }
        self.auth_prompted = false;
        self.authorization_uri = None;
        self.dirty = true;
    }

    /// Presents the authorization code or the refresh token to the token endpoint.
    pub async fn exchange_tokens(&mut self, kind: ExchangeKind) -> Result<(), SessionError> {
        if self.state == SessionState::Removed {
            return Err(SessionError::InvalidState {
                operation: "exchange tokens",
                state: self.state,
            });
        }

        let result = match kind {
            ExchangeKind::Initial => {
                let code = self
                    .auth_code
                    .as_deref()
                    .ok_or(SessionError::MissingAuthorizationCode)?;
                let verifier =
                    self.pkce_verifier
                        .as_deref()
                        .ok_or(SessionError::InvalidState {
                            operation: "exchange an authorization code",
                            state: self.state,
                        })?;
                exchange_token(
                    &self.ctx.http,
                    &self.ctx.oauth,
                    TokenGrant::AuthorizationCode { code, verifier },
                )
                .await
            }
            ExchangeKind::Refresh => {
                let refresh_token = self
                    .refresh_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(SessionError::MissingRefreshToken)?;
                exchange_token(
                    &self.ctx.http,
                    &self.ctx.oauth,
                    TokenGrant::RefreshToken { refresh_token },
                )
                .await
            }
        };

        match result {
            Ok(tokens) => {
                self.adopt_tokens(kind, tokens);
                info!(identity = %self.identity, kind = ?kind, "Token exchange succeeded");
                Ok(())
            }
            Err(e) => {
                warn!(
                    identity = %self.identity,
                    kind = ?kind,
                    error = %e,
                    "Token exchange failed, account needs re-authorization"
                );
                if kind == ExchangeKind::Initial {
                    // Codes are single-use
                    self.auth_code = None;
                }
                self.auth_required = true;
                self.state = SessionState::RefreshFailed;
                self.dirty = true;
                Err(SessionError::AuthorizationExpired(e))
            }
        }
    }

    fn adopt_tokens(&mut self, kind: ExchangeKind, tokens: IssuedTokens) {
        self.access_token = Some(tokens.access_token);
        // Keep the existing refresh token if the server did not rotate it
        if let Some(refresh_token) = tokens.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if kind == ExchangeKind::Initial {
            self.auth_code = None;
            self.auth_prompted = false;
            self.authorization_uri = None;
        }
        self.auth_required = false;
        self.state = SessionState::Authorized;
        self.dirty = true;
    }

    /// Fetches one resource and replaces its cache.
    ///
    /// A failed request gets at most one refresh-and-retry. A second failure
    /// flags the account for re-authorization.
    pub async fn fetch_resource(&mut self, resource: Resource) -> FetchOutcome {
        loop {
            if !self.is_authorized() {
                return FetchOutcome::Skipped;
            }
            let access_token = match self.access_token.as_deref() {
                Some(t) if !t.trim().is_empty() => t.to_string(),
                _ => return FetchOutcome::Skipped,
            };

            match self.request_resource(resource, &access_token).await {
                Ok(payload) => {
                    match resource {
                        Resource::Profile => self.profile = Some(payload),
                        Resource::FleetCarrier => self.fleet_carrier = Some(payload),
                    }
                    self.retry_count = 0;
                    self.dirty = true;
                    self.last_refreshed_at = Some(Utc::now());
                    debug!(identity = %self.identity, resource = resource.name(), "Resource updated");
                    return FetchOutcome::Updated;
                }
                Err(e) => {
                    self.retry_count += 1;
                    warn!(
                        identity = %self.identity,
                        resource = resource.name(),
                        attempt = self.retry_count,
                        error = %e,
                        "Resource fetch failed"
                    );

                    if self.retry_count > 1 {
                        self.require_reauthorization();
                        return FetchOutcome::ReauthorizationRequired;
                    }

                    if let Err(e) = self.exchange_tokens(ExchangeKind::Refresh).await {
                        debug!(identity = %self.identity, error = %e, "Refresh before retry failed");
                        self.require_reauthorization();
                        return FetchOutcome::ReauthorizationRequired;
                    }
                }
            }
        }
    }

    async fn request_resource(&self, resource: Resource, access_token: &str) -> anyhow::Result<Value> {
        let url = match resource {
            Resource::Profile => self.ctx.api.profile_url(),
            Resource::FleetCarrier => self.ctx.api.fleetcarrier_url(),
        };

        let response = self
            .ctx
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned status {}", resource.name(), status);
        }

        let payload: Value = response.json().await?;
        if !payload.is_object() {
            anyhow::bail!("{} did not return a JSON object", resource.name());
        }
        Ok(payload)
    }

    fn require_reauthorization(&mut self) {
        self.retry_count = 0;
        self.auth_required = true;
        if self.state != SessionState::Removed {
            self.state = SessionState::RefreshFailed;
        }
        self.dirty = true;
        info!(identity = %self.identity, "Account flagged for re-authorization");
    }

    /// Flushes the session to the store if it is dirty.
    ///
    /// Returns whether a write happened. On failure the session stays dirty.
    pub fn sync(&mut self) -> Result<bool, SessionError> {
        if !self.dirty || self.state == SessionState::Removed {
            return Ok(false);
        }

        let snapshot = AccountSnapshot {
            identity: &self.identity,
            state_token: self.state_token.as_deref(),
            pkce_challenge: self.pkce_challenge.as_deref(),
            pkce_verifier: self.pkce_verifier.as_deref(),
            access_token: self.access_token.as_deref(),
            refresh_token: self.refresh_token.as_deref(),
            auth_required: self.auth_required,
            auth_prompted: self.auth_prompted,
            resource_cache_a: self.profile.as_ref(),
            resource_cache_b: self.fleet_carrier.as_ref(),
        };

        self.ctx
            .store
            .save(&snapshot)
            .map_err(SessionError::StoreUnavailable)?;

        self.dirty = false;
        debug!(identity = %self.identity, "Session synced");
        Ok(true)
    }

    /// Deletes the stored record. The session is terminal afterwards.
    pub fn destroy(&mut self) -> Result<(), SessionError> {
        let existed = self
            .ctx
            .store
            .delete(&self.identity)
            .map_err(SessionError::StoreUnavailable)?;
        if !existed {
            debug!(identity = %self.identity, "No stored record to delete");
        }

        self.state = SessionState::Removed;
        self.access_token = None;
        self.refresh_token = None;
        self.auth_code = None;
        self.authorization_uri = None;
        self.dirty = false;

        info!(identity = %self.identity, "Session removed");
        Ok(())
    }
}

fn parse_cache(identity: &str, resource: Resource, text: Option<&str>) -> Option<Value> {
    let text = text.filter(|t| !t.trim().is_empty())?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                identity = %identity,
                resource = resource.name(),
                error = %e,
                "Discarding unreadable cached payload"
            );
            None
        }
    }
}
