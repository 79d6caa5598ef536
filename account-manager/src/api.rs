//! Account Manager HTTP API.
//!
//! Exposes five routes:
//! - `GET /api/accounts` - every account with its display columns
//! - `POST /api/accounts` - start tracking a new account
//! - `DELETE /api/accounts/:identity` - stop tracking an account
//! - `POST /api/accounts/:identity/authorize` - obtain an authorization URI
//! - `POST /api/accounts/:identity/refresh` - fetch both resources now

use crate::registry::{Registry, RegistryError};
use crate::runners::refresh_resources;
use crate::session::{FetchOutcome, SessionError, SessionState};
use crate::summary::{liquid_assets, AccountView, Column};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared state for the account API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    /// Pause between the two requests of a manual refresh
    pub request_delay: Duration,
}

/// Request body for `POST /api/accounts`.
#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub identity: String,
}

#[derive(Serialize)]
pub struct CreateAccountResponse {
    pub identity: String,
    pub state: SessionState,
}

#[derive(Serialize)]
pub struct ColumnValue {
    pub key: &'static str,
    pub header: &'static str,
    pub value: String,
}

/// A single entry in the `GET /api/accounts` response.
#[derive(Serialize)]
pub struct AccountInfo {
    pub identity: String,
    pub state: SessionState,
    pub auth_required: bool,
    pub auth_prompted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<String>,
    pub columns: Vec<ColumnValue>,
}

#[derive(Serialize)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountInfo>,
    /// Accounts currently `AUTHORIZED`
    pub authorized: usize,
    /// Credits plus carrier balances over authorized accounts
    pub liquid_assets: f64,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub authorization_uri: String,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub identity: String,
    pub state: SessionState,
    pub profile: FetchOutcome,
    pub fleetcarrier: FetchOutcome,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

/// Reads published views only, so a slow fetch never stalls the listing.
async fn list_accounts(State(state): State<Arc<ApiState>>) -> Json<AccountListResponse> {
    let views: Vec<AccountView> = state
        .registry
        .sessions()
        .await
        .iter()
        .map(|handle| handle.view())
        .collect();

    let accounts = views
        .iter()
        .map(|view| AccountInfo {
            identity: view.identity.clone(),
            state: view.state,
            auth_required: view.auth_required,
            auth_prompted: view.auth_prompted,
            authorization_uri: view.authorization_uri.clone(),
            last_refreshed_at: view.last_refreshed_at.map(|t| t.to_rfc3339()),
            columns: Column::ALL
                .iter()
                .map(|c| ColumnValue {
                    key: c.key(),
                    header: c.header(),
                    value: c.value(view),
                })
                .collect(),
        })
        .collect();

    Json(AccountListResponse {
        accounts,
        authorized: views.iter().filter(|v| v.is_authorized()).count(),
        liquid_assets: liquid_assets(&views),
    })
}

async fn create_account(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), AppError> {
    let handle = state.registry.add(&req.identity).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            identity: handle.identity().to_string(),
            state: handle.view().state,
        }),
    ))
}

async fn delete_account(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.remove(&identity).await?;
    info!(identity = %identity, "Account removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Issues a URI when the account needs one, or returns the outstanding one.
async fn authorize_account(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let handle = state
        .registry
        .get(&identity)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Account '{}' not found", identity)))?;
    let mut session = handle.lock().await;

    if session.state() == SessionState::AwaitingAuth {
        if let Some(uri) = session.authorization_uri() {
            return Ok(Json(AuthorizeResponse {
                authorization_uri: uri.to_string(),
            }));
        }
    }

    let authorization_uri = session.begin_authorization()?;
    Ok(Json(AuthorizeResponse { authorization_uri }))
}

async fn refresh_account(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<RefreshResponse>, AppError> {
    let handle = state
        .registry
        .get(&identity)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Account '{}' not found", identity)))?;
    let mut session = handle.lock().await;

    if session.auth_required() {
        return Err(AppError::Conflict(format!(
            "Account '{}' must be authorized first",
            identity
        )));
    }

    let [profile, fleetcarrier] = refresh_resources(&mut session, state.request_delay).await;
    if let Err(e) = session.sync() {
        warn!(identity = %identity, error = %e, "Failed to sync after manual refresh");
    }

    Ok(Json(RefreshResponse {
        identity,
        state: session.state(),
        profile,
        fleetcarrier,
    }))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidIdentity => AppError::BadRequest(e.to_string()),
            RegistryError::NotFound(_) => AppError::NotFound(e.to_string()),
            RegistryError::DuplicateIdentity(_) => AppError::Conflict(e.to_string()),
            RegistryError::StoreUnavailable(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidState { .. } => AppError::Conflict(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: msg })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/:identity", delete(delete_account))
        .route("/api/accounts/:identity/authorize", post(authorize_account))
        .route("/api/accounts/:identity/refresh", post(refresh_account))
        .with_state(Arc::new(state))
}
