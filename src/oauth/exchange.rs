//! OAuth token exchange logic.
//!
//! Handles the two grants this client uses: authorization code (with PKCE
//! verifier) and refresh token.

use super::OAuthProviderConfig;
use serde::Deserialize;
use tracing::debug;

/// A grant presented to the token endpoint.
pub enum TokenGrant<'a> {
    /// First exchange after the user completed the browser flow
    AuthorizationCode { code: &'a str, verifier: &'a str },
    /// Mint a new access token from a stored refresh token
    RefreshToken { refresh_token: &'a str },
}

impl TokenGrant<'_> {
    fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::AuthorizationCode { .. } => "authorization_code",
            TokenGrant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Tokens issued by a successful exchange.
#[derive(Clone, PartialEq)]
pub struct IssuedTokens {
    pub access_token: String,
    /// Absent when the server did not rotate the refresh token
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Token endpoint failure.
#[derive(Debug)]
pub enum ExchangeError {
    /// Server answered with a non-success status
    Rejected { status: u16 },
    /// Request never completed (connect error, timeout)
    Transport(reqwest::Error),
    /// 2xx response whose body is not a token response
    InvalidResponse(String),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Rejected { status } => {
                write!(f, "Token exchange rejected with status {}", status)
            }
            ExchangeError::Transport(e) => write!(f, "Token exchange request failed: {}", e),
            ExchangeError::InvalidResponse(msg) => {
                write!(f, "Invalid token exchange response: {}", msg)
            }
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExchangeError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Presents a grant to the token endpoint.
///
/// The client's own timeout bounds the call; a timeout surfaces as
/// [`ExchangeError::Transport`].
pub async fn exchange_token(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    grant: TokenGrant<'_>,
) -> Result<IssuedTokens, ExchangeError> {
    let mut form: Vec<(&str, &str)> = vec![("grant_type", grant.grant_type())];
    match &grant {
        TokenGrant::AuthorizationCode { code, verifier } => {
            form.push(("code", *code));
            form.push(("code_verifier", *verifier));
            form.push(("client_id", config.client_id.as_str()));
            form.push(("redirect_uri", config.redirect_uri.as_str()));
        }
        TokenGrant::RefreshToken { refresh_token } => {
            form.push(("refresh_token", *refresh_token));
            form.push(("client_id", config.client_id.as_str()));
        }
    }

    debug!(
        grant_type = grant.grant_type(),
        token_url = %config.token_url,
        "Exchanging grant for tokens"
    );

    let response = client
        .post(&config.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(ExchangeError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExchangeError::Rejected {
            status: status.as_u16(),
        });
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

    if token_response.access_token.trim().is_empty() {
        return Err(ExchangeError::InvalidResponse(
            "empty access_token".to_string(),
        ));
    }

    debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token exchange successful"
    );

    Ok(IssuedTokens {
        access_token: token_response.access_token,
        refresh_token: token_response.refresh_token,
        expires_in: token_response.expires_in,
    })
}
