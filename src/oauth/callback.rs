//! Parsing of the redirect the authorization server sends the browser to.
//!
//! The operating system hands the custom-scheme URI
//! (`edft://redirect?code=..&state=..`) to the redirect helper, which
//! extracts the code and state pair here.

use serde::Deserialize;

/// OAuth callback query parameters
#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Code and state delivered by a successful redirect.
#[derive(Clone, PartialEq)]
pub struct AuthorizationCallback {
    pub code: String,
    pub state: String,
}

impl std::fmt::Debug for AuthorizationCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCallback")
            .field("code", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackError {
    /// URI does not start with the configured redirect target
    UnexpectedTarget(String),
    /// Query string could not be decoded
    Malformed(String),
    /// The user or server declined the authorization
    Denied {
        error: String,
        description: Option<String>,
    },
    /// Required parameter absent or empty
    MissingParameter(&'static str),
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackError::UnexpectedTarget(uri) => {
                write!(f, "Callback URI '{}' does not match the redirect target", uri)
            }
            CallbackError::Malformed(msg) => write!(f, "Malformed callback query: {}", msg),
            CallbackError::Denied { error, description } => match description {
                Some(d) => write!(f, "Authorization denied: {} ({})", error, d),
                None => write!(f, "Authorization denied: {}", error),
            },
            CallbackError::MissingParameter(name) => {
                write!(f, "Callback is missing '{}'", name)
            }
        }
    }
}

impl std::error::Error for CallbackError {}

/// Extracts the code and state from a redirect URI.
///
/// `redirect_uri` is the configured target (for example `edft://redirect`);
/// a trailing slash before the query is tolerated.
pub fn parse_callback(uri: &str, redirect_uri: &str) -> Result<AuthorizationCallback, CallbackError> {
    let uri = uri.trim();
    let rest = uri
        .strip_prefix(redirect_uri)
        .ok_or_else(|| CallbackError::UnexpectedTarget(uri.to_string()))?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let query = rest
        .strip_prefix('?')
        .ok_or(CallbackError::MissingParameter("code"))?;
    // Fragments are never part of the query
    let query = query.split('#').next().unwrap_or_default();

    let params: CallbackQuery =
        serde_urlencoded::from_str(query).map_err(|e| CallbackError::Malformed(e.to_string()))?;

    if let Some(error) = params.error {
        return Err(CallbackError::Denied {
            error,
            description: params.error_description,
        });
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(CallbackError::MissingParameter("code"))?;
    let state = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or(CallbackError::MissingParameter("state"))?;

    Ok(AuthorizationCallback { code, state })
}
