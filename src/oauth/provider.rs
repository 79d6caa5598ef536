//! Authorization server configuration.
//!
//! Describes where the authorization and token endpoints live and how the
//! human-facing authorization URI is composed.

use serde::{Deserialize, Serialize};

/// OAuth configuration for the companion API's authorization server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OAuthProviderConfig {
    /// Authorization endpoint, opened in the user's browser
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Token endpoint for code and refresh grants
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Client ID issued for this application
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    /// Requested scopes, sent space-separated
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Custom-scheme redirect target handled by the redirect helper
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            client_id: String::new(),
            audience: default_audience(),
            scopes: default_scopes(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

fn default_auth_url() -> String {
    "https://auth.frontierstore.net/auth".to_string()
}

fn default_token_url() -> String {
    "https://auth.frontierstore.net/token".to_string()
}

fn default_audience() -> String {
    "all".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["auth".to_string(), "capi".to_string()]
}

fn default_redirect_uri() -> String {
    "edft://redirect".to_string()
}

impl OAuthProviderConfig {
    /// Builds the authorization URI for one attempt.
    pub fn build_authorization_uri(&self, code_challenge: &str, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?audience={}&scope={}&response_type=code&client_id={}\
             &code_challenge={}&code_challenge_method=S256&state={}&redirect_uri={}",
            self.auth_url,
            urlencoding::encode(&self.audience),
            urlencoding::encode(&scopes),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(code_challenge),
            urlencoding::encode(state),
            urlencoding::encode(&self.redirect_uri)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OAuthProviderConfig::default();
        assert_eq!(config.auth_url, "https://auth.frontierstore.net/auth");
        assert_eq!(config.token_url, "https://auth.frontierstore.net/token");
        assert_eq!(config.audience, "all");
        assert_eq!(config.scopes, vec!["auth", "capi"]);
        assert_eq!(config.redirect_uri, "edft://redirect");
        assert!(config.client_id.is_empty());
    }

    #[test]
    fn test_build_authorization_uri() {
        let config = OAuthProviderConfig {
            client_id: "test_client_id".to_string(),
            ..OAuthProviderConfig::default()
        };

        let uri = config.build_authorization_uri("challenge-abc_123", "random-state");

        assert!(uri.starts_with("https://auth.frontierstore.net/auth?"));
        assert!(uri.contains("audience=all"));
        // URL encoding converts spaces to %20
        assert!(uri.contains("scope=auth%20capi"));
        assert!(uri.contains("response_type=code"));
        assert!(uri.contains("client_id=test_client_id"));
        assert!(uri.contains("code_challenge=challenge-abc_123"));
        assert!(uri.contains("code_challenge_method=S256"));
        assert!(uri.contains("state=random-state"));
        assert!(uri.contains("redirect_uri=edft%3A%2F%2Fredirect"));
    }
}
