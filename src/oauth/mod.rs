//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! The flow for one account:
//! 1. Generate a PKCE pair (first attempt only) and a fresh state token
//! 2. Compose the authorization URI; the user opens it in a browser
//! 3. The server redirects to `edft://redirect?code=..&state=..`
//! 4. The redirect helper records the code against the matching state token
//! 5. The account exchanges code + verifier for access and refresh tokens
//! 6. Later, the refresh token mints new access tokens

mod callback;
mod exchange;
mod pkce;
mod provider;

pub use callback::{parse_callback, AuthorizationCallback, CallbackError};
pub use exchange::{exchange_token, ExchangeError, IssuedTokens, TokenGrant};
pub use pkce::{
    derive_challenge, generate_pkce_pair, generate_state_token, PkcePair, DEFAULT_VERIFIER_BYTES,
};
pub use provider::OAuthProviderConfig;
