//! Encrypted account storage.
//!
//! One SQLite row per tracked account holds its identity, PKCE material,
//! authorization flags, encrypted tokens and the last cached API payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - one row per account identity          │
//! │  - tokens sealed before every write      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt on hydration)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM                           │
//! │  - nonce || ciphertext blobs             │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database (accounts table)   │
//! │  - shared with the redirect helper       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use fleettrack::credentials::{AccountSnapshot, CredentialStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryption_key = std::env::var("FLEETTRACK_ENCRYPTION_KEY")?;
//! let store = CredentialStore::new("fleettrack.db", &encryption_key)?;
//!
//! store.insert_new("Cmdr1")?;
//! store.save(&AccountSnapshot {
//!     identity: "Cmdr1",
//!     access_token: Some("access"),
//!     refresh_token: Some("refresh"),
//!     ..AccountSnapshot::empty("Cmdr1")
//! })?;
//!
//! for identity in store.list_identities()? {
//!     if let Some(row) = store.load(&identity)? {
//!         let tokens = store.decrypt_tokens(&row);
//!         println!("{}: tokens readable = {}", identity, tokens.is_ok());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, validate_key, DecryptionError};
pub use storage::CredentialStore;

/// A raw `accounts` row. Token columns are still sealed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredAccount {
    pub identity: String,
    pub state_token: Option<String>,
    pub auth_code: Option<String>,
    pub pkce_challenge: Option<String>,
    pub pkce_verifier: Option<String>,
    pub access_token: Option<Vec<u8>>,
    pub refresh_token: Option<Vec<u8>>,
    pub auth_required: bool,
    pub auth_prompted: bool,
    pub resource_cache_a: Option<String>,
    pub resource_cache_b: Option<String>,
}

/// Cleartext tokens recovered from a [`StoredAccount`].
#[derive(Clone, Default, PartialEq)]
pub struct Tokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything `sync()` writes for one account.
///
/// The authorization code is not part of the snapshot: a flush always clears it.
#[derive(Clone)]
pub struct AccountSnapshot<'a> {
    pub identity: &'a str,
    pub state_token: Option<&'a str>,
    pub pkce_challenge: Option<&'a str>,
    pub pkce_verifier: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
    pub auth_required: bool,
    pub auth_prompted: bool,
    pub resource_cache_a: Option<&'a Value>,
    pub resource_cache_b: Option<&'a Value>,
}

impl<'a> AccountSnapshot<'a> {
    /// Snapshot of an account that has never been authorized.
    pub fn empty(identity: &'a str) -> Self {
        Self {
            identity,
            state_token: None,
            pkce_challenge: None,
            pkce_verifier: None,
            access_token: None,
            refresh_token: None,
            auth_required: true,
            auth_prompted: false,
            resource_cache_a: None,
            resource_cache_b: None,
        }
    }
}
