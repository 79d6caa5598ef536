// Encrypted account storage (SQLite + AES-256-GCM)
pub mod credentials;

// PKCE, authorization URIs, token grants, redirect parsing
pub mod oauth;

// TOML configuration and environment overrides
pub mod config;

// Console and rolling file log output for the binaries
pub mod logging;

pub use config::TrackerConfig;
pub use credentials::CredentialStore;
