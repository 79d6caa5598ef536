//! Fleettrack Account Manager - Tracks commander accounts against the
//! companion API.
//!
//! Each tracked account is a [`session::Session`]: it walks through OAuth
//! authorization, keeps its tokens fresh and caches the latest profile and
//! fleet carrier payloads. Everything persists in the fleettrack credential
//! store so a restart resumes where it left off.
//!
//! # Architecture
//!
//! ```text
//!   fleettrack-redirect (browser callback)
//!          ↓ writes auth_code
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! └─────────────────────────────────────────┘
//!          ↑ load / sync
//! ┌─────────────────────────────────────────┐
//! │       Registry (one Session per account) │
//! │  - AuthorizationWatcher                  │
//! │  - ResourcePoller                        │
//! └─────────────────────────────────────────┘
//!          ↓
//!     HTTP API (account table)
//! ```

pub mod api;
pub mod manager;
pub mod registry;
pub mod runners;
pub mod session;
pub mod summary;

pub use manager::AccountManager;
pub use registry::{Registry, RegistryError, SessionGuard, SessionHandle};
pub use session::{Session, SessionContext, SessionError, SessionState};
