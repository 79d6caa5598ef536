//! Encrypted account storage using SQLite.
//!
//! Stores one row per tracked account. Access and refresh tokens are sealed
//! with AES-256-GCM before they reach the database.

use super::{encryption, AccountSnapshot, DecryptionError, StoredAccount, Tokens};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a write waits for the redirect helper to release the database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Encrypted account storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE accounts (
///     identity TEXT PRIMARY KEY,   -- human-chosen account name
///     state_token TEXT,            -- anti-CSRF nonce of the current attempt
///     auth_code TEXT,              -- written by the redirect helper, cleared on sync
///     pkce_challenge TEXT,
///     pkce_verifier TEXT,
///     access_token BLOB,           -- Encrypted
///     refresh_token BLOB,          -- Encrypted
///     auth_required INTEGER NOT NULL,
///     auth_prompted INTEGER NOT NULL,
///     resource_cache_a TEXT,       -- last profile payload (JSON)
///     resource_cache_b TEXT        -- last fleet carrier payload (JSON)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex, so writes from this process never interleave
/// - `busy_timeout` makes writes wait for the redirect helper instead of failing
pub struct CredentialStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
    writes: AtomicU64,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set database busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                identity TEXT PRIMARY KEY,
                state_token TEXT,
                auth_code TEXT,
                pkce_challenge TEXT,
                pkce_verifier TEXT,
                access_token BLOB,
                refresh_token BLOB,
                auth_required INTEGER NOT NULL,
                auth_prompted INTEGER NOT NULL,
                resource_cache_a TEXT,
                resource_cache_b TEXT
            )
            "#,
            [],
        )
        .context("Failed to create accounts table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
            writes: AtomicU64::new(0),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store connection lock poisoned"))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful writes issued through this handle.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Lists every stored identity in table order.
    pub fn list_identities(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT identity FROM accounts ORDER BY rowid")
            .context("Failed to prepare query")?;

        let identities = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(identities)
    }

    /// Reads the raw row for an identity. Tokens stay encrypted.
    pub fn load(&self, identity: &str) -> Result<Option<StoredAccount>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT identity, state_token, auth_code, pkce_challenge, pkce_verifier,
                   access_token, refresh_token, auth_required, auth_prompted,
                   resource_cache_a, resource_cache_b
            FROM accounts
            WHERE identity = ?1
            "#,
            params![identity],
            |row| {
                Ok(StoredAccount {
                    identity: row.get(0)?,
                    state_token: row.get(1)?,
                    auth_code: row.get(2)?,
                    pkce_challenge: row.get(3)?,
                    pkce_verifier: row.get(4)?,
                    access_token: row.get(5)?,
                    refresh_token: row.get(6)?,
                    auth_required: row.get(7)?,
                    auth_prompted: row.get(8)?,
                    resource_cache_a: row.get(9)?,
                    resource_cache_b: row.get(10)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("Failed to load account '{}'", identity))
    }

    /// Opens the sealed token columns of a row.
    pub fn decrypt_tokens(&self, row: &StoredAccount) -> Result<Tokens, DecryptionError> {
        let open = |blob: &Option<Vec<u8>>| {
            blob.as_deref()
                .map(|b| encryption::decrypt(b, &self.encryption_key))
                .transpose()
        };

        Ok(Tokens {
            access_token: open(&row.access_token)?,
            refresh_token: open(&row.refresh_token)?,
        })
    }

    /// Creates the row for a newly added account.
    ///
    /// Returns `false` if a row for the identity already exists.
    pub fn insert_new(&self, identity: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                INSERT INTO accounts (identity, auth_required, auth_prompted)
                VALUES (?1, 1, 0)
                ON CONFLICT(identity) DO NOTHING
                "#,
                params![identity],
            )
            .context("Failed to insert account")?;

        self.record_write();
        Ok(rows > 0)
    }

    /// Persists a freshly issued authorization attempt.
    ///
    /// Both flags are set: the account needs authorization and a URI is out.
    /// Any code left over from an earlier attempt is discarded.
    pub fn save_authorization_attempt(
        &self,
        identity: &str,
        state_token: &str,
        pkce_challenge: &str,
        pkce_verifier: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO accounts (
                    identity, state_token, pkce_challenge, pkce_verifier,
                    auth_required, auth_prompted
                )
                VALUES (?1, ?2, ?3, ?4, 1, 1)
                ON CONFLICT(identity) DO UPDATE SET
                    state_token = excluded.state_token,
                    pkce_challenge = excluded.pkce_challenge,
                    pkce_verifier = excluded.pkce_verifier,
                    auth_code = NULL,
                    auth_required = 1,
                    auth_prompted = 1
                "#,
                params![identity, state_token, pkce_challenge, pkce_verifier],
            )
            .context("Failed to store authorization attempt")?;

        self.record_write();
        Ok(())
    }

    /// Writes an account snapshot (upsert).
    ///
    /// Tokens are re-encrypted under fresh nonces, caches are serialized to
    /// JSON text and the authorization code is cleared.
    pub fn save(&self, snapshot: &AccountSnapshot<'_>) -> Result<()> {
        let seal = |token: Option<&str>, what: &str| {
            token
                .map(|t| encryption::encrypt(t, &self.encryption_key))
                .transpose()
                .with_context(|| format!("Failed to encrypt {}", what))
        };
        let access_token = seal(snapshot.access_token, "access token")?;
        let refresh_token = seal(snapshot.refresh_token, "refresh token")?;

        let cache_a = snapshot
            .resource_cache_a
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize profile cache")?;
        let cache_b = snapshot
            .resource_cache_b
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize fleet carrier cache")?;

        self.conn()?
            .execute(
                r#"
                INSERT INTO accounts (
                    identity, state_token, auth_code, pkce_challenge, pkce_verifier,
                    access_token, refresh_token, auth_required, auth_prompted,
                    resource_cache_a, resource_cache_b
                )
                VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(identity) DO UPDATE SET
                    state_token = excluded.state_token,
                    auth_code = NULL,
                    pkce_challenge = excluded.pkce_challenge,
                    pkce_verifier = excluded.pkce_verifier,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    auth_required = excluded.auth_required,
                    auth_prompted = excluded.auth_prompted,
                    resource_cache_a = excluded.resource_cache_a,
                    resource_cache_b = excluded.resource_cache_b
                "#,
                params![
                    snapshot.identity,
                    snapshot.state_token,
                    snapshot.pkce_challenge,
                    snapshot.pkce_verifier,
                    access_token,
                    refresh_token,
                    snapshot.auth_required,
                    snapshot.auth_prompted,
                    cache_a,
                    cache_b,
                ],
            )
            .with_context(|| format!("Failed to save account '{}'", snapshot.identity))?;

        self.record_write();
        Ok(())
    }

    /// Records an authorization code against the row holding `state_token`.
    ///
    /// This is the redirect helper's write. Returns `false` when no row
    /// carries that state token (stale or forged callback).
    pub fn record_authorization_code(&self, state_token: &str, code: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE accounts SET auth_code = ?1 WHERE state_token = ?2",
                params![code, state_token],
            )
            .context("Failed to record authorization code")?;

        self.record_write();
        Ok(rows > 0)
    }

    /// Returns the authorization code waiting for an identity, if any.
    pub fn pending_authorization_code(&self, identity: &str) -> Result<Option<String>> {
        let code: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT auth_code FROM accounts WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read authorization code")?;

        Ok(code.flatten().filter(|c| !c.is_empty()))
    }

    /// Deletes the row for an identity.
    ///
    /// # Returns
    /// * `Ok(true)` - Row deleted
    /// * `Ok(false)` - No row found
    pub fn delete(&self, identity: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute("DELETE FROM accounts WHERE identity = ?1", params![identity])
            .context("Failed to delete account")?;

        self.record_write();
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde_json::json;

    fn create_test_store() -> CredentialStore {
        let key = BASE64.encode([0u8; 32]);
        CredentialStore::new(":memory:", &key).expect("Failed to create test store")
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = create_test_store();
        assert!(store.list_identities().unwrap().is_empty());
        assert!(store.load("Cmdr1").unwrap().is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_insert_new_is_idempotent() {
        let store = create_test_store();

        assert!(store.insert_new("Cmdr1").unwrap());
        assert!(!store.insert_new("Cmdr1").unwrap());

        let row = store.load("Cmdr1").unwrap().unwrap();
        assert!(row.auth_required);
        assert!(!row.auth_prompted);
        assert!(row.access_token.is_none());
        assert_eq!(store.list_identities().unwrap(), vec!["Cmdr1".to_string()]);
    }

    #[test]
    fn test_save_encrypts_tokens_and_clears_code() {
        let store = create_test_store();
        store
            .save_authorization_attempt("Cmdr1", "state-1", "challenge", "verifier")
            .unwrap();
        assert!(store.record_authorization_code("state-1", "abc").unwrap());

        let profile = json!({"commander": {"name": "Jameson"}});
        store
            .save(&AccountSnapshot {
                state_token: Some("state-1"),
                pkce_challenge: Some("challenge"),
                pkce_verifier: Some("verifier"),
                access_token: Some("access-123"),
                refresh_token: Some("refresh-456"),
                auth_required: false,
                resource_cache_a: Some(&profile),
                ..AccountSnapshot::empty("Cmdr1")
            })
            .unwrap();

        let row = store.load("Cmdr1").unwrap().unwrap();
        assert!(row.auth_code.is_none());
        assert!(!row.auth_required);
        assert_ne!(row.access_token.as_deref(), Some("access-123".as_bytes()));
        assert_eq!(
            row.resource_cache_a.as_deref(),
            Some(r#"{"commander":{"name":"Jameson"}}"#)
        );
        assert!(row.resource_cache_b.is_none());

        let tokens = store.decrypt_tokens(&row).unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("access-123"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-456"));
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let store = create_test_store();
        store
            .save(&AccountSnapshot {
                access_token: Some("access"),
                ..AccountSnapshot::empty("Cmdr1")
            })
            .unwrap();
        let row = store.load("Cmdr1").unwrap().unwrap();

        let other = CredentialStore::new(":memory:", &BASE64.encode([9u8; 32])).unwrap();
        assert_eq!(
            other.decrypt_tokens(&row),
            Err(DecryptionError::Authentication)
        );
    }

    #[test]
    fn test_authorization_code_roundtrip() {
        let store = create_test_store();
        store
            .save_authorization_attempt("Cmdr1", "state-1", "challenge", "verifier")
            .unwrap();

        assert!(store.pending_authorization_code("Cmdr1").unwrap().is_none());

        // Callback for an unknown state matches nothing
        assert!(!store.record_authorization_code("forged", "zzz").unwrap());
        assert!(store.pending_authorization_code("Cmdr1").unwrap().is_none());

        assert!(store.record_authorization_code("state-1", "abc").unwrap());
        assert_eq!(
            store.pending_authorization_code("Cmdr1").unwrap().as_deref(),
            Some("abc")
        );
        assert!(store.pending_authorization_code("Nobody").unwrap().is_none());
    }

    #[test]
    fn test_new_attempt_discards_stale_code() {
        let store = create_test_store();
        store
            .save_authorization_attempt("Cmdr1", "state-1", "challenge", "verifier")
            .unwrap();
        store.record_authorization_code("state-1", "old").unwrap();

        store
            .save_authorization_attempt("Cmdr1", "state-2", "challenge", "verifier")
            .unwrap();

        assert!(store.pending_authorization_code("Cmdr1").unwrap().is_none());
        assert!(!store.record_authorization_code("state-1", "late").unwrap());
    }

    #[test]
    fn test_new_attempt_keeps_cached_data() {
        let store = create_test_store();
        let carrier = json!({"name": {"callsign": "K7Q-1HT"}});
        store
            .save(&AccountSnapshot {
                resource_cache_b: Some(&carrier),
                ..AccountSnapshot::empty("Cmdr1")
            })
            .unwrap();

        store
            .save_authorization_attempt("Cmdr1", "state-2", "challenge", "verifier")
            .unwrap();

        let row = store.load("Cmdr1").unwrap().unwrap();
        assert_eq!(row.state_token.as_deref(), Some("state-2"));
        assert!(row.auth_prompted);
        assert!(row.resource_cache_b.is_some());
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store.insert_new("Cmdr1").unwrap();

        assert!(store.delete("Cmdr1").unwrap());
        assert!(store.load("Cmdr1").unwrap().is_none());
        assert!(!store.delete("Cmdr1").unwrap());
    }

    #[test]
    fn test_listing_follows_insertion_order() {
        let store = create_test_store();
        for name in ["Zeta", "Alpha", "Mid"] {
            store.insert_new(name).unwrap();
        }

        assert_eq!(
            store.list_identities().unwrap(),
            vec!["Zeta".to_string(), "Alpha".to_string(), "Mid".to_string()]
        );
    }

    #[test]
    fn test_write_count_tracks_writes() {
        let store = create_test_store();
        store.insert_new("Cmdr1").unwrap();
        store.save(&AccountSnapshot::empty("Cmdr1")).unwrap();
        store.load("Cmdr1").unwrap();

        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.db");
        let key = BASE64.encode([3u8; 32]);

        {
            let store = CredentialStore::new(&path, &key).unwrap();
            store
                .save(&AccountSnapshot {
                    refresh_token: Some("refresh"),
                    ..AccountSnapshot::empty("Cmdr1")
                })
                .unwrap();
        }

        let store = CredentialStore::new(&path, &key).unwrap();
        let row = store.load("Cmdr1").unwrap().unwrap();
        let tokens = store.decrypt_tokens(&row).unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
        assert!(tokens.access_token.is_none());
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(CredentialStore::new(":memory:", "short").is_err());
        assert!(CredentialStore::new(":memory:", "not-valid-base64!@#$").is_err());
    }
}
