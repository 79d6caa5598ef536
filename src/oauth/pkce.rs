//! PKCE verifier/challenge generation (S256) and state tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default number of random bytes behind a verifier.
pub const DEFAULT_VERIFIER_BYTES: usize = 32;

/// RFC 7636 bounds the verifier to 43..=128 characters.
const MIN_VERIFIER_BYTES: usize = 32;
const MAX_VERIFIER_BYTES: usize = 96;

/// A PKCE verifier and the challenge derived from it.
///
/// The verifier stays in-process. Only the challenge goes to the
/// authorization server.
#[derive(Clone, PartialEq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generates a verifier from `length` random bytes and its S256 challenge.
///
/// `length` is clamped so the encoded verifier stays within 43..=128 characters.
pub fn generate_pkce_pair(length: usize) -> PkcePair {
    let mut random = vec![0u8; length.clamp(MIN_VERIFIER_BYTES, MAX_VERIFIER_BYTES)];
    rand::thread_rng().fill_bytes(&mut random);

    let verifier = URL_SAFE_NO_PAD.encode(&random);
    let challenge = derive_challenge(&verifier);

    PkcePair {
        verifier,
        challenge,
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Fresh anti-CSRF state token (UUID v4).
pub fn generate_state_token() -> String {
    Uuid::new_v4().to_string()
}
