//! PKCE verification and random credential generation using `ring`.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use super::types::{CodeChallengeMethod, OAuthError};

/// Generate a PKCE code challenge from the given verifier using SHA-256 and base64url (no padding).
pub fn pkce_code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Verify a PKCE `verifier` against the stored `challenge`.
///
/// Only `S256` and `plain` are understood. Any other method, or an empty
/// challenge, fails.
pub fn verify_code_challenge(verifier: &str, challenge: &str, method: &str) -> bool {
    if challenge.is_empty() {
        return false;
    }
    match CodeChallengeMethod::from_str(method) {
        Ok(CodeChallengeMethod::S256) => {
            constant_time_eq(pkce_code_challenge(verifier).as_bytes(), challenge.as_bytes())
        }
        Ok(CodeChallengeMethod::Plain) => constant_time_eq(verifier.as_bytes(), challenge.as_bytes()),
        Err(_) => false,
    }
}

/// Compare two byte strings in constant time. Only the length comparison
/// may return early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Generate a URL-safe random string of exactly `length` characters from the system CSPRNG.
pub fn generate_random_string(length: usize) -> Result<String, OAuthError> {
    let rng = SystemRandom::new();
    // 3 bytes encode to 4 characters
    let mut buf = vec![0u8; length.div_ceil(4) * 3];
    rng.fill(&mut buf).map_err(|_| OAuthError::ServerError)?;
    let mut encoded = URL_SAFE_NO_PAD.encode(&buf);
    encoded.truncate(length);
    Ok(encoded)
}
