//! PKCE (RFC 7636) verification.
//!
//! The client keeps a random `code_verifier` and sends only
//! `code_challenge = BASE64URL(SHA256(code_verifier))` when it asks for an authorization code.
//! Exchanging the code later requires the verifier itself.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const METHOD_S256: &str = "S256";

/// The challenge for a verifier, using the S256 method.
pub fn s256_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    base64::encode_config(&digest, base64::URL_SAFE_NO_PAD)
}

/// Only the S256 method is supported. An empty method means S256.
pub fn is_supported_method(method: &str) -> bool {
    let method = method.trim();
    method.is_empty() || method == METHOD_S256
}

/// Check a verifier against a stored challenge. The comparison is constant-time.
pub fn verify_code_verifier(code_verifier: &str, code_challenge: &str, method: &str) -> bool {
    if !is_supported_method(method) || code_verifier.is_empty() || code_challenge.is_empty() {
        return false;
    }
    let computed = s256_challenge(code_verifier);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}
