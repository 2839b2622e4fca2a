//! PKCE (Proof Key for Code Exchange) verifier, challenge and authorization URL
//!
//! The platform expects the challenge as the lowercase hex SHA-256 digest of
//! the verifier rather than the base64url form from RFC 7636. The method
//! identifier is still `S256`. Switching to base64url breaks the exchange.

use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{
    CHALLENGE_METHOD, MAX_VERIFIER_LENGTH, MIN_VERIFIER_LENGTH, VERIFIER_CHARSET,
};
use crate::settings::OAuthSettings;

/// Generate a random PKCE verifier of `length` unreserved URI characters.
///
/// `length` is clamped to the RFC 7636 range of 43..=128.
pub fn generate_verifier(length: usize) -> String {
    let length = length.clamp(MIN_VERIFIER_LENGTH, MAX_VERIFIER_LENGTH);
    let mut rng = rand::rng();
    (0..length)
        .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

/// `challenge = HEX(SHA256(verifier))`, lowercase.
pub fn compute_challenge(verifier: &str) -> String {
    hex::encode(Sha256::digest(verifier.as_bytes()))
}

/// Build the authorization redirect URL.
///
/// Query values are form-encoded by `Url`, so scopes and redirect targets
/// containing reserved characters survive intact. Scopes are comma-joined.
pub fn build_authorization_url(settings: &OAuthSettings, state: &str, challenge: &str) -> String {
    let mut url = settings.authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &settings.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("scope", &settings.scopes.join(","))
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", CHALLENGE_METHOD);
    url.into()
}
