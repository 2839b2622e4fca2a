//! Protocol constants for the platform OAuth flow
//!
//! Endpoint URLs, the client identifier and the scopes are deployment
//! configuration (see `OAuthSettings`). The values here are fixed by the
//! protocol or by the on-disk format and must not change between releases.

use std::time::Duration;

/// PKCE challenge method sent in the authorization URL.
///
/// The platform computes the challenge as lowercase hex SHA-256 of the
/// verifier but still names the method `S256`.
pub const CHALLENGE_METHOD: &str = "S256";

/// Default PKCE verifier length in characters.
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;

/// RFC 7636 bounds on the verifier length.
pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Unreserved URI characters allowed in a PKCE verifier.
pub const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// A token this close to `expires_at` is treated as already expired.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Fixed salt for deriving the storage key from the configured secret.
///
/// Changing it orphans every credential file written by earlier builds.
pub const KEY_DERIVATION_SALT: &[u8] = b"platform-token-proxy/credential-store/v1";

/// Version tag written into the encrypted credential envelope.
pub const ENVELOPE_VERSION: u32 = 1;
