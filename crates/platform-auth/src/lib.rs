//! Platform OAuth credential lifecycle
//!
//! PKCE flow generation, token exchange and refresh, and an encrypted
//! single-record credential file. The crate has no dependency on the proxy
//! binary and can be tested on its own.
//!
//! Credential flow:
//! 1. `CredentialManager::begin_authorization()` builds the redirect URL and
//!    keeps the PKCE verifier in memory
//! 2. The user authorizes in a browser and the platform redirects back
//! 3. `CredentialManager::complete_authorization()` exchanges the code and
//!    saves the credential through `CredentialStore`
//! 4. `CredentialManager::get_valid_access_token()` serves the cached token
//!    or refreshes it when it is about to expire

pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod pkce;
pub mod secret;
pub mod settings;
pub mod store;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use lifecycle::{AuthorizationRequest, CredentialManager, CredentialStatus, now_millis};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use secret::Secret;
pub use settings::OAuthSettings;
pub use store::{CredentialRecord, CredentialStore};
pub use token::{Grant, TokenGrant, exchange_code, refresh_token};
