//! OAuth client settings shared by the PKCE builder and the token client

use std::time::Duration;

use reqwest::Url;

use crate::constants::{DEFAULT_REFRESH_MARGIN, DEFAULT_VERIFIER_LENGTH};
use crate::secret::Secret;

/// Registered client identity and platform endpoints.
///
/// Built once at startup from configuration and owned by the
/// `CredentialManager`.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub scopes: Vec<String>,
    /// Window before `expires_at` in which the access token counts as stale
    pub refresh_margin: Duration,
    /// PKCE verifier length in characters (43..=128)
    pub verifier_length: usize,
}

impl OAuthSettings {
    /// Settings with the default refresh margin and verifier length.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
        authorize_url: Url,
        token_url: Url,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            authorize_url,
            token_url,
            scopes,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            verifier_length: DEFAULT_VERIFIER_LENGTH,
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_verifier_length(mut self, length: usize) -> Self {
        self.verifier_length = length;
        self
    }
}
