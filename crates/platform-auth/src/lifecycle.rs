//! Credential lifecycle: authorization, refresh, and valid-token retrieval
//!
//! `CredentialManager` is the only caller of the store. It keeps one piece
//! of in-memory state, the pending PKCE slot, and re-reads the persisted
//! record on every operation so the file stays the source of truth across
//! restarts.
//!
//! Lifecycle:
//! 1. `begin_authorization` fills the pending slot and returns the redirect URL
//! 2. `complete_authorization` empties the slot, exchanges the code, saves
//! 3. `get_valid_access_token` returns the cached token, or refreshes and
//!    saves a replacement record when it is within the margin of expiry
//! 4. `clear_credentials` deletes the record

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pkce;
use crate::settings::OAuthSettings;
use crate::store::{CredentialRecord, CredentialStore};
use crate::token::{self, TokenGrant};

/// Everything produced by `begin_authorization`.
///
/// Only `url` needs to leave the process. The verifier stays in the
/// manager's pending slot as well; it is returned for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub verifier: String,
    pub challenge: String,
}

/// The one outstanding PKCE flow.
struct PendingAuthorization {
    verifier: String,
    state: String,
}

/// Credential state as seen right now. Staleness is computed, not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Unauthorized,
    Authorizing,
    Fresh { expires_at: u64 },
    Stale { expires_at: u64 },
}

impl CredentialStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Unauthorized => "unauthorized",
            CredentialStatus::Authorizing => "authorizing",
            CredentialStatus::Fresh { .. } => "fresh",
            CredentialStatus::Stale { .. } => "stale",
        }
    }

    pub fn expires_at(&self) -> Option<u64> {
        match self {
            CredentialStatus::Fresh { expires_at } | CredentialStatus::Stale { expires_at } => {
                Some(*expires_at)
            }
            _ => None,
        }
    }
}

/// Owns the PKCE slot and orchestrates the store and the token endpoint.
///
/// Refreshes run inside `refresh_lock` and re-check expiry after acquiring
/// it, so concurrent callers holding a stale token share one exchange.
pub struct CredentialManager {
    settings: OAuthSettings,
    store: CredentialStore,
    http_client: reqwest::Client,
    pending: Mutex<Option<PendingAuthorization>>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    pub fn new(settings: OAuthSettings, store: CredentialStore, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            store,
            http_client,
            pending: Mutex::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Start a PKCE flow, replacing any flow already pending.
    ///
    /// No network I/O. A verifier from an earlier call is discarded and can
    /// no longer complete.
    pub async fn begin_authorization(&self) -> AuthorizationRequest {
        let verifier = pkce::generate_verifier(self.settings.verifier_length);
        let challenge = pkce::compute_challenge(&verifier);
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = pkce::build_authorization_url(&self.settings, &state, &challenge);

        let previous = self.pending.lock().await.replace(PendingAuthorization {
            verifier: verifier.clone(),
            state: state.clone(),
        });
        if previous.is_some() {
            debug!("pending authorization superseded");
        }
        info!("authorization flow started");

        AuthorizationRequest {
            url,
            state,
            verifier,
            challenge,
        }
    }

    /// Exchange an authorization code for a credential and persist it.
    ///
    /// The pending verifier is consumed whatever the outcome.
    pub async fn complete_authorization(&self, code: &str) -> Result<CredentialRecord> {
        self.complete(code, None).await
    }

    /// Like `complete_authorization`, also requiring the `state` echoed on
    /// the redirect to match the pending flow. An empty `state` never matches.
    pub async fn complete_callback(&self, code: &str, state: &str) -> Result<CredentialRecord> {
        self.complete(code, Some(state)).await
    }

    async fn complete(&self, code: &str, state: Option<&str>) -> Result<CredentialRecord> {
        let pending = self.pending.lock().await.take();

        if code.trim().is_empty() {
            warn!(kind = "missing_code", "authorization completed without a code");
            return Err(Error::MissingCode);
        }
        let Some(pending) = pending else {
            warn!(kind = "missing_verifier", "no pending authorization to complete");
            return Err(Error::MissingVerifier);
        };
        if let Some(state) = state
            && state != pending.state
        {
            warn!(kind = "state_mismatch", "authorization state did not match");
            return Err(Error::StateMismatch);
        }

        let issued_at = now_millis();
        let grant = token::exchange_code(&self.http_client, &self.settings, code, &pending.verifier)
            .await
            .inspect_err(|e| warn!(kind = e.kind(), error = %e, "authorization exchange failed"))?;
        let record = record_from_grant(grant, None, issued_at)?;

        self.store
            .save(&record)
            .await
            .inspect_err(|e| warn!(kind = e.kind(), error = %e, "failed to persist credential"))?;

        info!(expires_at = record.expires_at, "authorization completed");
        Ok(record)
    }

    /// Return an access token that is not within the margin of expiry,
    /// refreshing it first if needed.
    ///
    /// `NotAuthorized` and `UpstreamRejected` both mean the flow must be run
    /// again. A failed refresh is not retried and leaves the stored record
    /// as it was.
    pub async fn get_valid_access_token(&self) -> Result<String> {
        let record = self.load_or_unauthorized().await?;
        if self.is_fresh(&record, now_millis()) {
            return Ok(record.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // A concurrent caller may have refreshed while we waited
        let record = self.load_or_unauthorized().await?;
        let issued_at = now_millis();
        if self.is_fresh(&record, issued_at) {
            debug!("token refreshed by concurrent caller");
            return Ok(record.access_token);
        }

        debug!(expires_at = record.expires_at, "access token stale, refreshing");
        let grant = token::refresh_token(&self.http_client, &self.settings, &record.refresh_token)
            .await
            .inspect_err(|e| {
                warn!(kind = e.kind(), error = %e, "token refresh failed, re-authorization required")
            })?;
        let renewed = record_from_grant(grant, Some(record.refresh_token), issued_at)?;

        self.store.save(&renewed).await.inspect_err(|e| {
            warn!(kind = e.kind(), error = %e, "failed to persist refreshed credential")
        })?;

        info!(expires_at = renewed.expires_at, "access token refreshed");
        Ok(renewed.access_token)
    }

    /// Delete the stored credential.
    pub async fn clear_credentials(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Current credential state. Never refreshes.
    pub async fn status(&self) -> CredentialStatus {
        if let Some(record) = self.store.load().await {
            let expires_at = record.expires_at;
            return if self.is_fresh(&record, now_millis()) {
                CredentialStatus::Fresh { expires_at }
            } else {
                CredentialStatus::Stale { expires_at }
            };
        }
        if self.pending.lock().await.is_some() {
            CredentialStatus::Authorizing
        } else {
            CredentialStatus::Unauthorized
        }
    }

    async fn load_or_unauthorized(&self) -> Result<CredentialRecord> {
        self.store.load().await.ok_or_else(|| {
            warn!(kind = "not_authorized", "no stored credential");
            Error::NotAuthorized
        })
    }

    /// `now < expires_at - margin`
    fn is_fresh(&self, record: &CredentialRecord, now: u64) -> bool {
        let margin = self.settings.refresh_margin.as_millis() as u64;
        now.saturating_add(margin) < record.expires_at
    }
}

/// Build a complete replacement record from a token grant.
///
/// A refresh reply without a refresh token keeps `previous_refresh`.
fn record_from_grant(
    grant: TokenGrant,
    previous_refresh: Option<String>,
    issued_at: u64,
) -> Result<CredentialRecord> {
    let refresh_token = grant
        .refresh_token
        .or(previous_refresh)
        .ok_or_else(|| Error::UpstreamMalformed("token response has no refresh_token".into()))?;
    Ok(CredentialRecord {
        access_token: grant.access_token,
        refresh_token,
        expires_at: issued_at.saturating_add(grant.expires_in.saturating_mul(1000)),
    })
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
