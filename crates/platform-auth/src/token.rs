//! Token endpoint client
//!
//! Two grants share one endpoint:
//! 1. `authorization_code`, completing the PKCE flow
//! 2. `refresh_token`, renewing a stale access token
//!
//! The platform reports some failures with a 2xx status and an `error`
//! field in the JSON body, so the body is inspected before the status code
//! decides success.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

/// Grant type label, used for the form body, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub fn as_str(self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
        }
    }
}

/// Successful token endpoint reply.
///
/// `expires_in` is a delta in seconds; the caller turns it into an absolute
/// millisecond timestamp. `refresh_token` may be omitted on refresh when
/// the platform does not rotate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Raw reply shape. Every field is optional so that error replies and
/// malformed replies can be told apart.
#[derive(Debug, Default, Deserialize)]
struct TokenReply {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<serde_json::Value>,
    error_description: Option<String>,
}

impl TokenReply {
    /// `error: description`, if the reply carries a non-empty error field.
    fn error_message(&self) -> Option<String> {
        let code = match self.error.as_ref()? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) if s.is_empty() => return None,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(match &self.error_description {
            Some(desc) if !desc.is_empty() => format!("{code}: {desc}"),
            _ => code,
        })
    }
}

/// Exchange an authorization code and its PKCE verifier for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    code: &str,
    verifier: &str,
) -> Result<TokenGrant> {
    let form = [
        ("grant_type", Grant::AuthorizationCode.as_str()),
        ("code", code),
        ("code_verifier", verifier),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.expose().as_str()),
        ("redirect_uri", settings.redirect_uri.as_str()),
    ];
    let result = post_token_form(client, settings, Grant::AuthorizationCode, &form)
        .await
        .and_then(|reply| {
            let refresh_token = non_empty(reply.refresh_token).ok_or_else(|| {
                Error::UpstreamMalformed("authorization response has no refresh_token".into())
            })?;
            into_grant(reply.access_token, Some(refresh_token), reply.expires_in)
        });
    record_exchange(Grant::AuthorizationCode, &result);
    result
}

/// Trade a refresh token for a renewed credential pair.
pub async fn refresh_token(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    refresh: &str,
) -> Result<TokenGrant> {
    let form = [
        ("grant_type", Grant::RefreshToken.as_str()),
        ("refresh_token", refresh),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.expose().as_str()),
    ];
    let result = post_token_form(client, settings, Grant::RefreshToken, &form)
        .await
        .and_then(|reply| {
            into_grant(
                reply.access_token,
                non_empty(reply.refresh_token),
                reply.expires_in,
            )
        });
    record_exchange(Grant::RefreshToken, &result);
    result
}

async fn post_token_form(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    grant: Grant,
    form: &[(&str, &str)],
) -> Result<TokenReply> {
    let response = client
        .post(settings.token_url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| Error::UpstreamRejected(format!("{} request failed: {e}", grant.as_str())))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::UpstreamRejected(format!("reading token response: {e}")))?;
    debug!(grant = grant.as_str(), %status, "token endpoint replied");

    let reply = serde_json::from_str::<TokenReply>(&body).ok();

    if let Some(message) = reply.as_ref().and_then(TokenReply::error_message) {
        return Err(Error::UpstreamRejected(format!("{status}: {message}")));
    }
    if !status.is_success() {
        return Err(Error::UpstreamRejected(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    reply.ok_or_else(|| Error::UpstreamMalformed("token response is not a JSON object".into()))
}

fn into_grant(
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
) -> Result<TokenGrant> {
    let access_token = non_empty(access_token)
        .ok_or_else(|| Error::UpstreamMalformed("token response has no access_token".into()))?;
    let expires_in = expires_in
        .ok_or_else(|| Error::UpstreamMalformed("token response has no expires_in".into()))?;
    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_in,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn record_exchange(grant: Grant, result: &Result<TokenGrant>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    metrics::counter!(
        "token_exchanges_total",
        "grant" => grant.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
