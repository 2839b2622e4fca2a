//! Authorization routes
//!
//! Drive the PKCE flow against the credential manager. Tokens never appear
//! in any response body.
//!
//! Endpoints:
//! - `GET  /auth/login`: start the flow, 302 to the platform
//! - `POST /auth/init`: start the flow, return the URL as JSON
//! - `GET  /auth/callback`: platform redirect target, completes the flow
//! - `POST /auth/complete`: complete the flow with a pasted code
//! - `GET  /auth/status`: credential state
//! - `POST /auth/logout`: delete the stored credential

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use platform_auth::{CredentialManager, CredentialRecord};
use serde::Deserialize;
use tracing::{info, warn};

use crate::relay::error_response;

/// Shared state for auth handlers.
#[derive(Clone)]
pub struct AuthState {
    credentials: Arc<CredentialManager>,
}

impl AuthState {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self { credentials }
    }
}

/// Build the auth router.
pub fn build_auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/init", post(init))
        .route("/auth/callback", get(callback))
        .route("/auth/complete", post(complete))
        .route("/auth/status", get(status))
        .route("/auth/logout", post(logout))
        .with_state(state)
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn json_ok(body: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn authorized_response(record: &CredentialRecord) -> Response {
    json_ok(serde_json::json!({
        "status": "authorized",
        "expires_at": record.expires_at,
    }))
}

/// Map a failed completion to a response.
///
/// Completion mistakes are 400s that point back at `/auth/login`.
fn completion_error_response(err: &platform_auth::Error) -> Response {
    use platform_auth::Error;

    let request_id = new_request_id();
    let (status, error_type) = match err {
        Error::MissingCode | Error::MissingVerifier | Error::StateMismatch => {
            (StatusCode::BAD_REQUEST, "invalid_authorization")
        }
        Error::UpstreamRejected(_) | Error::UpstreamMalformed(_) => {
            (StatusCode::BAD_GATEWAY, "token_exchange_failed")
        }
        Error::NotAuthorized | Error::StorageCorrupt(_) | Error::Storage(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "credential_storage_error")
        }
    };
    let message = if err.requires_reauthorization() {
        format!("{err}; restart at /auth/login")
    } else {
        err.to_string()
    };
    error_response(status, error_type, &message, &request_id)
}

/// GET /auth/login: redirect the browser to the platform's consent page.
async fn login(State(state): State<AuthState>) -> Response {
    let request = state.credentials.begin_authorization().await;
    (StatusCode::FOUND, [(header::LOCATION, request.url)]).into_response()
}

/// POST /auth/init: same as login, for clients that open the URL themselves.
async fn init(State(state): State<AuthState>) -> Response {
    let request = state.credentials.begin_authorization().await;
    json_ok(serde_json::json!({
        "authorization_url": request.url,
        "state": request.state,
        "instructions": "Open the URL in a browser and authorize; the platform redirects to /auth/callback"
    }))
}

/// Query string of the platform redirect.
#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/callback: exchange the code the platform redirected with.
async fn callback(State(state): State<AuthState>, Query(params): Query<CallbackParams>) -> Response {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(error = %error, description = %description, "platform denied authorization");
        return error_response(
            StatusCode::BAD_REQUEST,
            "authorization_denied",
            &format!("platform returned {error}: {description}"),
            &new_request_id(),
        );
    }

    // A redirect without `state` is treated as forged
    let code = params.code.unwrap_or_default();
    let expected_state = params.state.unwrap_or_default();
    match state
        .credentials
        .complete_callback(&code, &expected_state)
        .await
    {
        Ok(record) => {
            info!("authorization callback completed");
            authorized_response(&record)
        }
        Err(e) => completion_error_response(&e),
    }
}

/// Request body for /auth/complete.
#[derive(Deserialize)]
struct CompleteRequest {
    code: String,
}

/// POST /auth/complete: exchange a code pasted by the operator.
async fn complete(
    State(state): State<AuthState>,
    axum::Json(body): axum::Json<CompleteRequest>,
) -> Response {
    match state.credentials.complete_authorization(&body.code).await {
        Ok(record) => authorized_response(&record),
        Err(e) => completion_error_response(&e),
    }
}

/// GET /auth/status: credential state without exposing tokens.
async fn status(State(state): State<AuthState>) -> Response {
    let status = state.credentials.status().await;
    json_ok(serde_json::json!({
        "status": status.label(),
        "expires_at": status.expires_at(),
    }))
}

/// POST /auth/logout: delete the stored credential.
async fn logout(State(state): State<AuthState>) -> Response {
    match state.credentials.clear_credentials().await {
        Ok(()) => {
            info!("credential cleared by operator");
            json_ok(serde_json::json!({ "status": "cleared" }))
        }
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "failed to clear credential");
            completion_error_response(&e)
        }
    }
}
