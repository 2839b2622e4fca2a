//! Authenticated relay to the platform REST API
//!
//! Every `/api/*` request goes through one parameterized path: obtain a
//! valid access token, strip hop-by-hop and client auth headers, inject the
//! bearer token, forward method, path, query and body to the upstream base
//! URL, and return the upstream response verbatim (including error status
//! codes from upstream).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use platform_auth::CredentialManager;
use tracing::{error, instrument, warn};

use crate::metrics;

/// Path prefix stripped before forwarding: `/api/v2/user/info` → `/v2/user/info`
pub const RELAY_PREFIX: &str = "/api";

/// Inbound request body limit
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers the relay always sets itself.
const REPLACED_HEADERS: &[&str] = &["host", "authorization", "content-length"];

/// Shared state for the relay handler
#[derive(Clone)]
pub struct RelayState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub credentials: Arc<CredentialManager>,
    pub timeout: Duration,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a credential lifecycle error to an HTTP response.
///
/// Anything that needs a fresh authorization is a 401 pointing at
/// `/auth/login`; the log line keeps the specific kind.
pub fn credential_error_response(err: &platform_auth::Error, request_id: &str) -> Response {
    if err.requires_reauthorization() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "reauthorization_required",
            &format!("{err}; start authorization at /auth/login"),
            request_id,
        );
    }
    match err {
        platform_auth::Error::UpstreamMalformed(_) => error_response(
            StatusCode::BAD_GATEWAY,
            "token_endpoint_error",
            &err.to_string(),
            request_id,
        ),
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "credential_storage_error",
            &err.to_string(),
            request_id,
        ),
    }
}

/// Relay an inbound `/api/*` request upstream with the cached credential.
///
/// No retries: a failed call is returned to the client immediately.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn relay_request(
    state: &RelayState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = forward(state, request, &request_id).await;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
        state.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    metrics::record_request(
        status.as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &RelayState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let access_token = match state.credentials.get_valid_access_token().await {
        Ok(token) => token,
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "no usable credential for relay");
            return credential_error_response(&e, request_id);
        }
    };

    let method = request.method().clone();
    let upstream_url = upstream_url(&state.upstream_url, request.uri());

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && !is_replaced(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    let bearer = match HeaderValue::from_str(&format!("Bearer {access_token}")) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "access token is not a valid header value");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "credential_storage_error",
                "stored access token is not a valid header value",
                request_id,
            );
        }
    };
    headers.insert(header::AUTHORIZATION, bearer);

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let upstream_response = match state
        .client
        .request(method, &upstream_url)
        .headers(headers)
        .timeout(state.timeout)
        .body(body_bytes)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            metrics::record_upstream_error("timeout");
            error!(error = %e, "upstream timeout");
            return error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "proxy_error",
                &format!("upstream timeout after {}s", state.timeout.as_secs()),
                request_id,
            );
        }
        Err(e) => {
            metrics::record_upstream_error("connection");
            error!(error = %e, "upstream request failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("upstream error: {e}"),
                request_id,
            );
        }
    };

    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();
    let resp_body = match upstream_response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            metrics::record_upstream_error("body");
            error!(error = %e, "failed to read upstream response body");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("upstream response read error: {e}"),
                request_id,
            );
        }
    };

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(resp_body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// `{base}{path without /api}{?query}`
fn upstream_url(base: &str, uri: &axum::http::Uri) -> String {
    let path = uri.path();
    let path = path.strip_prefix(RELAY_PREFIX).unwrap_or(path);
    let mut url = format!("{}{}", base.trim_end_matches('/'), path);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_replaced(name: &str) -> bool {
    REPLACED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}
