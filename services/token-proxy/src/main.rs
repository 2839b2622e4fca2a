//! Platform Token Proxy
//!
//! Single-binary Rust service that:
//! 1. Walks an operator through the platform's PKCE authorization flow
//! 2. Keeps the resulting credential encrypted on disk
//! 3. Refreshes it shortly before it expires
//! 4. Relays `/api/*` calls to the platform REST API with the bearer token injected

mod auth;
mod config;
mod error;
mod metrics;
mod relay;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use metrics_exporter_prometheus::PrometheusHandle;
use platform_auth::{CredentialManager, CredentialStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::{AuthState, build_auth_router, new_request_id};
use crate::config::Config;
use crate::relay::RelayState;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    relay: RelayState,
    credentials: Arc<CredentialManager>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let auth = build_auth_router(AuthState::new(state.credentials.clone()));
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/{*path}", any(relay_handler))
        .with_state(state)
        .merge(auth)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

/// HTTP client shared by the relay and the token endpoint calls.
///
/// `timeout` bounds every request, so a silent token endpoint fails a
/// refresh instead of holding the refresh lock indefinitely.
fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting platform-token-proxy");

    // Before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream_url = %config.upstream.base_url,
        token_url = %config.oauth.token_url,
        credential_path = %config.storage.credential_path.display(),
        "configuration loaded"
    );

    let settings = config.oauth_settings()?;
    let encryption_key = config
        .storage
        .encryption_key
        .as_ref()
        .context("storage encryption key was not resolved")?;
    let store = CredentialStore::new(config.storage.credential_path.clone(), encryption_key)
        .context("failed to open credential store")?;

    let http_client = build_http_client(Duration::from_secs(config.server.timeout_secs))
        .context("failed to build HTTP client")?;
    let credentials = Arc::new(CredentialManager::new(
        settings,
        store,
        http_client.clone(),
    ));

    let status = credentials.status().await;
    if status.expires_at().is_none() {
        warn!(
            login = %format!("http://{}/auth/login", config.server.listen_addr),
            "no stored credential, authorize before relaying"
        );
    } else {
        info!(credential = status.label(), "stored credential found");
    }

    let app_state = AppState {
        relay: RelayState {
            client: http_client,
            upstream_url: config.upstream.base_url.clone(),
            credentials: credentials.clone(),
            timeout: Duration::from_secs(config.server.timeout_secs),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        credentials,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts when the signal fires, not when the server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, credential state, uptime, requests served.
///
/// Always 200; a missing credential is reported, not treated as unhealthy.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let requests = state.relay.requests_total.load(Ordering::Relaxed);
    let errors = state.relay.errors_total.load(Ordering::Relaxed);
    let credential = state.credentials.status().await;

    let body = serde_json::json!({
        "status": "healthy",
        "credential": credential.label(),
        "credential_expires_at": credential.expires_at(),
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn relay_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    relay::relay_request(&state.relay, request, new_request_id()).await
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
