//! Shared fixtures for router tests: in-process token endpoint and upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Form;
use axum::http::StatusCode;
use axum::routing::post;
use platform_auth::{
    CredentialManager, CredentialRecord, CredentialStore, OAuthSettings, Secret, now_millis,
};
use reqwest::Url;
use tokio::net::TcpListener;

type Forms = Arc<std::sync::Mutex<Vec<HashMap<String, String>>>>;

/// Token endpoint answering every POST with a fixed JSON reply.
pub struct MockTokenEndpoint {
    pub url: Url,
    hits: Arc<AtomicUsize>,
    forms: Forms,
}

impl MockTokenEndpoint {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Form body of the most recent request.
    pub fn last_form(&self) -> HashMap<String, String> {
        self.forms.lock().unwrap().last().cloned().unwrap()
    }
}

pub async fn spawn_token_endpoint(reply: serde_json::Value) -> MockTokenEndpoint {
    let hits = Arc::new(AtomicUsize::new(0));
    let forms: Forms = Arc::default();
    let app = {
        let hits = hits.clone();
        let forms = forms.clone();
        Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let hits = hits.clone();
                let forms = forms.clone();
                let reply = reply.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    forms.lock().unwrap().push(form);
                    axum::Json(reply)
                }
            }),
        )
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockTokenEndpoint {
        url: Url::parse(&format!("http://{addr}/token")).unwrap(),
        hits,
        forms,
    }
}

/// Token endpoint that accepts connections and never replies.
pub async fn spawn_silent_token_endpoint() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });
    Url::parse(&format!("http://{addr}/token")).unwrap()
}

pub fn granted() -> serde_json::Value {
    serde_json::json!({
        "access_token": "at_new",
        "refresh_token": "rt_new",
        "expires_in": 3600
    })
}

/// Credential manager backed by a store in `dir` and the given token endpoint.
pub fn test_manager(dir: &tempfile::TempDir, token_url: &Url) -> Arc<CredentialManager> {
    test_manager_with_client(dir, token_url, reqwest::Client::new())
}

pub fn test_manager_with_client(
    dir: &tempfile::TempDir,
    token_url: &Url,
    http_client: reqwest::Client,
) -> Arc<CredentialManager> {
    let settings = OAuthSettings::new(
        "client-123",
        Secret::new("client-secret".to_string()),
        "http://127.0.0.1:8080/auth/callback",
        Url::parse("https://platform.example/oauth/authorize").unwrap(),
        token_url.clone(),
        vec!["user.info.basic".into()],
    )
    .with_refresh_margin(Duration::from_secs(60));
    let store = CredentialStore::new(
        dir.path().join("credentials.enc"),
        &Secret::new("storage-secret".to_string()),
    )
    .unwrap();
    Arc::new(CredentialManager::new(settings, store, http_client))
}

/// Persist a credential valid for an hour.
pub async fn seed_fresh_credential(manager: &CredentialManager, access_token: &str) {
    manager
        .store()
        .save(&CredentialRecord {
            access_token: access_token.into(),
            refresh_token: "rt_seed".into(),
            expires_at: now_millis() + 3_600_000,
        })
        .await
        .unwrap();
}

/// Upstream that echoes method, path, query, headers and body back as JSON.
pub async fn spawn_echo_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(|request: axum::http::Request<Body>| async move {
        let mut headers_map = serde_json::Map::new();
        for (name, value) in request.headers() {
            headers_map.insert(
                name.to_string(),
                serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
            );
        }
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or("").to_string();
        let body_bytes = axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024)
            .await
            .unwrap();
        let body = serde_json::json!({
            "echoed_headers": headers_map,
            "method": method,
            "path": path,
            "query": query,
            "body": String::from_utf8_lossy(&body_bytes),
        });
        let status = if path.ends_with("/missing") {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        (status, [("x-upstream-echo", "true")], axum::Json(body))
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
