//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client secret and the storage encryption secret come from env
//! vars or `*_file` paths, never from the TOML itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use platform_auth::{MAX_VERIFIER_LENGTH, MIN_VERIFIER_LENGTH, OAuthSettings, Secret};
use reqwest::Url;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";
const ENCRYPTION_KEY_ENV: &str = "TOKEN_ENCRYPTION_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Registered OAuth client and platform endpoints
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file holding the client secret (alternative to OAUTH_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_verifier_length")]
    pub verifier_length: usize,
}

/// Platform REST API that `/api/*` relays to
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
}

/// Encrypted credential file
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub credential_path: PathBuf,
    #[serde(skip)]
    pub encryption_key: Option<Secret<String>>,
    /// Path to a file holding the encryption secret (alternative to TOKEN_ENCRYPTION_KEY)
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_refresh_margin() -> u64 {
    platform_auth::DEFAULT_REFRESH_MARGIN.as_secs()
}

fn default_verifier_length() -> usize {
    platform_auth::DEFAULT_VERIFIER_LENGTH
}

impl Config {
    /// Load configuration from a TOML file, resolve secrets, and validate.
    ///
    /// Secret resolution order, for each secret:
    /// 1. env var (`OAUTH_CLIENT_SECRET`, `TOKEN_ENCRYPTION_KEY`)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.oauth.client_secret = Some(resolve_secret(
            CLIENT_SECRET_ENV,
            config.oauth.client_secret_file.as_deref(),
            "oauth.client_secret_file",
        )?);
        config.storage.encryption_key = Some(resolve_secret(
            ENCRYPTION_KEY_ENV,
            config.storage.encryption_key_file.as_deref(),
            "storage.encryption_key_file",
        )?);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("oauth.authorize_url", &self.oauth.authorize_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("oauth.redirect_uri", &self.oauth.redirect_uri),
            ("upstream.base_url", &self.upstream.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
            Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid URL: {e}")))?;
        }

        if self.oauth.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("oauth.client_id must not be empty".into()));
        }
        if self.oauth.scopes.is_empty() {
            return Err(ConfigError::Invalid(
                "oauth.scopes must list at least one scope".into(),
            ));
        }
        if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&self.oauth.verifier_length) {
            return Err(ConfigError::Invalid(format!(
                "oauth.verifier_length must be between {MIN_VERIFIER_LENGTH} and {MAX_VERIFIER_LENGTH}"
            )));
        }
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// OAuth client settings for the credential manager.
    pub fn oauth_settings(&self) -> Result<OAuthSettings> {
        let oauth = &self.oauth;
        let client_secret = oauth.client_secret.clone().ok_or(ConfigError::MissingSecret {
            env: CLIENT_SECRET_ENV,
            file_key: "oauth.client_secret_file",
        })?;
        let authorize_url = Url::parse(&oauth.authorize_url)
            .map_err(|e| ConfigError::Invalid(format!("oauth.authorize_url: {e}")))?;
        let token_url = Url::parse(&oauth.token_url)
            .map_err(|e| ConfigError::Invalid(format!("oauth.token_url: {e}")))?;

        Ok(OAuthSettings::new(
            oauth.client_id.clone(),
            client_secret,
            oauth.redirect_uri.clone(),
            authorize_url,
            token_url,
            oauth.scopes.clone(),
        )
        .with_refresh_margin(Duration::from_secs(oauth.refresh_margin_secs))
        .with_verifier_length(oauth.verifier_length))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("platform-token-proxy.toml")
    }
}

/// Env var first, then the file (trimmed). Empty values count as missing.
fn resolve_secret(
    env: &'static str,
    file: Option<&Path>,
    file_key: &'static str,
) -> Result<Secret<String>> {
    if let Ok(value) = std::env::var(env)
        && !value.is_empty()
    {
        return Ok(Secret::new(value));
    }
    if let Some(file) = file {
        let value = std::fs::read_to_string(file).map_err(|e| {
            ConfigError::Invalid(format!("failed to read {file_key} {}: {e}", file.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }
    Err(ConfigError::MissingSecret { env, file_key })
}
