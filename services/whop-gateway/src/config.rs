//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (client secret, webhook secret, state key) come from env vars or
//! files named in the config, never from the TOML itself.

use axum::http::HeaderName;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use whop_auth::{
    AUTHORIZE_ENDPOINT, ClientAuthMode, DEFAULT_SCOPES, IDENTITY_ENDPOINT, MAX_STATE_TTL_SECS,
    MEMBERSHIPS_ENDPOINT, OAuthClientConfig, TOKEN_ENDPOINT,
};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Origin the callback redirects back to, e.g. `https://app.example.com`.
    pub frontend_origin: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Provider OAuth settings
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_memberships_url")]
    pub memberships_url: String,
    #[serde(default)]
    pub client_auth: ClientAuthMode,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
    /// Path to a file containing the client secret (alternative to WHOP_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// Path to a file containing the state MAC key (alternative to OAUTH_STATE_KEY)
    #[serde(default)]
    pub state_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// `None` means a random per-process key; state issued before a restart
    /// then fails validation.
    #[serde(skip)]
    pub state_key: Option<Secret<String>>,
}

/// Webhook intake settings
#[derive(Debug, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Path to a file containing the webhook secret (alternative to WHOP_WEBHOOK_SECRET)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signature_header: default_signature_header(),
            secret_file: None,
            secret: None,
        }
    }
}

/// File locations for the JSON stores
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_profiles_path")]
    pub profiles_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            profiles_path: default_profiles_path(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_scope() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_authorize_url() -> String {
    AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_url() -> String {
    TOKEN_ENDPOINT.to_string()
}

fn default_identity_url() -> String {
    IDENTITY_ENDPOINT.to_string()
}

fn default_memberships_url() -> String {
    MEMBERSHIPS_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_state_ttl() -> u64 {
    MAX_STATE_TTL_SECS
}

fn default_signature_header() -> String {
    "x-whop-signature".to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("data/credentials.json")
}

fn default_profiles_path() -> PathBuf {
    PathBuf::from("data/profiles.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Each secret resolves from its env var first, then its `*_file` path:
    /// `WHOP_CLIENT_SECRET`, `WHOP_WEBHOOK_SECRET`, `OAUTH_STATE_KEY`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.oauth.client_secret = Secret::from_env_or_file(
            "WHOP_CLIENT_SECRET",
            config.oauth.client_secret_file.as_deref(),
        )?;
        if config.oauth.client_secret.is_none() {
            return Err(common::Error::Config(
                "client secret not set: provide WHOP_CLIENT_SECRET or oauth.client_secret_file"
                    .into(),
            ));
        }

        config.oauth.state_key =
            Secret::from_env_or_file("OAUTH_STATE_KEY", config.oauth.state_key_file.as_deref())?;
        config.webhook.secret =
            Secret::from_env_or_file("WHOP_WEBHOOK_SECRET", config.webhook.secret_file.as_deref())?;

        config.server.frontend_origin = config
            .server
            .frontend_origin
            .trim_end_matches('/')
            .to_string();

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let urls = [
            ("server.frontend_origin", &self.server.frontend_origin),
            ("oauth.redirect_uri", &self.oauth.redirect_uri),
            ("oauth.authorize_url", &self.oauth.authorize_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("oauth.identity_url", &self.oauth.identity_url),
            ("oauth.memberships_url", &self.oauth.memberships_url),
        ];
        for (name, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("oauth.client_id must not be empty".into()));
        }

        if self.oauth.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_STATE_TTL_SECS).contains(&self.oauth.state_ttl_secs) {
            return Err(common::Error::Config(format!(
                "state_ttl_secs must be between 1 and {MAX_STATE_TTL_SECS}, got: {}",
                self.oauth.state_ttl_secs
            )));
        }

        self.webhook.header_name()?;
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("whop-gateway.toml")
    }

    /// Client settings for `whop_auth::OAuthClient`.
    pub fn client_config(&self) -> common::Result<OAuthClientConfig> {
        let secret = self
            .oauth
            .client_secret
            .clone()
            .ok_or_else(|| common::Error::Config("client secret not loaded".into()))?;
        let mut client = OAuthClientConfig::new(
            self.oauth.client_id.clone(),
            secret,
            self.oauth.redirect_uri.clone(),
        );
        client.scope = self.oauth.scope.clone();
        client.authorize_url = self.oauth.authorize_url.clone();
        client.token_url = self.oauth.token_url.clone();
        client.identity_url = self.oauth.identity_url.clone();
        client.client_auth = self.oauth.client_auth;
        client.timeout = self.timeout();
        Ok(client)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.timeout_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.oauth.state_ttl_secs)
    }
}

impl WebhookConfig {
    /// The signature header as a validated, lowercase header name.
    pub fn header_name(&self) -> common::Result<HeaderName> {
        HeaderName::from_bytes(self.signature_header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|_| {
                common::Error::Config(format!(
                    "webhook.signature_header is not a valid header name: {}",
                    self.signature_header
                ))
            })
    }
}
