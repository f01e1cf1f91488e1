//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (callback completion)
//! 2. Token refresh (on demand, when a stored token is about to expire)
//!
//! Both POST a form-encoded body to the token endpoint with different grant
//! types. Client authentication is either `client_secret` in the body or an
//! HTTP Basic header; the mode is fixed by configuration, never probed.
//!
//! Neither call retries. Authorization codes are single-use and refresh
//! tokens may rotate, so a second attempt would at best fail and at worst
//! burn a credential the first attempt already consumed.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_SCOPES, IDENTITY_ENDPOINT, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Where the client secret goes on token endpoint requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// `client_id` + `client_secret` form fields
    #[default]
    RequestBody,
    /// `Authorization: Basic base64(client_id:client_secret)`
    BasicHeader,
}

/// Everything the client needs to talk to the provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub identity_url: String,
    pub client_auth: ClientAuthMode,
    pub timeout: Duration,
}

impl OAuthClientConfig {
    /// Config pointing at the public Whop endpoints.
    pub fn new(client_id: String, client_secret: Secret<String>, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scope: DEFAULT_SCOPES.to_string(),
            authorize_url: AUTHORIZE_ENDPOINT.to_string(),
            token_url: TOKEN_ENDPOINT.to_string(),
            identity_url: IDENTITY_ENDPOINT.to_string(),
            client_auth: ClientAuthMode::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Response from the token endpoint for both exchange and refresh.
///
/// Only `access_token` is mandatory. Providers may omit a rotated
/// `refresh_token` on refresh, and `expires_in` is a delta in seconds that the
/// credential store turns into an absolute timestamp at write time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Granted scopes, split from the space-separated wire value.
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

/// Provider OAuth client. Cheap to share behind an `Arc`.
pub struct OAuthClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: OAuthClientConfig,
}

impl OAuthClient {
    /// Build a client whose every request is bounded by `config.timeout`.
    pub fn new(config: OAuthClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Build the provider authorization URL carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.config.authorize_url)))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        self.token_request(
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
            "exchange",
        )
        .await
    }

    /// Obtain a new access token with a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            "refresh",
        )
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)], op: &'static str) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));

        let mut request = self.http.post(&self.config.token_url);
        match self.config.client_auth {
            ClientAuthMode::RequestBody => {
                form.push(("client_secret", self.config.client_secret.expose().as_str()));
            }
            ClientAuthMode::BasicHeader => {
                request = request.basic_auth(
                    &self.config.client_id,
                    Some(self.config.client_secret.expose()),
                );
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token {op} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading token {op} response: {e}")))?;

        if !status.is_success() {
            warn!(op, status = status.as_u16(), body = %body, "token endpoint rejected request");
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(token) if !token.access_token.is_empty() => {
                debug!(op, expires_in = ?token.expires_in, "token endpoint succeeded");
                Ok(token)
            }
            _ => {
                warn!(op, body = %body, "token endpoint returned an unusable body");
                Err(Error::TokenExchange {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
