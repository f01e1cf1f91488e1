//! Identity lookup for a freshly issued access token
//!
//! The callback needs a stable key for the connected account before it can
//! store anything. The provider's `me` endpoint supplies it.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::token::OAuthClient;

/// The user behind an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub external_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    /// Extract an identity from the `me` response body.
    ///
    /// `id` must be present and non-empty. Numeric ids are accepted and kept
    /// in their decimal form.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let external_user_id = match value.get("id") {
            Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => {
                return Err(Error::Identity(
                    "identity response has no usable id field".into(),
                ));
            }
        };

        let text = |field: &str| {
            value
                .get(field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            external_user_id,
            username: text("username"),
            email: text("email"),
        })
    }
}

impl OAuthClient {
    /// Look up the user behind `access_token`.
    pub async fn fetch_identity(&self, access_token: &str) -> Result<Identity> {
        let response = self
            .http
            .get(&self.config.identity_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Identity(format!("identity request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Identity(format!("reading identity response: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "identity endpoint rejected token");
            return Err(Error::Identity(format!(
                "identity endpoint returned {status}: {body}"
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            Error::Identity(format!("identity response is not JSON ({e}): {body}"))
        })?;
        let identity = Identity::from_json(&value)?;
        debug!(user_id = %identity.external_user_id, "resolved identity");
        Ok(identity)
    }
}
