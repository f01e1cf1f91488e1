//! Request errors and their HTTP mapping
//!
//! Every failure leaves the gateway as `{"error": "<message>"}` JSON with the
//! status below. Upstream response bodies are logged where they occur and
//! never echoed to the caller.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unusable request parameters.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] whop_auth::Error),

    #[error(transparent)]
    Broker(#[from] whop_broker::Error),

    #[error(transparent)]
    Webhook(#[from] whop_webhook::Error),

    #[error("profile storage failed: {0}")]
    Storage(#[from] common::Error),

    /// A provider API call outside the token endpoint failed.
    #[error("provider request failed: {0}")]
    Upstream(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Auth(e) => match e {
                whop_auth::Error::InvalidState(_) => StatusCode::BAD_REQUEST,
                e if e.is_rejection() => StatusCode::UNAUTHORIZED,
                whop_auth::Error::Http(_)
                | whop_auth::Error::TokenExchange { .. }
                | whop_auth::Error::Identity(_) => StatusCode::BAD_GATEWAY,
                whop_auth::Error::Store(_)
                | whop_auth::Error::InvalidUrl(_)
                | whop_auth::Error::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Broker(e) => match e {
                whop_broker::Error::NoConnection(_) => StatusCode::NOT_FOUND,
                whop_broker::Error::RefreshFailed(_) => StatusCode::BAD_GATEWAY,
            },
            Error::Webhook(e) => match e {
                whop_webhook::Error::MissingSignature => StatusCode::BAD_REQUEST,
                whop_webhook::Error::InvalidSignature => StatusCode::UNAUTHORIZED,
                whop_webhook::Error::MalformedPayload(_) => StatusCode::BAD_REQUEST,
                whop_webhook::Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Caller-facing message. Token endpoint bodies are reduced to the status.
    fn message(&self) -> String {
        match self {
            Error::Auth(whop_auth::Error::TokenExchange { status, .. })
                if self.status() == StatusCode::UNAUTHORIZED =>
            {
                format!("authorization rejected by provider ({status})")
            }
            Error::Auth(whop_auth::Error::TokenExchange { status, .. }) => {
                format!("token endpoint returned {status}")
            }
            Error::Broker(whop_broker::Error::RefreshFailed(_)) => {
                "stored credential could not be refreshed; reconnect the account".into()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message() });
        (
            self.status(),
            [(CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
