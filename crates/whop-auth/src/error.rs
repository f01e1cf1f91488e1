//! Error types for OAuth authentication operations

/// Errors from OAuth authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure talking to the provider (connect error, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The token endpoint answered with a non-success status or a body that
    /// is not a token response. `body` is the raw upstream text.
    #[error("token endpoint returned {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("credential store error: {0}")]
    Store(#[from] common::Error),
}

impl Error {
    /// Whether the provider itself rejected the request (bad code, revoked
    /// refresh token, bad client credentials) as opposed to failing.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::TokenExchange { status, .. } if matches!(status, 400 | 401 | 403)
        )
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
