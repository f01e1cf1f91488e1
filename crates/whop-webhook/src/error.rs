//! Error types for webhook intake

/// Errors from verifying or applying a webhook delivery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No signature header, or no webhook secret configured to check it with.
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The profile store could not persist the change. Surfaced as a server
    /// error so the provider redelivers.
    #[error("profile storage failed: {0}")]
    Storage(String),
}

impl From<common::Error> for Error {
    fn from(e: common::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Result alias for webhook operations.
pub type Result<T> = std::result::Result<T, Error>;
