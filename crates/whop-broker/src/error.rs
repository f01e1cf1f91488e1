//! Error types for token broker operations

/// Errors from the token broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No credential stored; the account must go through OAuth first.
    #[error("no connected account: {0}")]
    NoConnection(String),

    /// The provider rejected or failed the refresh. The stored record is
    /// unchanged.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
