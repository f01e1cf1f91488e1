//! Whop OAuth authentication library
//!
//! Provides CSRF state handling, authorization-code exchange, token refresh,
//! identity lookup and credential file storage for the Whop gateway. The
//! crate has no dependency on the HTTP service and is tested on its own.
//!
//! Credential flow:
//! 1. Gateway calls `StateCodec::issue()` and redirects to `OAuthClient::authorization_url()`
//! 2. Provider redirects back; `StateCodec::consume()` validates the state cookie
//! 3. `OAuthClient::exchange_code()` trades the code for tokens
//! 4. `OAuthClient::fetch_identity()` resolves the connecting account
//! 5. Tokens stored via `CredentialStore::upsert()`
//! 6. The broker crate calls `OAuthClient::refresh()` when a token goes stale

pub mod constants;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod state;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialStore, TokenFields, TokenRecord, now_millis};
pub use error::{Error, Result};
pub use identity::Identity;
pub use state::{IssuedState, StateCodec, sanitize_return_path};
pub use token::{ClientAuthMode, OAuthClient, OAuthClientConfig, TokenResponse};
