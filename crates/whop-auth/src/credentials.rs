//! Credential storage for connected accounts
//!
//! Keeps one `TokenRecord` per connected account in a JSON file. All writes
//! use atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes writers; the new state is committed in memory only after the
//! file write succeeds, so a failed write leaves the previous record intact.
//!
//! The store never validates or refreshes tokens. It is the single source of
//! truth the refresh broker and the membership sync read from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{DEFAULT_EXPIRES_IN_SECS, DEFAULT_TOKEN_TYPE};
use crate::error::Result;
use crate::token::TokenResponse;

/// One connected account's OAuth credential.
///
/// All timestamps are unix milliseconds. `expires_at` is always computed from
/// the issuing response's TTL plus the write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub account_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub expires_at: u64,
    pub connected_at: u64,
    pub last_refreshed_at: u64,
}

/// Token fields written by an exchange or a refresh.
#[derive(Debug, Clone)]
pub struct TokenFields {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Vec<String>,
    /// Seconds until expiry, relative to the moment of the write.
    pub expires_in: u64,
}

impl TokenFields {
    /// Fields from an initial code exchange.
    pub fn from_exchange(response: TokenResponse) -> Self {
        let scope = response.scopes().unwrap_or_default();
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope,
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        }
    }

    /// Fields from a refresh response. Anything the provider left out
    /// (a rotated refresh token, scope, token type) is carried forward from
    /// the record being refreshed.
    pub fn from_refresh(response: TokenResponse, previous: &TokenRecord) -> Self {
        let scope = response
            .scopes()
            .unwrap_or_else(|| previous.scope.clone());
        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous.refresh_token.clone()),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| previous.token_type.clone()),
            scope,
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        }
    }
}

/// Thread-safe credential file manager.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, TokenRecord>>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start with no
    /// connected accounts).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let records: HashMap<String, TokenRecord> = common::persist::load_or_init(&path).await?;
        info!(path = %path.display(), accounts = records.len(), "loaded credentials");
        Ok(Self {
            path,
            state: Mutex::new(records),
        })
    }

    /// Get a clone of a specific record.
    pub async fn get(&self, account_id: &str) -> Option<TokenRecord> {
        let state = self.state.lock().await;
        state.get(account_id).cloned()
    }

    /// Insert or fully replace the token fields for `account_id`.
    ///
    /// `connected_at` survives from an existing record; `last_refreshed_at`
    /// and `expires_at` are stamped with the current time.
    pub async fn upsert(&self, account_id: &str, fields: TokenFields) -> Result<TokenRecord> {
        let now = now_millis();
        let mut state = self.state.lock().await;

        let connected_at = state
            .get(account_id)
            .map(|existing| existing.connected_at)
            .unwrap_or(now);

        let record = TokenRecord {
            account_id: account_id.to_string(),
            access_token: fields.access_token,
            refresh_token: fields.refresh_token,
            token_type: fields.token_type,
            scope: fields.scope,
            expires_at: now.saturating_add(fields.expires_in.saturating_mul(1000)),
            connected_at,
            last_refreshed_at: now,
        };

        let mut next = state.clone();
        next.insert(account_id.to_string(), record.clone());
        common::persist::write_atomic(&self.path, &next).await?;
        *state = next;

        debug!(account_id, expires_at = record.expires_at, "stored credential");
        Ok(record)
    }

    /// List all account IDs.
    pub async fn account_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.keys().cloned().collect()
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
