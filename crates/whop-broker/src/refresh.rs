//! Request-time token refresh
//!
//! There is no background timer: a token is refreshed lazily when someone
//! asks for it and it expires within `REFRESH_SKEW`. Refreshing ahead of the
//! hard expiry keeps a request from leaving with a token that dies in flight.
//!
//! Refresh tokens may be single-use, so two callers must never refresh the
//! same account at once. The first stale caller opens an in-flight slot for
//! the account and runs the read-decide-refresh-write sequence inside it.
//! Every caller that joins the slot gets that one result, failure included,
//! and the slot is dropped once it settles so a later call may try again.
//! Accounts never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use whop_auth::{CredentialStore, OAuthClient, TokenFields, TokenRecord, now_millis};

use crate::error::{Error, Result};

/// Refresh when the token has less than this long to live.
pub const REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// One settled or pending refresh, shared by everyone who asked during it.
type InFlight = Arc<OnceCell<Result<String>>>;

/// Hands out usable access tokens, refreshing stale ones first.
pub struct RefreshScheduler {
    store: Arc<CredentialStore>,
    client: Arc<OAuthClient>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl RefreshScheduler {
    pub fn new(store: Arc<CredentialStore>, client: Arc<OAuthClient>) -> Self {
        Self {
            store,
            client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return an access token for `account_id` that is good for at least
    /// `REFRESH_SKEW`.
    pub async fn get_usable_token(&self, account_id: &str) -> Result<String> {
        let record = self.load(account_id).await?;
        if !expires_soon(&record) {
            debug!(account_id, "stored token still fresh");
            return Ok(record.access_token);
        }

        let slot = self.slot_for(account_id).await;
        let result = slot
            .get_or_init(|| self.settle(account_id))
            .await
            .clone();

        self.release_slot(account_id, &slot).await;
        result
    }

    async fn settle(&self, account_id: &str) -> Result<String> {
        // A refresh that finished just before this slot opened.
        let record = self.load(account_id).await?;
        if !expires_soon(&record) {
            debug!(account_id, "token refreshed by concurrent caller");
            return Ok(record.access_token);
        }
        self.refresh_record(&record).await
    }

    async fn refresh_record(&self, record: &TokenRecord) -> Result<String> {
        let account_id = record.account_id.as_str();
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            warn!(account_id, "token expiring but no refresh token stored");
            record_outcome("no_refresh_token");
            return Err(Error::RefreshFailed(format!(
                "no refresh token stored for {account_id}"
            )));
        };

        debug!(account_id, expires_at = record.expires_at, "token expiring soon, refreshing");

        let response = match self.client.refresh(refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(account_id, error = %e, "token refresh failed, stored record kept");
                record_outcome(if e.is_rejection() { "rejected" } else { "error" });
                return Err(Error::RefreshFailed(e.to_string()));
            }
        };

        let fields = TokenFields::from_refresh(response, record);
        let updated = self.store.upsert(account_id, fields).await.map_err(|e| {
            warn!(account_id, error = %e, "failed to persist refreshed token");
            record_outcome("store_error");
            Error::RefreshFailed(format!("persisting refreshed token: {e}"))
        })?;

        info!(account_id, expires_at = updated.expires_at, "token refreshed");
        record_outcome("refreshed");
        Ok(updated.access_token)
    }

    async fn load(&self, account_id: &str) -> Result<TokenRecord> {
        self.store
            .get(account_id)
            .await
            .ok_or_else(|| Error::NoConnection(account_id.to_string()))
    }

    async fn slot_for(&self, account_id: &str) -> InFlight {
        let mut in_flight = self.in_flight.lock().await;
        in_flight
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop a settled slot unless a newer one already replaced it.
    async fn release_slot(&self, account_id: &str, slot: &InFlight) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(account_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            in_flight.remove(account_id);
        }
    }
}

fn expires_soon(record: &TokenRecord) -> bool {
    record.expires_at < now_millis().saturating_add(REFRESH_SKEW.as_millis() as u64)
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("token_refresh_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use common::Secret;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use whop_auth::OAuthClientConfig;

    /// Mock token endpoint counting refresh calls. Each call waits briefly so
    /// concurrent callers genuinely overlap.
    async fn start_token_server(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route(
                "/token",
                post(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    (status, [("content-type", "application/json")], body)
                }),
            )
            .with_state(hits.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/token"), hits)
    }

    fn client(token_url: &str) -> Arc<OAuthClient> {
        let mut config = OAuthClientConfig::new(
            "app_test".into(),
            Secret::new("secret_test".into()),
            "https://gateway.test/oauth/callback".into(),
        );
        config.token_url = token_url.to_string();
        config.timeout = Duration::from_secs(5);
        Arc::new(OAuthClient::new(config).unwrap())
    }

    /// Store with one account whose token expires `expires_in` seconds from now.
    async fn store_with(dir: &tempfile::TempDir, expires_in: u64) -> Arc<CredentialStore> {
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        store
            .upsert(
                "biz_1",
                TokenFields {
                    access_token: "at_old".into(),
                    refresh_token: Some("rt_old".into()),
                    token_type: "Bearer".into(),
                    scope: vec![],
                    expires_in,
                },
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    const FRESH_TOKEN: &str = r#"{"access_token":"at_new","refresh_token":"rt_new","expires_in":3600}"#;

    #[tokio::test]
    async fn fresh_token_returned_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = start_token_server(StatusCode::OK, FRESH_TOKEN).await;
        let scheduler = RefreshScheduler::new(store_with(&dir, 600).await, client(&url));

        let token = scheduler.get_usable_token("biz_1").await.unwrap();
        assert_eq!(token, "at_old");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_account_is_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            RefreshScheduler::new(store_with(&dir, 600).await, client("http://127.0.0.1:1/token"));

        assert!(matches!(
            scheduler.get_usable_token("biz_missing").await,
            Err(Error::NoConnection(id)) if id == "biz_missing"
        ));
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = start_token_server(StatusCode::OK, FRESH_TOKEN).await;
        let store = store_with(&dir, 60).await;
        let before = store.get("biz_1").await.unwrap();
        let scheduler = RefreshScheduler::new(store.clone(), client(&url));

        let token = scheduler.get_usable_token("biz_1").await.unwrap();
        assert_eq!(token, "at_new");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let after = store.get("biz_1").await.unwrap();
        assert_eq!(after.access_token, "at_new");
        assert_eq!(after.refresh_token.as_deref(), Some("rt_new"));
        assert_eq!(after.connected_at, before.connected_at);
        assert!(after.expires_at > before.expires_at);

        // Second call rides the fresh record
        assert_eq!(scheduler.get_usable_token("biz_1").await.unwrap(), "at_new");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _) =
            start_token_server(StatusCode::OK, r#"{"access_token":"at_new","expires_in":3600}"#)
                .await;
        let store = store_with(&dir, 0).await;
        let scheduler = RefreshScheduler::new(store.clone(), client(&url));

        scheduler.get_usable_token("biz_1").await.unwrap();
        let record = store.get("biz_1").await.unwrap();
        assert_eq!(record.refresh_token.as_deref(), Some("rt_old"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = start_token_server(StatusCode::OK, FRESH_TOKEN).await;
        let scheduler = Arc::new(RefreshScheduler::new(store_with(&dir, 60).await, client(&url)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            tasks.spawn(async move { scheduler.get_usable_token("biz_1").await });
        }

        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), "at_new");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1, "exactly one refresh under contention");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) =
            start_token_server(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).await;
        let scheduler = Arc::new(RefreshScheduler::new(store_with(&dir, 60).await, client(&url)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            tasks.spawn(async move { scheduler.get_usable_token("biz_1").await });
        }

        let mut failures = 0;
        while let Some(result) = tasks.join_next().await {
            assert!(matches!(result.unwrap(), Err(Error::RefreshFailed(_))));
            failures += 1;
        }
        assert_eq!(failures, 8);
        assert_eq!(hits.load(Ordering::SeqCst), 1, "waiters reuse the failed result");

        // The settled slot is gone; a later call tries again.
        assert!(scheduler.get_usable_token("biz_1").await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) =
            start_token_server(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).await;
        let store = store_with(&dir, 60).await;
        let before = store.get("biz_1").await.unwrap();
        let scheduler = RefreshScheduler::new(store.clone(), client(&url));

        let err = scheduler.get_usable_token("biz_1").await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(ref msg) if msg.contains("invalid_grant")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let after = store.get("biz_1").await.unwrap();
        assert_eq!(after.access_token, before.access_token);
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = start_token_server(StatusCode::OK, FRESH_TOKEN).await;
        let store = CredentialStore::load(dir.path().join("c.json")).await.unwrap();
        store
            .upsert(
                "biz_2",
                TokenFields {
                    access_token: "at".into(),
                    refresh_token: None,
                    token_type: "Bearer".into(),
                    scope: vec![],
                    expires_in: 10,
                },
            )
            .await
            .unwrap();
        let scheduler = RefreshScheduler::new(Arc::new(store), client(&url));

        assert!(matches!(
            scheduler.get_usable_token("biz_2").await,
            Err(Error::RefreshFailed(_))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn separate_accounts_refresh_independently() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = start_token_server(StatusCode::OK, FRESH_TOKEN).await;
        let store = store_with(&dir, 60).await;
        store
            .upsert(
                "biz_2",
                TokenFields {
                    access_token: "at_other".into(),
                    refresh_token: Some("rt_other".into()),
                    token_type: "Bearer".into(),
                    scope: vec![],
                    expires_in: 60,
                },
            )
            .await
            .unwrap();
        let scheduler = Arc::new(RefreshScheduler::new(store, client(&url)));

        let (a, b) = tokio::join!(
            scheduler.get_usable_token("biz_1"),
            scheduler.get_usable_token("biz_2")
        );
        assert_eq!(a.unwrap(), "at_new");
        assert_eq!(b.unwrap(), "at_new");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
