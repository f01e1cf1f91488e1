//! `/oauth/start` and `/oauth/callback`
//!
//! Start mints state and redirects the browser to the provider. Callback
//! checks the state cookie, exchanges the code, resolves the connecting user
//! and stores the user's profile and then the credential before redirecting
//! back to the frontend. The state cookie is cleared on every callback
//! response, successful or not.

use axum::extract::{Query, State};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};
use whop_auth::{TokenFields, sanitize_return_path};
use whop_webhook::ProfileUpdate;

use crate::AppState;
use crate::error::Error;
use crate::metrics::record_callback;

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Redirect to the provider's consent page with a fresh state cookie.
pub async fn start_handler(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Response, Error> {
    let return_path = sanitize_return_path(query.next.as_deref());
    let issued = state.codec.issue(&return_path)?;
    let url = state.oauth.authorization_url(&issued.nonce)?;

    info!(return_path = %return_path, "starting OAuth authorization");
    Ok((
        StatusCode::FOUND,
        [(LOCATION, url), (SET_COOKIE, issued.set_cookie)],
    )
        .into_response())
}

/// Complete the authorization-code flow.
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let clear_cookie = query
        .state
        .as_deref()
        .and_then(|s| state.codec.clear_cookie(s));

    let mut response = match complete(&state, query, &headers, &request_id).await {
        Ok(return_path) => {
            record_callback("success");
            let location = format!("{}{}", state.frontend_origin, return_path);
            (StatusCode::FOUND, [(LOCATION, location)]).into_response()
        }
        Err(e) => {
            let outcome = outcome_label(&e);
            warn!(
                request_id = %request_id,
                outcome,
                status = e.status().as_u16(),
                error = %e,
                "OAuth callback failed"
            );
            record_callback(outcome);
            e.into_response()
        }
    };

    if let Some(value) = clear_cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

async fn complete(
    state: &AppState,
    query: CallbackQuery,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<String, Error> {
    if let Some(error) = query.error.filter(|e| !e.is_empty()) {
        let detail = query.error_description.unwrap_or_default();
        return Err(Error::BadRequest(
            format!("authorization denied: {error} {detail}").trim_end().to_string(),
        ));
    }

    let (Some(code), Some(nonce)) = (
        query.code.filter(|c| !c.is_empty()),
        query.state.filter(|s| !s.is_empty()),
    ) else {
        return Err(Error::BadRequest("missing code or state".into()));
    };

    let cookie_header = headers.get(COOKIE).and_then(|v| v.to_str().ok());
    let return_path = state.codec.consume(&nonce, cookie_header)?;

    let tokens = state.oauth.exchange_code(&code).await?;
    let identity = state.oauth.fetch_identity(&tokens.access_token).await?;
    let account_id = identity.external_user_id.clone();

    // Profile first: a failed callback must not leave the account connected.
    state
        .profiles
        .upsert(ProfileUpdate {
            whop_user_id: account_id.clone(),
            username: identity.username,
            email: identity.email,
            community_id: None,
            active: None,
        })
        .await?;

    let record = state
        .credentials
        .upsert(&account_id, TokenFields::from_exchange(tokens))
        .await?;

    info!(
        request_id,
        account_id = %account_id,
        expires_at = record.expires_at,
        scopes = record.scope.len(),
        "account connected"
    );
    Ok(return_path)
}

fn outcome_label(e: &Error) -> &'static str {
    match e {
        Error::BadRequest(msg) if msg.starts_with("authorization denied") => "denied",
        Error::BadRequest(_) => "bad_request",
        Error::Auth(whop_auth::Error::InvalidState(_)) => "invalid_state",
        Error::Auth(whop_auth::Error::Identity(_)) => "identity_error",
        Error::Auth(inner) if inner.is_rejection() => "rejected",
        Error::Auth(whop_auth::Error::Store(_)) | Error::Storage(_) => "storage_error",
        _ => "upstream_error",
    }
}
