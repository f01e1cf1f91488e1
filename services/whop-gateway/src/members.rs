//! `POST /members/sync?account=<id>`
//!
//! Pulls the connected company's membership list with a usable token from the
//! broker and upserts one profile per member. A member that cannot be stored
//! is counted as an error; the sync carries on with the rest.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use whop_webhook::ProfileUpdate;

use crate::AppState;
use crate::error::Error;

const UNKNOWN_USERNAME: &str = "Unknown";

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    account: Option<String>,
}

pub async fn sync_handler(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<impl IntoResponse, Error> {
    let Some(account) = query.account.filter(|a| !a.trim().is_empty()) else {
        return Err(Error::BadRequest("missing account".into()));
    };

    let token = state.broker.get_usable_token(&account).await?;
    let members = fetch_memberships(&state, &token).await?;

    let mut synced = 0usize;
    let mut errors = 0usize;
    for member in &members {
        let Some(mut update) = profile_update(member, &account) else {
            warn!(account = %account, "membership without user id skipped");
            errors += 1;
            continue;
        };
        let user_id = update.whop_user_id.clone();
        // The placeholder name only goes on new profiles.
        if update.username.is_none() && state.profiles.get(&user_id).await.is_none() {
            update.username = Some(UNKNOWN_USERNAME.to_string());
        }
        match state.profiles.upsert(update).await {
            Ok(_) => synced += 1,
            Err(e) => {
                warn!(account = %account, user_id = %user_id, error = %e, "failed to sync member");
                errors += 1;
            }
        }
    }

    info!(account = %account, synced, errors, "membership sync finished");
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!({ "synced": synced, "errors": errors }).to_string(),
    ))
}

/// GET the membership list. Accepts either a bare array or a `{"data": [...]}`
/// page.
async fn fetch_memberships(state: &AppState, token: &str) -> Result<Vec<Value>, Error> {
    let response = state
        .http
        .get(&state.memberships_url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("membership list request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Upstream(format!("reading membership list: {e}")))?;
    if !status.is_success() {
        warn!(status = status.as_u16(), body = %body, "membership list request rejected");
        return Err(Error::Upstream(format!("membership list returned {status}")));
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| Error::Upstream(format!("membership list is not JSON: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut page) => match page.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::Upstream("membership list has no data array".into())),
        },
        _ => Err(Error::Upstream("unexpected membership list shape".into())),
    }
}

fn profile_update(member: &Value, account: &str) -> Option<ProfileUpdate> {
    let user = member.get("user");
    let user_id = member
        .get("user_id")
        .and_then(id_string)
        .or_else(|| user.and_then(|u| u.get("id")).and_then(id_string))?;

    let user_text = |field: &str| {
        user.and_then(|u| u.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(ProfileUpdate {
        whop_user_id: user_id,
        email: user_text("email"),
        username: user_text("username").or_else(|| user_text("name")),
        community_id: Some(account.to_string()),
        active: None,
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
