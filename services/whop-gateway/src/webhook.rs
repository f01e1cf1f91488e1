//! `POST /webhook`

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::debug;

use crate::AppState;
use crate::error::Error;

/// Verify and apply one provider delivery.
///
/// The body is taken as raw bytes so the signature is checked against
/// exactly what was sent.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    // A header that is present but not text still counts as a bad signature.
    let signature = headers
        .get(&state.signature_header)
        .map(|v| String::from_utf8_lossy(v.as_bytes()));

    let outcome = state.webhooks.handle(&body, signature.as_deref()).await?;
    debug!(outcome = outcome.as_str(), bytes = body.len(), "webhook processed");

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!({ "received": true }).to_string(),
    ))
}
