//! Verify-then-apply pipeline for a single webhook delivery

use std::sync::Arc;

use common::Secret;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::{EventType, WebhookEvent};
use crate::profiles::{ProfileStore, ProfileUpdate};
use crate::signature::verify_signature;

/// Which branch a delivery took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A profile was created or updated.
    Applied,
    /// The event referred to a user with no profile; nothing to change.
    NoOp,
    /// Payment event, logged for audit only.
    Recorded,
    /// Unknown event type, acknowledged without action.
    Ignored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::NoOp => "noop",
            Outcome::Recorded => "recorded",
            Outcome::Ignored => "ignored",
        }
    }
}

pub struct WebhookDispatcher {
    secret: Option<Secret<String>>,
    profiles: Arc<ProfileStore>,
}

impl WebhookDispatcher {
    /// Without a secret every delivery fails `MissingSignature`; unsigned
    /// events are never applied.
    pub fn new(secret: Option<Secret<String>>, profiles: Arc<ProfileStore>) -> Self {
        if secret.is_none() {
            warn!("no webhook secret configured, all deliveries will be rejected");
        }
        Self { secret, profiles }
    }

    /// Verify and apply one delivery.
    pub async fn handle(&self, raw_body: &[u8], signature: Option<&str>) -> Result<Outcome> {
        let result = self.verify_and_apply(raw_body, signature).await;
        match &result {
            Ok((event_type, outcome)) => record(*event_type, outcome.as_str()),
            Err((event_type, e)) => {
                warn!(event_type, error = %e, "webhook rejected");
                record(*event_type, error_label(e));
            }
        }
        result.map(|(_, outcome)| outcome).map_err(|(_, e)| e)
    }

    async fn verify_and_apply(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> std::result::Result<(&'static str, Outcome), (&'static str, Error)> {
        let (Some(secret), Some(signature)) = (self.secret.as_ref(), signature) else {
            return Err(("unknown", Error::MissingSignature));
        };
        verify_signature(secret.expose().as_bytes(), raw_body, signature)
            .map_err(|e| ("unknown", e))?;

        let event = WebhookEvent::parse(raw_body).map_err(|e| ("unknown", e))?;
        let label = event.event_type.label();
        let outcome = self.apply(&event).await.map_err(|e| (label, e))?;
        Ok((label, outcome))
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<Outcome> {
        match &event.event_type {
            EventType::MembershipActivated => {
                let membership = event.membership()?;
                self.profiles
                    .upsert(ProfileUpdate {
                        whop_user_id: membership.user_id.clone(),
                        username: membership.username,
                        email: membership.email,
                        community_id: membership.company_id,
                        active: Some(true),
                    })
                    .await?;
                info!(user_id = %membership.user_id, "membership activated");
                Ok(Outcome::Applied)
            }
            EventType::MembershipDeactivated => {
                let membership = event.membership()?;
                if self.profiles.set_active(&membership.user_id, false).await? {
                    info!(user_id = %membership.user_id, "membership deactivated");
                    Ok(Outcome::Applied)
                } else {
                    info!(user_id = %membership.user_id, "deactivation for unknown user, nothing to do");
                    Ok(Outcome::NoOp)
                }
            }
            EventType::PaymentSucceeded | EventType::PaymentFailed => {
                info!(
                    event_type = event.event_type.name(),
                    payment_id = event.data.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                    user_id = event.data.get("user_id").and_then(|v| v.as_str()).unwrap_or(""),
                    "payment event recorded"
                );
                Ok(Outcome::Recorded)
            }
            EventType::Other(name) => {
                info!(event_type = %name, "unhandled webhook event");
                Ok(Outcome::Ignored)
            }
        }
    }
}

fn error_label(e: &Error) -> &'static str {
    match e {
        Error::MissingSignature => "missing_signature",
        Error::InvalidSignature => "invalid_signature",
        Error::MalformedPayload(_) => "malformed",
        Error::Storage(_) => "storage_error",
    }
}

fn record(event_type: &'static str, outcome: &'static str) {
    metrics::counter!("webhook_events_total", "event_type" => event_type, "outcome" => outcome)
        .increment(1);
}
