//! Webhook event envelope
//!
//! Deliveries look like `{"type": "<name>", "data": {...}}`. Only the
//! membership events carry fields the gateway acts on; everything else is
//! recorded by type and acknowledged.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Event types the gateway distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    MembershipActivated,
    MembershipDeactivated,
    PaymentSucceeded,
    PaymentFailed,
    Other(String),
}

impl EventType {
    fn from_name(name: &str) -> Self {
        match name {
            "membership_activated" => Self::MembershipActivated,
            "membership_deactivated" => Self::MembershipDeactivated,
            "payment_succeeded" => Self::PaymentSucceeded,
            "payment_failed" => Self::PaymentFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Bounded label for metrics; unknown names collapse to `other`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MembershipActivated => "membership_activated",
            Self::MembershipDeactivated => "membership_deactivated",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::Other(_) => "other",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Other(name) => name,
            known => known.label(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A parsed delivery.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// The fields of a membership event the profile store needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipData {
    pub user_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub company_id: Option<String>,
}

impl WebhookEvent {
    /// Parse the raw delivery body. A body that is not JSON or has no
    /// string `type` is malformed.
    pub fn parse(raw_body: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(raw_body)
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        if envelope.event_type.is_empty() {
            return Err(Error::MalformedPayload("empty event type".into()));
        }
        Ok(Self {
            event_type: EventType::from_name(&envelope.event_type),
            data: envelope.data,
        })
    }

    /// Membership fields from `data.user` and `data.company_id`.
    ///
    /// The user id falls back to `data.user_id` when there is no nested user
    /// object. A membership event without a user id is malformed.
    pub fn membership(&self) -> Result<MembershipData> {
        let user = self.data.get("user");
        let user_id = user
            .and_then(|u| u.get("id"))
            .and_then(id_string)
            .or_else(|| self.data.get("user_id").and_then(id_string))
            .ok_or_else(|| {
                Error::MalformedPayload(format!("{} event has no user id", self.event_type.name()))
            })?;

        let user_text = |field: &str| {
            user.and_then(|u| u.get(field))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(MembershipData {
            user_id,
            email: user_text("email"),
            username: user_text("username"),
            company_id: self.data.get("company_id").and_then(id_string),
        })
    }
}

fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
