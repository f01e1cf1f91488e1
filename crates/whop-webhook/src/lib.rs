//! Whop webhook intake
//!
//! Verifies the HMAC signature over the exact request bytes, parses the event
//! envelope and applies membership transitions to the profile store. Every
//! handler is idempotent: the provider redelivers on any non-2xx response and
//! may deliver events out of order.
//!
//! [`ProfileStore`] is also the API for code embedding this crate. Besides
//! what webhooks and member sync write, it exposes
//! [`ProfileStore::increment_xp`] for awarding XP; the gateway has no route
//! for it.

pub mod dispatch;
pub mod error;
pub mod event;
pub mod profiles;
pub mod signature;

pub use dispatch::{Outcome, WebhookDispatcher};
pub use error::{Error, Result};
pub use event::{EventType, MembershipData, WebhookEvent};
pub use profiles::{Profile, ProfileStore, ProfileUpdate};
pub use signature::verify_signature;
