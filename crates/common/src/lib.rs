//! Common types for the Whop gateway workspace

mod error;
pub mod persist;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
