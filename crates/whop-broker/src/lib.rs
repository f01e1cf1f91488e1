//! Usable-token broker for connected Whop accounts
//!
//! Collaborators that call the provider on behalf of an account ask the
//! broker for a token instead of reading the credential store directly. The
//! broker hands back the stored access token while it has more than five
//! minutes to live and refreshes it first otherwise.
//!
//! Refresh lifecycle:
//! 1. Caller asks for a token → fresh record returned with no network call
//! 2. Record expiring soon → per-account lock taken, record re-read
//! 3. Still stale → one refresh against the token endpoint, result persisted
//! 4. Concurrent callers queued on the lock see the new record and return it
//! 5. Refresh rejected → `RefreshFailed`, stored record left as it was

pub mod error;
pub mod refresh;

pub use error::{Error, Result};
pub use refresh::{REFRESH_SKEW, RefreshScheduler};
