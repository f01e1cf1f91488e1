//! Whop OAuth endpoints and protocol constants
//!
//! Endpoint URLs are defaults only. Every one of them can be overridden in the
//! gateway config so tests can point the client at a local mock provider.

/// Authorization endpoint the browser is redirected to
pub const AUTHORIZE_ENDPOINT: &str = "https://whop.com/oauth/authorize";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://api.whop.com/v5/oauth/token";

/// Identity endpoint returning the user behind an access token
pub const IDENTITY_ENDPOINT: &str = "https://api.whop.com/v5/me/user";

/// Membership listing for the connected company
pub const MEMBERSHIPS_ENDPOINT: &str = "https://api.whop.com/v5/company/memberships";

/// Default scopes requested at authorization start.
pub const DEFAULT_SCOPES: &str = "member:basic:read payment:basic:read company:basic:read";

/// Name prefix of the state cookie; the nonce is appended after the dot.
pub const STATE_COOKIE_PREFIX: &str = "oauth-state.";

/// Upper bound on state cookie lifetime (10 minutes).
pub const MAX_STATE_TTL_SECS: u64 = 600;

/// TTL assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Token type assumed when the token endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
