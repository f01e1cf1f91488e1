//! OAuth `state` parameter handling (CSRF defense for the callback)
//!
//! `issue` mints a random nonce that travels through the provider redirect as
//! the `state` query parameter. The post-login return path rides alongside in
//! an HTTP-only cookie named after that nonce, so only the browser that
//! started the flow can complete it. The cookie value is MAC'd together with
//! the nonce and issue time:
//!
//! ```text
//! oauth-state.<nonce>=<issued_at>.<base64url(return_path)>.<hex hmac>
//! ```
//!
//! An attacker who lures a victim to the callback with their own code cannot
//! produce the victim's cookie, and a cookie lifted from one flow does not
//! verify against another nonce.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha2::Sha256;
use tracing::debug;

use crate::constants::{MAX_STATE_TTL_SECS, STATE_COOKIE_PREFIX};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Longest nonce accepted back from the callback. Issued nonces are 43 chars.
const MAX_NONCE_LEN: usize = 128;

/// Output of [`StateCodec::issue`]: the `state` query value and the
/// `Set-Cookie` header that must accompany the redirect.
#[derive(Debug, Clone)]
pub struct IssuedState {
    pub nonce: String,
    pub set_cookie: String,
}

/// Mints and validates authorization state.
pub struct StateCodec {
    key: Secret<Vec<u8>>,
    ttl: Duration,
}

impl StateCodec {
    /// Create a codec with the given MAC key. TTLs above ten minutes are
    /// clamped; a zero TTL is raised to one second.
    pub fn new(key: Secret<Vec<u8>>, ttl: Duration) -> Self {
        let secs = ttl.as_secs().clamp(1, MAX_STATE_TTL_SECS);
        Self {
            key,
            ttl: Duration::from_secs(secs),
        }
    }

    /// Create a codec with a per-process random key. State issued before a
    /// restart will no longer verify, which only forces the user to retry.
    pub fn with_random_key(ttl: Duration) -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);
        Self::new(Secret::new(key.to_vec()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh state for a flow that should land on `return_path`.
    pub fn issue(&self, return_path: &str) -> Result<IssuedState> {
        self.issue_at(return_path, unix_secs())
    }

    fn issue_at(&self, return_path: &str, issued_at: u64) -> Result<IssuedState> {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        let nonce = URL_SAFE_NO_PAD.encode(bytes);

        let encoded_path = URL_SAFE_NO_PAD.encode(return_path.as_bytes());
        let mac = self.sign(&nonce, issued_at, &encoded_path)?;
        let value = format!("{issued_at}.{encoded_path}.{}", hex::encode(mac));

        let set_cookie = format!(
            "{STATE_COOKIE_PREFIX}{nonce}={value}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        );

        debug!(ttl_secs = self.ttl.as_secs(), "issued oauth state");
        Ok(IssuedState { nonce, set_cookie })
    }

    /// Validate the `state` parameter against the request's `Cookie` header
    /// and return the return path bound to it.
    pub fn consume(&self, state: &str, cookie_header: Option<&str>) -> Result<String> {
        self.consume_at(state, cookie_header, unix_secs())
    }

    fn consume_at(&self, state: &str, cookie_header: Option<&str>, now: u64) -> Result<String> {
        if !is_valid_nonce(state) {
            return Err(Error::InvalidState("malformed state parameter".into()));
        }

        let cookie_header =
            cookie_header.ok_or_else(|| Error::InvalidState("no cookies presented".into()))?;
        let value = find_cookie(cookie_header, state)
            .ok_or_else(|| Error::InvalidState("state cookie not found".into()))?;

        let mut parts = value.splitn(3, '.');
        let (Some(issued_at), Some(encoded_path), Some(mac_hex)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidState("malformed state cookie".into()));
        };

        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| Error::InvalidState("malformed state cookie timestamp".into()))?;
        let mac_bytes = hex::decode(mac_hex)
            .map_err(|_| Error::InvalidState("malformed state cookie signature".into()))?;

        let mut mac = self.mac()?;
        mac.update(signing_input(state, issued_at, encoded_path).as_bytes());
        mac.verify_slice(&mac_bytes)
            .map_err(|_| Error::InvalidState("state cookie signature mismatch".into()))?;

        if now >= issued_at.saturating_add(self.ttl.as_secs()) {
            return Err(Error::InvalidState("state expired".into()));
        }

        let path_bytes = URL_SAFE_NO_PAD
            .decode(encoded_path)
            .map_err(|_| Error::InvalidState("malformed return path".into()))?;
        String::from_utf8(path_bytes)
            .map_err(|_| Error::InvalidState("malformed return path".into()))
    }

    /// `Set-Cookie` header that deletes the state cookie once it is spent.
    ///
    /// Returns `None` when `state` is not a well-formed nonce, so attacker
    /// input never ends up in a response header.
    pub fn clear_cookie(&self, state: &str) -> Option<String> {
        is_valid_nonce(state).then(|| {
            format!("{STATE_COOKIE_PREFIX}{state}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
        })
    }

    fn sign(&self, nonce: &str, issued_at: u64, encoded_path: &str) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(signing_input(nonce, issued_at, encoded_path).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.key.expose())
            .map_err(|e| Error::Signing(format!("state key rejected: {e}")))
    }
}

/// Restrict a caller-supplied `next` value to a local absolute path.
///
/// Anything that could redirect off-site (`//host`, `https://…`, backslash
/// tricks) or carries control characters collapses to `/`.
pub fn sanitize_return_path(next: Option<&str>) -> String {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

fn signing_input(nonce: &str, issued_at: u64, encoded_path: &str) -> String {
    format!("{nonce}|{issued_at}|{encoded_path}")
}

fn is_valid_nonce(state: &str) -> bool {
    !state.is_empty()
        && state.len() <= MAX_NONCE_LEN
        && state
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn find_cookie<'a>(header: &'a str, nonce: &str) -> Option<&'a str> {
    let name = format!("{STATE_COOKIE_PREFIX}{nonce}");
    header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim())
    })
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> StateCodec {
        StateCodec::new(
            Secret::new(b"test-state-key".to_vec()),
            Duration::from_secs(600),
        )
    }

    /// Turn a Set-Cookie header into the Cookie header a browser would send.
    fn cookie_from(set_cookie: &str) -> String {
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[test]
    fn issue_then_consume_returns_path() {
        let codec = codec();
        let issued = codec.issue("/dashboard?tab=members").unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        let path = codec.consume(&issued.nonce, Some(&cookie)).unwrap();
        assert_eq!(path, "/dashboard?tab=members");
    }

    #[test]
    fn cookie_is_http_only_and_short_lived() {
        let issued = codec().issue("/").unwrap();
        assert!(issued.set_cookie.starts_with(&format!("oauth-state.{}=", issued.nonce)));
        assert!(issued.set_cookie.contains("HttpOnly"));
        assert!(issued.set_cookie.contains("SameSite=Lax"));
        assert!(issued.set_cookie.contains("Max-Age=600"));
    }

    #[test]
    fn nonces_are_unique_and_url_safe() {
        let codec = codec();
        let a = codec.issue("/").unwrap().nonce;
        let b = codec.issue("/").unwrap().nonce;
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(is_valid_nonce(&a));
    }

    #[test]
    fn consume_finds_cookie_among_others() {
        let codec = codec();
        let issued = codec.issue("/settings").unwrap();
        let header = format!(
            "theme=dark; {}; session=abc",
            cookie_from(&issued.set_cookie)
        );
        assert_eq!(
            codec.consume(&issued.nonce, Some(&header)).unwrap(),
            "/settings"
        );
    }

    #[test]
    fn missing_cookie_is_invalid() {
        let codec = codec();
        let issued = codec.issue("/").unwrap();
        assert!(matches!(
            codec.consume(&issued.nonce, None),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            codec.consume(&issued.nonce, Some("theme=dark")),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn tampered_state_parameter_is_invalid() {
        let codec = codec();
        let issued = codec.issue("/").unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        let mut forged = issued.nonce.clone();
        let last = forged.pop().unwrap();
        forged.push(if last == 'A' { 'B' } else { 'A' });

        assert!(matches!(
            codec.consume(&forged, Some(&cookie)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn cookie_renamed_to_another_nonce_is_invalid() {
        let codec = codec();
        let victim = codec.issue("/").unwrap();
        let attacker = codec.issue("/evil").unwrap();

        // Attacker's cookie value presented under the victim's nonce
        let attacker_value = cookie_from(&attacker.set_cookie)
            .split_once('=')
            .unwrap()
            .1
            .to_string();
        let header = format!("oauth-state.{}={attacker_value}", victim.nonce);

        assert!(matches!(
            codec.consume(&victim.nonce, Some(&header)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn tampered_return_path_is_invalid() {
        let codec = codec();
        let issued = codec.issue("/home").unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        let swapped = cookie.replace(
            &URL_SAFE_NO_PAD.encode("/home"),
            &URL_SAFE_NO_PAD.encode("/admin"),
        );
        assert_ne!(swapped, cookie);
        assert!(matches!(
            codec.consume(&issued.nonce, Some(&swapped)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn expired_state_is_invalid() {
        let codec = codec();
        let now = unix_secs();
        let issued = codec.issue_at("/", now - 601).unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        assert!(matches!(
            codec.consume_at(&issued.nonce, Some(&cookie), now),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn state_valid_until_ttl_boundary() {
        let codec = codec();
        let now = unix_secs();
        let issued = codec.issue_at("/inside", now - 599).unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        assert_eq!(
            codec.consume_at(&issued.nonce, Some(&cookie), now).unwrap(),
            "/inside"
        );
        assert!(codec
            .consume_at(&issued.nonce, Some(&cookie), now + 1)
            .is_err());
    }

    #[test]
    fn state_from_different_key_is_invalid() {
        let issued = codec().issue("/").unwrap();
        let cookie = cookie_from(&issued.set_cookie);

        let other = StateCodec::new(Secret::new(b"other-key".to_vec()), Duration::from_secs(600));
        assert!(other.consume(&issued.nonce, Some(&cookie)).is_err());
    }

    #[test]
    fn ttl_is_clamped_to_ten_minutes() {
        let codec = StateCodec::new(Secret::new(vec![1; 32]), Duration::from_secs(3600));
        assert_eq!(codec.ttl(), Duration::from_secs(600));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let codec = codec();
        let issued = codec.issue("/").unwrap();
        let clear = codec.clear_cookie(&issued.nonce).unwrap();
        assert!(clear.starts_with(&format!("oauth-state.{}=;", issued.nonce)));
        assert!(clear.contains("Max-Age=0"));

        assert!(codec.clear_cookie("bad value\r\nX-Injected: 1").is_none());
    }

    #[test]
    fn sanitize_keeps_local_paths() {
        assert_eq!(sanitize_return_path(Some("/app/home")), "/app/home");
        assert_eq!(sanitize_return_path(Some("/a?b=c")), "/a?b=c");
    }

    #[test]
    fn sanitize_rejects_offsite_targets() {
        assert_eq!(sanitize_return_path(None), "/");
        assert_eq!(sanitize_return_path(Some("")), "/");
        assert_eq!(sanitize_return_path(Some("https://evil.test")), "/");
        assert_eq!(sanitize_return_path(Some("//evil.test/x")), "/");
        assert_eq!(sanitize_return_path(Some("/\\evil.test")), "/");
        assert_eq!(sanitize_return_path(Some("/a\r\nb")), "/");
    }
}
