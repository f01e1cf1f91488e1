//! HMAC-SHA256 signature check over the raw request body

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verify `signature_header` against HMAC-SHA256(`secret`, `raw_body`).
///
/// The header is a hex digest in either case, optionally prefixed with
/// `sha256=`. `raw_body` must be the bytes exactly as received; re-serialized
/// JSON will not match. The comparison is constant-time.
pub fn verify_signature(secret: &[u8], raw_body: &[u8], signature_header: &str) -> Result<()> {
    let digest_hex = signature_header.trim();
    let digest_hex = digest_hex.strip_prefix("sha256=").unwrap_or(digest_hex);
    if digest_hex.is_empty() {
        return Err(Error::InvalidSignature);
    }
    let expected = hex::decode(digest_hex).map_err(|_| Error::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidSignature)?;
    mac.update(raw_body);
    mac.verify_slice(&expected).map_err(|_| Error::InvalidSignature)
}

/// Hex HMAC-SHA256 of `raw_body`, as the provider would send it.
#[cfg(test)]
pub(crate) fn sign(secret: &[u8], raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}
