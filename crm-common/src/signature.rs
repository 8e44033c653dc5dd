//! HMAC-SHA256 verification of webhook deliveries.
//!
//! The digest is always computed over the raw request body exactly as it was received.
//! Re-serializing a parsed payload is not guaranteed to produce the same bytes.
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex-encoded signature of the request body.
pub const SIGNATURE_HEADER: &str = "x-hubspot-signature-v3";

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Compute the lowercase hex HMAC-SHA256 digest of `body` keyed with `secret`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `signature` against the digest of `body`.
/// The comparison is constant-time. A value that is not valid hex never verifies.
pub fn verify(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };

    let mut mac = keyed_mac(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
