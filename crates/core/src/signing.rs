//! HMAC-SHA256 signing and verification for push notifications.
//!
//! The signature covers the raw, unparsed request body. Headers may carry
//! the hex digest bare or with a `sha256=` prefix.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature header against the raw payload in constant time.
///
/// Returns `false` for malformed (non-hex) headers.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let header = header.trim();
    let digest = header.strip_prefix("sha256=").unwrap_or(header);
    let Some(expected) = hex::decode(digest) else {
        return false;
    };
    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn mac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode a hex string; `None` on odd length or non-hex characters.
    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
            .collect()
    }
}
