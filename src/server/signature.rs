//! Webhook signature verification.
//!
//! Svix-style scheme: HMAC-SHA256 over `{id}.{timestamp}.{payload}` with a
//! base64 secret, compared in constant time against any of the
//! space-separated `v1,<sig>` entries in the signature header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// How far a webhook timestamp may drift from the local clock.
const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

/// Verify an inbound webhook delivery.
pub fn verify(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    payload: &[u8],
    signature_header: &str,
) -> bool {
    if !timestamp_fresh(timestamp) {
        return false;
    }

    let Some(expected) = sign(secret, msg_id, timestamp, payload) else {
        return false;
    };

    signature_header.split_whitespace().any(|entry| {
        let candidate = entry.strip_prefix("v1,").unwrap_or(entry);
        bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
    })
}

/// Compute the expected `v1` signature for a delivery.
pub fn sign(secret: &str, msg_id: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let key = decode_secret(secret)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).ok()?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Secrets arrive as `whsec_<base64>`; fall back to raw bytes for secrets
/// that were never base64 encoded.
fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let trimmed = secret.strip_prefix("whsec_").unwrap_or(secret);
    match BASE64.decode(trimmed) {
        Ok(bytes) => Some(bytes),
        Err(_) => Some(trimmed.as_bytes().to_vec()),
    }
}

fn timestamp_fresh(timestamp: &str) -> bool {
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    (now - sent_at).abs() <= TIMESTAMP_TOLERANCE_SECS
}
