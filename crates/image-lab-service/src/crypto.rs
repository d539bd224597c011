//! Cryptographic utilities for webhook verification.
//!
//! Payment webhooks carry `x-signature: hex(HMAC-SHA256(secret, body))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message` and return it hex-encoded.
///
/// Returns `None` only if the MAC rejects the key, which HMAC never does
/// (RFC 2104 accepts keys of any size).
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a webhook signature header against the raw body.
///
/// Accepts an optional `sha256=` prefix and either hex case.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    match hmac_sha256_hex(secret, body) {
        Some(expected) => constant_time_eq(&expected, &provided.to_ascii_lowercase()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_matches_rfc4231_vector() {
        // RFC 4231 test case 2.
        let result = hmac_sha256_hex("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            result,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_sha256_different_inputs() {
        let result1 = hmac_sha256_hex("secret", b"message1").unwrap();
        let result2 = hmac_sha256_hex("secret", b"message2").unwrap();
        assert_ne!(result1, result2);
    }

    #[test]
    fn constant_time_eq_equal_strings() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn constant_time_eq_different_strings() {
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }

    #[test]
    fn verify_signature_accepts_prefix_and_uppercase() {
        let body = br#"{"event_id":"evt_1"}"#;
        let sig = hmac_sha256_hex("whsec", body).unwrap();
        assert!(verify_signature("whsec", body, &sig));
        assert!(verify_signature("whsec", body, &format!("sha256={sig}")));
        assert!(verify_signature("whsec", body, &sig.to_uppercase()));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("whsec", b"tampered", &sig));
    }
}
