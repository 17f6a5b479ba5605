//! Webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

/// Verifies a hex-encoded HMAC-SHA256 signature over the raw request body.
///
/// Comparison is constant-time via [`Mac::verify_slice`], so the check
/// leaks no timing information about the expected digest.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        warn!("webhook signature is not valid hex");
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    let valid = mac.verify_slice(&expected).is_ok();
    if !valid {
        warn!("webhook signature verification failed");
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"event":"payout.queued"}"#;
        let signature = sign("whsec_test", body);
        assert!(verify_signature("whsec_test", body, &signature));
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign("whsec_test", b"original");
        assert!(!verify_signature("whsec_test", b"tampered", &signature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let signature = sign("whsec_other", body);
        assert!(!verify_signature("whsec_test", body, &signature));
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert!(!verify_signature("whsec_test", b"payload", "not-hex!"));
    }
}
