use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an `X-Build-Signature` header using constant-time comparison.
///
/// The build system signs `nonce || body` with HMAC-SHA256 and sends the
/// digest as hex in either case. An empty `secret` disables verification.
pub fn verify(secret: &str, nonce: &str, body: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(nonce.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, nonce: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(nonce.as_bytes());
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let sig = sign("test-secret", "N1", b"hello world");
        assert!(verify("test-secret", "N1", b"hello world", &sig));
    }

    #[test]
    fn uppercase_signature_passes() {
        let sig = sign("test-secret", "N1", b"{}").to_uppercase();
        assert!(verify("test-secret", "N1", b"{}", &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign("correct-secret", "N1", b"body");
        assert!(!verify("wrong-secret", "N1", b"body", &sig));
    }

    #[test]
    fn different_nonce_fails() {
        let sig = sign("secret", "N1", b"body");
        assert!(!verify("secret", "N2", b"body", &sig));
    }

    #[test]
    fn flipping_any_body_byte_fails() {
        let body = br#"{"name":"foo","version":"1.2.0"}"#.to_vec();
        let sig = sign("secret", "nonce", &body);

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(!verify("secret", "nonce", &tampered, &sig), "byte {i}");
        }
    }

    #[test]
    fn flipping_any_signature_byte_fails() {
        let sig = hex::decode(sign("secret", "nonce", b"body")).unwrap();

        for i in 0..sig.len() {
            let mut tampered = sig.clone();
            tampered[i] ^= 0x80;
            assert!(!verify("secret", "nonce", b"body", &hex::encode(tampered)), "byte {i}");
        }
    }

    #[test]
    fn invalid_hex_fails() {
        assert!(!verify("secret", "nonce", b"body", "not-valid-hex!"));
    }

    #[test]
    fn missing_signature_fails_when_secret_set() {
        assert!(!verify("secret", "nonce", b"body", ""));
    }

    #[test]
    fn empty_secret_skips_verification() {
        assert!(verify("", "nonce", b"body", ""));
        assert!(verify("", "nonce", b"body", "deadbeef"));
    }
}
