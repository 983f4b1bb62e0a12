//! Request signature and session derivation.
//!
//! Clients authenticate each upload with two headers: `X-Hamustro-Time`
//! (an opaque client-chosen timestamp string) and `X-Hamustro-Signature`,
//! which must equal `base64(sha256(time | md5_hex(body) | shared_secret))`
//! with literal ASCII pipes as separators.
//!
//! Independently of transport authentication, every collection carries a
//! `session` field that must equal the MD5-derived session of its metadata.
//! The session is a content-derived idempotency key: downstream records from
//! the same device/client/version tuple share it, so it doubles as a stable
//! grouping identifier.
//!
//! Signature verification is the first step of request processing; invalid
//! signatures are rejected before the body is decoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use sha2::{Digest, Sha256};

/// Computes the expected request signature for a body/time pair.
///
/// The signature is `base64(sha256(time || "|" || hex(md5(body)) || "|" ||
/// secret))` using the standard base64 alphabet with padding and lowercase
/// hex. Deterministic in all inputs.
///
/// # Examples
///
/// ```
/// use hamustro::auth::request_signature;
///
/// let sig = request_signature(b"body", "1454514088", "secret");
/// // Same inputs always produce the same signature.
/// assert_eq!(sig, request_signature(b"body", "1454514088", "secret"));
/// ```
pub fn request_signature(body: &[u8], time: &str, secret: &str) -> String {
    let body_hash = hex::encode(Md5::digest(body));

    let mut hasher = Sha256::new();
    hasher.update(time.as_bytes());
    hasher.update(b"|");
    hasher.update(body_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(secret.as_bytes());

    STANDARD.encode(hasher.finalize())
}

/// Verifies a request signature header against the body and shared secret.
///
/// Returns `true` iff the header equals the recomputed signature.
pub fn verify_request_signature(body: &[u8], time: &str, header: &str, secret: &str) -> bool {
    request_signature(body, time, secret) == header
}

/// Derives the session identifier for a device/client/version tuple.
///
/// The session is `hex(md5(device_id || ":" || client_id || ":" ||
/// system_version || ":" || product_version))`, lowercase. Exactly these
/// five fields participate; `system` and `product_git_hash` do not.
pub fn collection_session(
    device_id: &str,
    client_id: &str,
    system_version: &str,
    product_version: &str,
) -> String {
    let mut hasher = Md5::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b":");
    hasher.update(client_id.as_bytes());
    hasher.update(b":");
    hasher.update(system_version.as_bytes());
    hasher.update(b":");
    hasher.update(product_version.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Unit tests for known vectors and edge cases
    // ========================================================================

    /// Known vector: MD5("") = d41d8cd98f00b204e9800998ecf8427e, so the
    /// signature of an empty body is sha256("t|d41d8...27e|s").
    #[test]
    fn signature_empty_body_known_vector() {
        let sig = request_signature(b"", "t", "s");

        let mut hasher = Sha256::new();
        hasher.update(b"t|d41d8cd98f00b204e9800998ecf8427e|s");
        let expected = STANDARD.encode(hasher.finalize());

        assert_eq!(sig, expected);
    }

    #[test]
    fn signature_is_valid_base64_of_32_bytes() {
        let sig = request_signature(b"payload", "1454514088", "secret");
        let raw = STANDARD.decode(&sig).expect("signature must be base64");
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let body = b"some binary collection";
        let sig = request_signature(body, "1454514088", "secret");
        assert!(verify_request_signature(body, "1454514088", &sig, "secret"));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = b"some binary collection";
        let sig = request_signature(body, "1454514088", "secret");
        assert!(!verify_request_signature(body, "1454514088", &sig, "other-secret"));
    }

    #[test]
    fn verify_rejects_modified_body() {
        let sig = request_signature(b"original", "1454514088", "secret");
        assert!(!verify_request_signature(b"tampered", "1454514088", &sig, "secret"));
    }

    #[test]
    fn verify_rejects_different_time() {
        let sig = request_signature(b"body", "1454514088", "secret");
        assert!(!verify_request_signature(b"body", "1454514089", &sig, "secret"));
    }

    #[test]
    fn verify_rejects_garbage_header() {
        assert!(!verify_request_signature(b"body", "t", "not-a-signature", "secret"));
        assert!(!verify_request_signature(b"body", "t", "", "secret"));
    }

    #[test]
    fn session_known_vector() {
        // md5("a73b1c37-2c24-4786-af7a-16de88fbe23a:bce44f67b2661fd445d469b525b04f68:10.10:1.1.2")
        let session = collection_session(
            "a73b1c37-2c24-4786-af7a-16de88fbe23a",
            "bce44f67b2661fd445d469b525b04f68",
            "10.10",
            "1.1.2",
        );
        assert_eq!(session.len(), 32);
        assert!(session.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Direct recomputation over the joined string must agree.
        let joined = "a73b1c37-2c24-4786-af7a-16de88fbe23a:bce44f67b2661fd445d469b525b04f68:10.10:1.1.2";
        assert_eq!(session, hex::encode(Md5::digest(joined.as_bytes())));
    }

    #[test]
    fn session_is_lowercase_hex() {
        let session = collection_session("device", "client", "10.10", "1.1.2");
        assert_eq!(session.len(), 32);
        assert!(session.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn session_ignores_empty_fields_distinctly() {
        // Separators keep field boundaries: ("ab","") != ("a","b")
        assert_ne!(
            collection_session("ab", "", "v", "p"),
            collection_session("a", "b", "v", "p")
        );
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    proptest! {
        /// Signing is deterministic and idempotent in all inputs.
        #[test]
        fn prop_signature_deterministic(body: Vec<u8>, time: String, secret: String) {
            let a = request_signature(&body, &time, &secret);
            let b = request_signature(&body, &time, &secret);
            prop_assert_eq!(a, b);
        }

        /// A signature computed with one secret never verifies under another.
        #[test]
        fn prop_wrong_secret_fails(body: Vec<u8>, time: String, s1: String, s2: String) {
            prop_assume!(s1 != s2);
            let sig = request_signature(&body, &time, &s1);
            prop_assert!(!verify_request_signature(&body, &time, &sig, &s2));
        }

        /// Any body modification invalidates the signature.
        #[test]
        fn prop_modified_body_fails(body: Vec<u8>, other: Vec<u8>, time: String, secret: String) {
            prop_assume!(body != other);
            let sig = request_signature(&body, &time, &secret);
            prop_assert!(!verify_request_signature(&other, &time, &sig, &secret));
        }

        /// Session derivation is deterministic.
        #[test]
        fn prop_session_deterministic(d: String, c: String, sv: String, pv: String) {
            prop_assert_eq!(
                collection_session(&d, &c, &sv, &pv),
                collection_session(&d, &c, &sv, &pv)
            );
        }

        /// Sessions are always 32 lowercase hex characters.
        #[test]
        fn prop_session_shape(d: String, c: String, sv: String, pv: String) {
            let session = collection_session(&d, &c, &sv, &pv);
            prop_assert_eq!(session.len(), 32);
            prop_assert!(session.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f')));
        }
    }
}
