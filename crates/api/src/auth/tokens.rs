//! Opaque refresh and reset tokens
//!
//! Unlike the signed access credential these carry no claims and cannot be
//! verified offline; they are capabilities exchanged against the store.
//! Only the fingerprint is ever persisted.

use sha2::{Digest, Sha256};

/// Generate a secure random opaque token
///
/// Returns a 32-byte (256-bit) hex-encoded token with no embedded structure
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// One-way fingerprint of an opaque token, used as the only stored
/// representation and as the lookup key
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation() {
        let token1 = generate_token();
        let token2 = generate_token();

        // 32 bytes hex-encoded
        assert_eq!(token1.len(), 64);
        assert_eq!(token2.len(), 64);

        assert_ne!(token1, token2);

        assert!(token1.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(token2.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let token = "test_token_12345";
        let first = fingerprint(token);
        let second = fingerprint(token);

        assert_eq!(first, second);

        // SHA-256 hex-encoded
        assert_eq!(first.len(), 64);

        assert_ne!(first, fingerprint("different_token"));
    }

    #[test]
    fn test_fingerprint_differs_from_token() {
        let token = generate_token();
        assert_ne!(fingerprint(&token), token);
    }
}
