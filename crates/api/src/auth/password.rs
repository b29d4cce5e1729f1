//! Password hashing with Argon2

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password using Argon2id with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a stored hash
///
/// Fails closed: a malformed hash or any verifier error is a non-match,
/// never a match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash failed to parse");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Validate a candidate password against the configured length policy
pub fn validate_password(password: &str, min_len: usize) -> Result<(), PasswordValidationError> {
    if password.len() < min_len {
        return Err(PasswordValidationError::TooShort(min_len));
    }

    if password.len() > 128 {
        return Err(PasswordValidationError::TooLong);
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("Password must be at least {0} characters")]
    TooShort(usize),
    #[error("Password must be at most 128 characters")]
    TooLong,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let password = "correct-horse-battery";
        let hash = hash_password(password).expect("Failed to hash password");

        assert!(verify_password(password, &hash));
        assert!(!verify_password("wrong_password", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let password = "same-password";
        let first = hash_password(password).unwrap();
        let second = hash_password(password).unwrap();

        // Fresh salt per call: equal inputs never produce equal digests
        assert_ne!(first, second);
        assert!(verify_password(password, &first));
        assert!(verify_password(password, &second));
    }

    #[test]
    fn test_verify_fails_closed_on_garbage_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn test_password_length_policy() {
        assert!(matches!(
            validate_password("short", 6),
            Err(PasswordValidationError::TooShort(6))
        ));
        assert!(validate_password("secret1", 6).is_ok());

        let long_password = "a".repeat(129);
        assert!(matches!(
            validate_password(&long_password, 6),
            Err(PasswordValidationError::TooLong)
        ));
    }
}
