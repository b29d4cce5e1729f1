//! Signed access credentials

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use taskforge_shared::Role;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by an access credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Role at issuance time; the access gate reloads the principal, so a
    /// stale role here only survives until the next request.
    pub role: Role,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Signs and verifies access credentials
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl_minutes: i64,
}

impl JwtManager {
    pub fn new(secret: &str, access_token_ttl_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_ttl_minutes,
        }
    }

    /// Sign an access credential for the given principal
    pub fn sign(&self, user_id: Uuid, role: Role) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::minutes(self.access_token_ttl_minutes);

        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Verify signature and expiry, returning the embedded claims
    ///
    /// An expired-but-correctly-signed token is reported distinctly from a
    /// forged or malformed one: the client's recovery differs (refresh vs
    /// forced re-login).
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid,
            })
    }

    /// Access token expiry in seconds, for `expires_in` response fields
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl_minutes * 60
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
}
