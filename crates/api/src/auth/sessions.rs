//! Refresh-session store operations
//!
//! One `refresh_tokens` row per device session, keyed by token fingerprint.
//! The store's per-statement atomicity is the only serialization primitive:
//! rotation claims its row with a conditional `DELETE`, so of any number of
//! concurrent rotations of the same token at most one succeeds and the rest
//! observe the entry as already gone.

use sqlx::{PgExecutor, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::tokens;
use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live entry matches the presented token: never issued, already
    /// rotated, revoked, or pruned. Indistinguishable by design.
    #[error("Refresh token not recognized")]
    Unknown,
    #[error("Refresh token has expired")]
    Expired,
    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unknown => ApiError::Unauthenticated,
            SessionError::Expired => ApiError::TokenExpired,
            SessionError::Database(e) => e.into(),
        }
    }
}

/// Result of a successful rotation
#[derive(Debug)]
pub struct RotatedSession {
    pub user_id: Uuid,
    pub refresh_token: String,
}

/// Issue a new refresh session for a user, returning the plaintext token
///
/// Only the fingerprint is stored; the plaintext exists solely in the
/// response to this one request.
pub async fn issue<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    ttl: Duration,
) -> Result<String, sqlx::Error> {
    let token = tokens::generate_token();
    let expires_at = OffsetDateTime::now_utc() + ttl;

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(tokens::fingerprint(&token))
    .bind(expires_at)
    .execute(db)
    .await?;

    Ok(token)
}

/// Rotate a refresh session: atomically replace the presented token with a
/// fresh one under a renewed expiry window
///
/// The presented token becomes permanently unusable the instant rotation
/// commits; presenting it again yields [`SessionError::Unknown`].
pub async fn rotate(
    pool: &PgPool,
    presented: &str,
    ttl: Duration,
) -> Result<RotatedSession, SessionError> {
    let hash = tokens::fingerprint(presented);

    let row: Option<(Uuid, OffsetDateTime)> = sqlx::query_as(
        r#"
        SELECT user_id, expires_at
        FROM refresh_tokens
        WHERE token_hash = $1
        "#,
    )
    .bind(&hash)
    .fetch_optional(pool)
    .await?;

    let (user_id, expires_at) = row.ok_or(SessionError::Unknown)?;

    if expires_at <= OffsetDateTime::now_utc() {
        // Logically dead already; remove it so it stops matching lookups
        sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(&hash)
            .execute(pool)
            .await?;

        tracing::warn!(user_id = %user_id, "refresh attempted with expired session");
        return Err(SessionError::Expired);
    }

    let mut tx = pool.begin().await?;

    // The claim: concurrent rotations race on this row and at most one
    // observes a deletion. The loser sees the entry as already rotated.
    let claimed = sqlx::query(
        r#"
        DELETE FROM refresh_tokens
        WHERE token_hash = $1 AND expires_at > NOW()
        "#,
    )
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        return Err(SessionError::Unknown);
    }

    let refresh_token = issue(&mut *tx, user_id, ttl).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, "refresh session rotated");

    Ok(RotatedSession {
        user_id,
        refresh_token,
    })
}

/// Remove the session matching the presented token, if any
///
/// Idempotent: revoking an unknown or already-revoked token is a no-op
/// success, not an error.
pub async fn revoke<'e>(db: impl PgExecutor<'e>, presented: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
        .bind(tokens::fingerprint(presented))
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Clear every refresh session for a user, forcing re-authentication on
/// all devices. Returns the number of sessions revoked.
pub async fn revoke_all<'e>(db: impl PgExecutor<'e>, user_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

/// Opportunistically delete entries past their expiry
///
/// Expiry is enforced at check time against the wall clock; this is just
/// lazy cleanup on the next write.
pub async fn prune_expired<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at <= NOW()")
            .bind(user_id)
            .execute(db)
            .await?;

    let pruned = result.rows_affected();
    if pruned > 0 {
        tracing::debug!(user_id = %user_id, count = pruned, "pruned expired refresh sessions");
    }

    Ok(pruned)
}
