//! Authentication routes

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use taskforge_shared::Role;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        hash_password, middleware::cookie_value, parse_stored_role, sessions, tokens,
        validate_password, verify_password, AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Floor on login/forgot-password response time. Padding the fast paths
/// (unknown email, cheap rejection) up to the slow ones keeps response
/// timing from leaking which accounts exist.
const MIN_AUTH_RESPONSE_TIME: std::time::Duration = std::time::Duration::from_millis(500);

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    // Any `role` field in the payload is silently dropped here: roles are
    // never client-assignable at registration.
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
}

#[derive(Debug, FromRow)]
struct UserAuthRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a new user
///
/// Registration performs an implicit login: the response carries a full
/// credential pair, so a fresh account is immediately authenticated.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }

    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }

    validate_password(&req.password, state.config.min_password_len)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    // Check if email already exists (the unique index backs this up under
    // concurrent registration)
    let exists: Option<(bool,)> =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?;

    if exists.map(|r| r.0).unwrap_or(false) {
        return Err(ApiError::EmailAlreadyExists);
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "register: password hashing failed");
        ApiError::Internal
    })?;

    // Create the user and its first refresh session in one transaction;
    // `role` is deliberately not bound, the column default assigns member.
    let mut tx = state.pool.begin().await?;

    let user: UserRow = sqlx::query_as(
        r#"
        INSERT INTO users (name, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, name, email, role
        "#,
    )
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await?;

    let refresh_token = sessions::issue(
        &mut *tx,
        user.id,
        Duration::days(state.config.refresh_token_ttl_days),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, "user registered");

    let role = parse_stored_role(&user.role, user.id)?;
    let access_token = sign_access(&state, user.id, role)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt_manager.access_token_expiry_seconds(),
            user: UserResponse {
                id: user.id,
                name: user.name,
                email: user.email,
                role,
            },
        }),
    ))
}

/// Login with email and password
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let start = std::time::Instant::now();

    let result = login_inner(&state, &req).await;

    let elapsed = start.elapsed();
    if elapsed < MIN_AUTH_RESPONSE_TIME {
        tokio::time::sleep(MIN_AUTH_RESPONSE_TIME - elapsed).await;
    }

    result
}

/// Inner login logic (extracted for the timing wrapper)
async fn login_inner(state: &AppState, req: &LoginRequest) -> ApiResult<Json<AuthResponse>> {
    let email = normalize_email(&req.email);

    let user: Option<UserAuthRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, password_hash, role
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    // An absent account and a wrong password are indistinguishable to the
    // caller
    let Some(user) = user else {
        tracing::warn!("login: unknown email");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(user_id = %user.id, "login: password mismatch");
        return Err(ApiError::InvalidCredentials);
    }

    let role = parse_stored_role(&user.role, user.id)?;

    // All session mutations commit before the response is built
    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

    sessions::prune_expired(&mut *tx, user.id).await?;

    let refresh_token = sessions::issue(
        &mut *tx,
        user.id,
        Duration::days(state.config.refresh_token_ttl_days),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, "login succeeded");

    let access_token = sign_access(state, user.id, role)?;

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt_manager.access_token_expiry_seconds(),
        user: UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role,
        },
    }))
}

/// Exchange a refresh token for a fresh credential pair
///
/// Rotation: the presented token is consumed and a successor issued in its
/// place. Presenting the old token again yields `UNAUTHENTICATED`.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<Json<AuthResponse>> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| cookie_value(&headers, "refresh_token"))
        .ok_or(ApiError::Unauthenticated)?;

    let rotated = sessions::rotate(
        &state.pool,
        &presented,
        Duration::days(state.config.refresh_token_ttl_days),
    )
    .await?;

    // The fresh access credential carries the principal's current role,
    // not whatever the previous credential said
    let user: Option<UserRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, role
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(rotated.user_id)
    .fetch_optional(&state.pool)
    .await?;

    let user = user.ok_or(ApiError::Unauthenticated)?;
    let role = parse_stored_role(&user.role, user.id)?;
    let access_token = sign_access(&state, user.id, role)?;

    Ok(Json(AuthResponse {
        access_token,
        refresh_token: rotated.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt_manager.access_token_expiry_seconds(),
        user: UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role,
        },
    }))
}

/// Logout: revoke the presented refresh session
///
/// Idempotent by design. A token that is already rotated, revoked or simply
/// unknown leaves nothing to do; that is still a successful logout.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<Json<MessageResponse>> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| cookie_value(&headers, "refresh_token"));

    if let Some(token) = presented {
        let removed = sessions::revoke(&state.pool, &token).await?;
        if removed {
            tracing::info!(user_id = %auth_user.id, "refresh session revoked");
        }
    }

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Request a password reset
///
/// The response is identical whether or not the account exists, and the
/// reset token leaves the system only through the mail sink.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let start = std::time::Instant::now();

    let email = normalize_email(&req.email);

    let user: Option<(Uuid, String)> = sqlx::query_as("SELECT id, email FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?;

    if let Some((user_id, user_email)) = user {
        let reset_token = tokens::generate_token();
        let expires_at =
            OffsetDateTime::now_utc() + Duration::minutes(state.config.reset_token_ttl_minutes);

        // Overwrites any prior outstanding token: at most one is live per
        // account at any time
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = $1, reset_token_expires_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(tokens::fingerprint(&reset_token))
        .bind(expires_at)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

        tracing::info!(user_id = %user_id, "password reset requested");

        // Delivery is out of band and best-effort (fire and forget)
        let mailer = state.mailer.clone();
        tokio::spawn(async move {
            mailer.send_password_reset(&user_email, &reset_token).await;
        });
    }

    let elapsed = start.elapsed();
    if elapsed < MIN_AUTH_RESPONSE_TIME {
        tokio::time::sleep(MIN_AUTH_RESPONSE_TIME - elapsed).await;
    }

    Ok(Json(MessageResponse {
        message: "If an account exists with that email, a password reset link has been sent."
            .to_string(),
    }))
}

/// Redeem a reset token and set a new password
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    validate_password(&req.password, state.config.min_password_len)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "reset_password: password hashing failed");
        ApiError::Internal
    })?;

    // Single atomic statement: the secret update and the token clear happen
    // together or not at all, and a concurrent redeem of the same token
    // matches zero rows. Single use falls out of the WHERE clause.
    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        UPDATE users
        SET password_hash = $1,
            reset_token_hash = NULL,
            reset_token_expires_at = NULL,
            updated_at = NOW()
        WHERE reset_token_hash = $2 AND reset_token_expires_at > NOW()
        RETURNING id, email
        "#,
    )
    .bind(&password_hash)
    .bind(tokens::fingerprint(&token))
    .fetch_optional(&state.pool)
    .await?;

    let Some((user_id, user_email)) = row else {
        tracing::warn!("reset_password: no live token matched");
        return Err(ApiError::InvalidResetToken);
    };

    // A recovered account gets a clean slate: no pre-reset session survives
    let revoked = sessions::revoke_all(&state.pool, user_id).await?;

    tracing::info!(
        user_id = %user_id,
        revoked_sessions = revoked,
        "password reset completed"
    );

    let mailer = state.mailer.clone();
    tokio::spawn(async move {
        mailer.send_password_changed(&user_email).await;
    });

    Ok(Json(MessageResponse {
        message: "Password has been reset successfully.".to_string(),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Lightweight shape validation; the store's unique index is the real
/// gatekeeper for duplicates
fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || local.len() > 64 {
        return false;
    }
    if !local
        .chars()
        .all(|c| c.is_alphanumeric() || ".+-_".contains(c))
    {
        return false;
    }

    if domain.is_empty() || domain.len() > 255 || !domain.contains('.') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return false;
    }

    domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
}

fn sign_access(state: &AppState, user_id: Uuid, role: Role) -> ApiResult<String> {
    state.jwt_manager.sign(user_id, role).map_err(|e| {
        tracing::error!(error = %e, "access token signing failed");
        ApiError::Internal
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("alice@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("alice@"));
        assert!(!is_valid_email("alice@nodot"));
        assert!(!is_valid_email("alice@.example.com"));
        assert!(!is_valid_email("alice@example..com"));
        assert!(!is_valid_email("ali ce@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(normalize_email("  Alice@X.Com "), "alice@x.com");
    }
}
