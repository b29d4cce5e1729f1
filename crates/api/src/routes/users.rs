//! User profile and administration routes

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use taskforge_shared::Role;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{hash_password, parse_stored_role, sessions, validate_password, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub password: Option<String>,
    // No `role` field: profile updates can never touch the role.
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<ProfileResponse>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: u64,
}

// =============================================================================
// Database Row Types
// =============================================================================

/// Default read projection: secret material and token fingerprints are
/// never selected here
#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    last_login_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

fn profile_response(row: ProfileRow) -> Result<ProfileResponse, ApiError> {
    let role = parse_stored_role(&row.role, row.id)?;
    Ok(ProfileResponse {
        id: row.id,
        name: row.name,
        email: row.email,
        role,
        last_login_at: row.last_login_at,
        created_at: row.created_at,
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// Get the current user's profile
pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let row: ProfileRow = sqlx::query_as(
        r#"
        SELECT id, name, email, role, last_login_at, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(auth_user.id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(profile_response(row)?))
}

/// Update the current user's name and/or password
///
/// The role is not reachable from this path.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ProfileResponse>> {
    let new_name = match &req.name {
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ApiError::Validation("Name must not be empty".to_string()));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let new_hash = match &req.password {
        Some(password) => {
            validate_password(password, state.config.min_password_len)
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            Some(hash_password(password).map_err(|e| {
                tracing::error!(error = %e, "update_profile: password hashing failed");
                ApiError::Internal
            })?)
        }
        None => None,
    };

    let row: ProfileRow = sqlx::query_as(
        r#"
        UPDATE users
        SET name = COALESCE($1, name),
            password_hash = COALESCE($2, password_hash),
            updated_at = NOW()
        WHERE id = $3
        RETURNING id, name, email, role, last_login_at, created_at
        "#,
    )
    .bind(&new_name)
    .bind(&new_hash)
    .bind(auth_user.id)
    .fetch_one(&state.pool)
    .await?;

    // A changed secret invalidates every outstanding refresh session
    if new_hash.is_some() {
        let revoked = sessions::revoke_all(&state.pool, auth_user.id).await?;
        tracing::info!(
            user_id = %auth_user.id,
            revoked_sessions = revoked,
            "password changed"
        );
    }

    Ok(Json(profile_response(row)?))
}

/// List all users (admin only), secrets excluded
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UserListResponse>> {
    auth_user.require_role(&[Role::Admin])?;

    let rows: Vec<ProfileRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, role, last_login_at, created_at
        FROM users
        ORDER BY created_at
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let total = rows.len() as i64;
    let users = rows
        .into_iter()
        .map(profile_response)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(UserListResponse { users, total }))
}

/// Change a user's role (admin only)
///
/// This is the one path through which a role can change; it is never folded
/// into profile updates.
pub async fn update_role(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<Json<ProfileResponse>> {
    auth_user.require_role(&[Role::Admin])?;

    if auth_user.id == user_id {
        return Err(ApiError::Validation(
            "Cannot change your own role".to_string(),
        ));
    }

    let role: Role = req.role.parse().map_err(|_| {
        ApiError::Validation("Invalid role. Must be one of: admin, manager, member".to_string())
    })?;

    let row: Option<ProfileRow> = sqlx::query_as(
        r#"
        UPDATE users
        SET role = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING id, name, email, role, last_login_at, created_at
        "#,
    )
    .bind(role.as_str())
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;

    let row = row.ok_or(ApiError::NotFound)?;

    tracing::info!(
        user_id = %user_id,
        role = %role,
        admin_id = %auth_user.id,
        "role updated"
    );

    Ok(Json(profile_response(row)?))
}

/// Revoke every refresh session for a user (admin only), forcing
/// re-authentication on all their devices
pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<RevokedResponse>> {
    auth_user.require_role(&[Role::Admin])?;

    // A typo'd id should read as a 404, not a silent no-op
    let exists: Option<(bool,)> = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;

    if !exists.map(|r| r.0).unwrap_or(false) {
        return Err(ApiError::NotFound);
    }

    let revoked = sessions::revoke_all(&state.pool, user_id).await?;

    tracing::info!(
        user_id = %user_id,
        admin_id = %auth_user.id,
        revoked_sessions = revoked,
        "all sessions revoked"
    );

    Ok(Json(RevokedResponse { revoked }))
}
