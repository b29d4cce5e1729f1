//! Authentication module for Taskforge

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod sessions;
pub mod tokens;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_auth, AuthUser};
pub use password::{hash_password, validate_password, verify_password};
pub use sessions::SessionError;

use taskforge_shared::Role;
use uuid::Uuid;

use crate::error::ApiError;

/// Parse a role column value into the closed [`Role`] set
///
/// The schema constrains the column, so a parse failure here means the
/// store is corrupt, not that the request is bad.
pub(crate) fn parse_stored_role(role: &str, user_id: Uuid) -> Result<Role, ApiError> {
    role.parse::<Role>().map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "stored role outside the closed set");
        ApiError::Internal
    })
}
