//! Access gate middleware
//!
//! Runs on every protected request: extracts the access credential from its
//! carrier, verifies it, reloads the principal from the store and injects it
//! into the request extensions for handlers to consume.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use sqlx::FromRow;
use taskforge_shared::Role;
use uuid::Uuid;

use super::jwt::JwtError;
use crate::{error::ApiError, state::AppState};

/// The authenticated principal, attached to protected requests
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    /// Enforce a per-operation role allow-list
    ///
    /// Distinct from authentication failure: the caller proved who they
    /// are, they just aren't allowed to do this.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.id, role = %self.role, "role not in allow-list");
            Err(ApiError::Forbidden)
        }
    }
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
}

/// Require a valid access credential on the request
///
/// Rejection is split by recovery action: an expired credential tells the
/// client to refresh, anything else forces a re-login.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_access_token(request.headers()).ok_or(ApiError::Unauthenticated)?;

    let claims = state.jwt_manager.verify(&token).map_err(|e| match e {
        JwtError::Expired => ApiError::TokenExpired,
        _ => ApiError::Unauthenticated,
    })?;

    // Reload the principal: the role may have changed since the token was
    // signed, and the account may be gone entirely.
    let row: Option<PrincipalRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, role
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(claims.sub)
    .fetch_optional(&state.pool)
    .await?;

    let row = row.ok_or(ApiError::Unauthenticated)?;

    let role = super::parse_stored_role(&row.role, row.id)?;

    request.extensions_mut().insert(AuthUser {
        id: row.id,
        name: row.name,
        email: row.email,
        role,
    });

    Ok(next.run(request).await)
}

/// Extract the access credential from its carrier
///
/// The cookie carrier wins when both are present.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, "access_token") {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Read a single value out of the `Cookie` header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;

    cookies
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
        .next()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_bearer_extraction() {
        let h = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(extract_access_token(&h).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_cookie_extraction() {
        let h = headers(&[("cookie", "theme=dark; access_token=tok-1; lang=en")]);
        assert_eq!(extract_access_token(&h).as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_cookie_preferred_over_bearer() {
        let h = headers(&[
            ("cookie", "access_token=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(extract_access_token(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_missing_or_empty_carriers() {
        assert_eq!(extract_access_token(&HeaderMap::new()), None);

        let h = headers(&[("cookie", "access_token=")]);
        assert_eq!(extract_access_token(&h), None);

        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(extract_access_token(&h), None);
    }

    #[test]
    fn test_role_allow_list() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            role: Role::Manager,
        };

        assert!(user.require_role(&[Role::Admin, Role::Manager]).is_ok());
        assert!(matches!(
            user.require_role(&[Role::Admin]),
            Err(ApiError::Forbidden)
        ));
    }
}
