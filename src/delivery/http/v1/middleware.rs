use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::AppState;
use crate::domain::user::Role;
use crate::usecase::error::UsecaseError;
use crate::usecase::jwt::{JwtService, TokenType};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Validates a bearer or query-string token into the caller's identity.
pub fn authenticate(jwt_service: &JwtService, token: &str) -> Result<AuthenticatedUser, (StatusCode, String)> {
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!(error = %e, "invalid token");
        (StatusCode::UNAUTHORIZED, format!("Invalid token: {e}"))
    })?;

    if claims.token_type != TokenType::Access {
        tracing::warn!("attempted to use non-access token for authentication");
        return Err((StatusCode::UNAUTHORIZED, "Invalid token type".to_string()));
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| {
        tracing::warn!(error = %e, "failed to parse user_id from token");
        (StatusCode::UNAUTHORIZED, "Invalid user ID in token".to_string())
    })?;

    Ok(AuthenticatedUser {
        user_id,
        email: claims.email,
        role: claims.role,
    })
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        tracing::warn!("missing or invalid authorization header");
        return Err((
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header".to_string(),
        ));
    };

    let authenticated_user = authenticate(&state.jwt_service, token)?;

    tracing::debug!(?authenticated_user, "user authenticated successfully");
    request.extensions_mut().insert(authenticated_user);

    Ok(next.run(request).await)
}

pub(crate) fn require_role(user: &AuthenticatedUser, allowed: &[Role]) -> Result<(), UsecaseError> {
    if !allowed.contains(&user.role) {
        tracing::warn!(user_id = %user.user_id, role = %user.role, "role not permitted for endpoint");
        return Err(UsecaseError::Forbidden(format!(
            "This action is not available to the {} role",
            user.role
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::jwt::issue_test_token;

    #[test]
    fn test_authenticate_extracts_role() {
        let jwt = JwtService::new("secret".to_string());
        let user_id = Uuid::new_v4();
        let token = issue_test_token("secret", user_id, Role::Mechanic, 60);

        let user = authenticate(&jwt, &token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, Role::Mechanic);
    }

    #[test]
    fn test_authenticate_rejects_bad_token() {
        let jwt = JwtService::new("secret".to_string());
        let (status, _) = authenticate(&jwt, "garbage").unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_role() {
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "m@example.com".to_string(),
            role: Role::Mechanic,
        };
        assert!(require_role(&user, &[Role::Mechanic, Role::Admin]).is_ok());
        assert!(matches!(require_role(&user, &[Role::Admin]), Err(UsecaseError::Forbidden(_))));
    }
}
