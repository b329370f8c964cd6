use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::user::Role;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to validate token: {0}")]
    TokenValidationError(String),
    #[error("Token expired")]
    TokenExpired,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,      // Subject (user id)
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub token_type: TokenType,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

/// Validates access tokens issued by the identity provider.
#[derive(Clone)]
pub struct JwtService {
    secret: String,
}

impl JwtService {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = jsonwebtoken::Validation::default();
        validation.validate_exp = true;

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            _ => JwtError::TokenValidationError(e.to_string()),
        })?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, user_id: uuid::Uuid, role: Role, ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        role,
        exp: now + ttl_secs,
        iat: now,
        token_type: TokenType::Access,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validate_invalid_token() {
        let service = JwtService::new("secret".to_string());
        let result = service.validate_token("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_round_trip_carries_role() {
        let service = JwtService::new("secret".to_string());
        let user_id = Uuid::new_v4();
        let token = issue_test_token("secret", user_id, Role::Mechanic, 300);

        let claims = service.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, Role::Mechanic);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_expired_token() {
        let service = JwtService::new("secret".to_string());
        let token = issue_test_token("secret", Uuid::new_v4(), Role::User, -3600);

        assert!(matches!(service.validate_token(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret() {
        let service = JwtService::new("secret".to_string());
        let token = issue_test_token("other", Uuid::new_v4(), Role::User, 300);

        assert!(matches!(
            service.validate_token(&token),
            Err(JwtError::TokenValidationError(_))
        ));
    }
}
