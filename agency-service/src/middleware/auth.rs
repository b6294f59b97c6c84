use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::models::UserRole;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated caller. Claims are trusted as issued; role checks happen
/// in the domain layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized("Missing or invalid Authorization header".to_string())
        })?;

    let claims = state.jwt.validate(token)?;
    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Token subject is not a user id".to_string()))?;

    let auth_user = AuthUser {
        id: user_id,
        role: UserRole::from_string(&claims.role),
    };
    req.extensions_mut().insert(auth_user);

    Ok(next.run(req).await)
}

/// Extractor to easily get the caller in handlers
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips() {
        let validator = JwtValidator::new("test-secret");
        let claims = Claims {
            sub: "42".to_string(),
            role: "manager".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = token_for(&claims, "test-secret");

        let decoded = validator.validate(&token).unwrap();
        assert_eq!(decoded.sub, "42");
        assert_eq!(decoded.role, "manager");
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = JwtValidator::new("test-secret");
        let claims = Claims {
            sub: "42".to_string(),
            role: "client".to_string(),
            exp: chrono::Utc::now().timestamp() - 7200,
            iat: chrono::Utc::now().timestamp() - 10800,
        };
        let token = token_for(&claims, "test-secret");

        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let validator = JwtValidator::new("test-secret");
        let claims = Claims {
            sub: "42".to_string(),
            role: "client".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = token_for(&claims, "other-secret");

        assert!(validator.validate(&token).is_err());
    }
}
