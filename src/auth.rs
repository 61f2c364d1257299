use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::ApiError;
use crate::AppState;

/// Bearer tokens live this long before a fresh login is required.
const TOKEN_TTL_DAYS: i64 = 15;
const DEFAULT_BCRYPT_COST: u32 = 10;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    uid: String,
    iat: i64,
    exp: i64,
}

/// Password hashing and JWT issuance/verification.
pub struct AuthService {
    secret: String,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(secret: String, bcrypt_cost: u32) -> Self {
        Self {
            secret,
            bcrypt_cost,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let secret = env::var("JWT_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET_KEY environment variable is not set"))?;
        let bcrypt_cost = env::var("BCRYPT_COST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BCRYPT_COST);
        Ok(Self::new(secret, bcrypt_cost))
    }

    pub fn hash_password(&self, password: &str) -> Result<String, ApiError> {
        bcrypt::hash(password, self.bcrypt_cost)
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub fn create_access_token(&self, user_id: &str) -> Result<String, ApiError> {
        let now = time::OffsetDateTime::now_utc();
        let claims = Claims {
            uid: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + time::Duration::days(TOKEN_TTL_DAYS)).unix_timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
    }

    pub fn user_id_from_token(&self, token: &str) -> Result<String, ApiError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::InvalidToken)?;
        Ok(data.claims.uid)
    }
}

/// The authenticated caller's userID, pulled from the `Authorization:
/// Bearer` header by any handler that lists it as an argument.
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::InvalidToken)?;
        let user_id = state.auth.user_id_from_token(token)?;
        Ok(AuthUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        // Minimum bcrypt cost keeps the tests fast.
        AuthService::new("test-secret".to_string(), 4)
    }

    #[test]
    fn password_hash_round_trip() {
        let auth = service();
        let hash = auth.hash_password("s3cret!").unwrap();
        assert!(auth.verify_password("s3cret!", &hash));
        assert!(!auth.verify_password("wrong", &hash));
    }

    #[test]
    fn token_carries_the_user_id() {
        let auth = service();
        let token = auth.create_access_token("stu1").unwrap();
        assert_eq!(auth.user_id_from_token(&token).unwrap(), "stu1");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let auth = service();
        assert!(matches!(
            auth.user_id_from_token("not.a.token"),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let auth = service();
        let other = AuthService::new("different-secret".to_string(), 4);
        let token = other.create_access_token("stu1").unwrap();
        assert!(matches!(
            auth.user_id_from_token(&token),
            Err(ApiError::InvalidToken)
        ));
    }
}
