//! Bearer-token auth: password login against the `users` table and JWT
//! issuance/verification (spec.md §6 `POST /api/auth/login`).
//!
//! Grounded on the teacher's `domains/auth/jwt.rs` (`JwtService`/`Claims`)
//! and `server/middleware/jwt_auth.rs` (optional-by-default `AuthUser`
//! extraction) — the member/OTP login flow there is replaced with a plain
//! username+password check against a `users` row, since user management
//! beyond login is out of scope here.

use anyhow::Result;
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};
use crate::ids::UserId;
use crate::repository::{Repository, UserRecord};

const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Claims embedded in every issued token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    pub fn create_token(&self, user_id: UserId, username: String, is_admin: bool) -> Result<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(TOKEN_LIFETIME_HOURS);

        let claims = Claims {
            sub: user_id.to_string(),
            user_id,
            username,
            is_admin,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

/// Authenticated caller, attached to request extensions by the auth
/// middleware. Absent for anonymous requests — routes that require a
/// caller reject `None` themselves rather than the middleware enforcing it
/// globally (same optional-by-default shape as the teacher's middleware).
#[derive(Clone, Debug, Serialize)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            is_admin: claims.is_admin,
        }
    }
}

pub fn extract_bearer(header_value: &str) -> &str {
    header_value.strip_prefix("Bearer ").unwrap_or(header_value)
}

/// Verifies a username/password pair against the `users` table. Only
/// `auth_source = "local"` is implemented; any other source is rejected as
/// unsupported rather than silently accepted.
pub async fn authenticate(
    repo: &Arc<dyn Repository>,
    username: &str,
    password: &str,
    auth_source: &str,
) -> DispatchResult<UserRecord> {
    if auth_source != "local" {
        return Err(DispatchError::Validation(format!(
            "unsupported auth_source '{auth_source}'"
        )));
    }

    let user = repo
        .get_user_by_username(username)
        .await?
        .ok_or_else(|| DispatchError::Validation("invalid username or password".to_string()))?;

    let hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| DispatchError::Internal(anyhow::anyhow!("stored password hash is malformed: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .map_err(|_| DispatchError::Validation("invalid username or password".to_string()))?;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_verify_token_roundtrip() {
        let service = JwtService::new("test_secret_key", "dispatcher".to_string());
        let user_id = UserId::new();

        let token = service.create_token(user_id, "alice".to_string(), true).unwrap();
        let claims = service.verify_token(&token).unwrap();

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.username, "alice");
        assert!(claims.is_admin);
        assert_eq!(claims.iss, "dispatcher");
    }

    #[test]
    fn wrong_secret_does_not_verify() {
        let service1 = JwtService::new("secret1", "dispatcher".to_string());
        let service2 = JwtService::new("secret2", "dispatcher".to_string());

        let token = service1.create_token(UserId::new(), "bob".to_string(), false).unwrap();
        assert!(service2.verify_token(&token).is_err());
    }

    #[test]
    fn strips_bearer_prefix() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), "abc.def.ghi");
        assert_eq!(extract_bearer("abc.def.ghi"), "abc.def.ghi");
    }
}
