use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::user::NewUser;
use crate::schema::{lower, users};

/// Claims embedded in every session token. Stateless and self-verifying;
/// the HMAC signature is the only integrity protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id
    pub sub: i32,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated principal resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub is_admin: bool,
}

/// Principal that additionally carries the admin flag.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    Ok(bcrypt::verify(password, hash)?)
}

/// Issue a session token for the given identity with the configured
/// validity window.
pub fn issue_token(user_id: i32, username: &str, is_admin: bool) -> Result<String, ApiError> {
    let config = Config::get();
    encode_token(
        user_id,
        username,
        is_admin,
        &config.auth.jwt_secret,
        config.auth.token_validity_days,
    )
}

/// Verify a session token and return its claims; any failure (bad
/// signature, expiry, malformed input) is `Unauthorized`.
pub fn verify_token(token: &str) -> Result<Claims, ApiError> {
    decode_token(token, &Config::get().auth.jwt_secret)
}

fn encode_token(
    user_id: i32,
    username: &str,
    is_admin: bool,
    secret: &str,
    validity_days: i64,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        is_admin,
        iat: now.timestamp(),
        exp: (now + Duration::days(validity_days)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to sign token: {e}")))
}

fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("malformed authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = verify_token(token)?;

        Ok(AuthUser {
            id: claims.sub,
            username: claims.username,
            is_admin: claims.is_admin,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::Forbidden("admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Seed the admin account from configuration at startup. This replaces the
/// usual "magic credential pair" shortcut: privileged accounts are only
/// ever provisioned out-of-band, never from a request handler.
pub async fn seed_admin(pool: &DbPool) -> anyhow::Result<()> {
    let config = Config::get();

    let (email, username, password) = match (
        &config.auth.admin_email,
        &config.auth.admin_username,
        &config.auth.admin_password,
    ) {
        (Some(e), Some(u), Some(p)) => (e, u, p),
        _ => return Ok(()),
    };

    let mut conn = pool.get().await?;

    let existing: i64 = users::table
        .filter(lower(users::username).eq(username.to_lowercase()))
        .count()
        .get_result(&mut conn)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let admin = NewUser {
        email: email.clone(),
        username: username.to_lowercase(),
        full_name: "Administrator".to_string(),
        password_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST)?,
        bio: None,
        profile_image: None,
        birthday: None,
        is_admin: true,
    };

    diesel::insert_into(users::table)
        .values(&admin)
        .execute(&mut conn)
        .await?;

    info!("Seeded admin account '{}'", username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trip_preserves_identity() {
        let token = encode_token(42, "alice", false, SECRET, 7).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();

        assert_eq!(claims.sub, 42);
        assert_eq!(claims.username, "alice");
        assert!(!claims.is_admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn admin_flag_survives_round_trip() {
        let token = encode_token(1, "root", true, SECRET, 7).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert!(claims.is_admin);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = encode_token(42, "alice", false, SECRET, 7).unwrap();
        let err = decode_token(&token, "other-secret").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        // Negative validity puts exp in the past, beyond default leeway
        let token = encode_token(42, "alice", false, SECRET, -1).unwrap();
        let err = decode_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = decode_token("not-a-token", SECRET).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn password_hash_verifies() {
        // DEFAULT_COST is deliberate in production; fine for one test case
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }
}
