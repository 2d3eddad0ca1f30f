//! Account creation and session issuance.

use axum::extract::State;
use axum::Json;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{self, AuthUser};
use crate::db::DbPool;
use crate::error::ApiError;
use crate::media;
use crate::models::user::{NewUser, User};
use crate::schema::{lower, users};

#[derive(Debug, Deserialize)]
pub struct SignupPayload {
    pub email: String,
    pub username: String,
    #[serde(alias = "fullName")]
    pub full_name: String,
    pub password: String,
    pub birthday: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    /// Email address or username, matched case-insensitively.
    #[serde(alias = "email", alias = "emailOrUsername")]
    pub identifier: String,
    pub password: String,
}

const MIN_PASSWORD_LEN: usize = 6;

fn validate_signup(payload: &SignupPayload) -> Result<(), ApiError> {
    if payload.email.trim().is_empty()
        || payload.username.trim().is_empty()
        || payload.full_name.trim().is_empty()
    {
        return Err(ApiError::Validation(
            "email, username and full name are required".to_string(),
        ));
    }
    if !payload.email.contains('@') {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if payload
        .birthday
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .is_none()
    {
        return Err(ApiError::Validation("birthday is required".to_string()));
    }
    Ok(())
}

/// Parse a user-supplied birthday. Accepts `DD.MM.YYYY` and `YYYY-MM-DD`.
fn parse_birthday(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| ApiError::Validation("invalid birthday".to_string()))
}

fn session_response(token: String, user: &User) -> Json<serde_json::Value> {
    Json(json!({
        "token": token,
        "user": user,
    }))
}

/// POST /api/auth/signup
pub async fn signup(
    State(pool): State<DbPool>,
    Json(payload): Json<SignupPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_signup(&payload)?;

    let email = payload.email.trim().to_string();
    let username = payload.username.trim().to_lowercase();
    let birthday = parse_birthday(payload.birthday.as_deref().unwrap_or_default().trim())?;

    let mut conn = pool.get().await?;

    let email_taken: i64 = users::table
        .filter(lower(users::email).eq(email.to_lowercase()))
        .count()
        .get_result(&mut conn)
        .await?;
    if email_taken > 0 {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let username_taken: i64 = users::table
        .filter(lower(users::username).eq(&username))
        .count()
        .get_result(&mut conn)
        .await?;
    if username_taken > 0 {
        return Err(ApiError::Conflict("username already taken".to_string()));
    }

    let new_user = NewUser {
        email,
        username,
        full_name: payload.full_name.trim().to_string(),
        password_hash: auth::hash_password(&payload.password)?,
        bio: None,
        profile_image: Some(media::random_avatar()),
        birthday: Some(birthday),
        is_admin: false,
    };

    // The unique indexes still backstop concurrent signups; a losing racer
    // surfaces as a Conflict through the UniqueViolation mapping.
    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .await?;

    info!("New account '{}' (id {})", user.username, user.id);

    let token = auth::issue_token(user.id, &user.username, user.is_admin)?;
    Ok(session_response(token, &user))
}

/// POST /api/auth/login
pub async fn login(
    State(pool): State<DbPool>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&pool, &payload).await?;

    let token = auth::issue_token(user.id, &user.username, user.is_admin)?;
    Ok(session_response(token, &user))
}

/// POST /api/auth/admin-login
///
/// Same credential check as login, but only succeeds for accounts with the
/// admin flag. The response is indistinguishable from a bad password so the
/// endpoint does not reveal which accounts are privileged.
pub async fn admin_login(
    State(pool): State<DbPool>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&pool, &payload).await?;
    if !user.is_admin {
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = auth::issue_token(user.id, &user.username, true)?;
    Ok(session_response(token, &user))
}

async fn authenticate(pool: &DbPool, payload: &LoginPayload) -> Result<User, ApiError> {
    let identifier = payload.identifier.trim().to_lowercase();
    if identifier.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "identifier and password are required".to_string(),
        ));
    }

    let mut conn = pool.get().await?;

    let user: Option<User> = users::table
        .filter(
            lower(users::email)
                .eq(&identifier)
                .or(lower(users::username).eq(&identifier)),
        )
        .first(&mut conn)
        .await
        .optional()?;

    let user = match user {
        Some(u) if auth::verify_password(&payload.password, &u.password_hash)? => u,
        // Same error whether the account exists or not
        _ => return Err(ApiError::Unauthorized("invalid credentials".to_string())),
    };

    diesel::update(users::table.find(user.id))
        .set((users::is_online.eq(true), users::last_seen.eq(Utc::now().naive_utc())))
        .execute(&mut conn)
        .await?;

    Ok(user)
}

/// Shared presence update, also used by the messaging online/offline routes.
pub async fn set_presence(pool: &DbPool, user: &AuthUser, online: bool) -> Result<(), ApiError> {
    let mut conn = pool.get().await?;
    diesel::update(users::table.find(user.id))
        .set((
            users::is_online.eq(online),
            users::last_seen.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(email: &str, username: &str, full_name: &str, password: &str) -> SignupPayload {
        SignupPayload {
            email: email.to_string(),
            username: username.to_string(),
            full_name: full_name.to_string(),
            password: password.to_string(),
            birthday: Some("01.01.2000".to_string()),
        }
    }

    #[test]
    fn signup_requires_all_identity_fields() {
        let err = validate_signup(&payload("", "bob", "Bob", "secret1")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = validate_signup(&payload("b@x.com", " ", "Bob", "secret1")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn signup_rejects_short_password() {
        let err = validate_signup(&payload("b@x.com", "bob", "Bob", "12345")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(validate_signup(&payload("b@x.com", "bob", "Bob", "123456")).is_ok());
    }

    #[test]
    fn signup_requires_birthday() {
        let mut p = payload("b@x.com", "bob", "Bob", "secret1");
        p.birthday = None;
        assert!(matches!(validate_signup(&p).unwrap_err(), ApiError::Validation(_)));
        p.birthday = Some("  ".to_string());
        assert!(matches!(validate_signup(&p).unwrap_err(), ApiError::Validation(_)));
    }

    #[test]
    fn signup_rejects_mail_without_at() {
        let err = validate_signup(&payload("not-an-email", "bob", "Bob", "secret1")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn birthday_accepts_both_formats() {
        let expected = NaiveDate::from_ymd_opt(1994, 3, 17).unwrap();
        assert_eq!(parse_birthday("17.03.1994").unwrap(), expected);
        assert_eq!(parse_birthday("1994-03-17").unwrap(), expected);
        assert!(parse_birthday("03/17/1994").is_err());
        assert!(parse_birthday("yesterday").is_err());
    }
}
