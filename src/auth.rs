use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use crate::error::{is_unique_violation, ApiError};
use crate::routes::AppState;

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupReq>,
) -> Result<(StatusCode, Json<UserOut>), ApiError> {
    if payload.username.trim().is_empty() {
        return Err(ApiError::validation("username", "This field may not be blank."));
    }
    if payload.email.trim().is_empty() {
        return Err(ApiError::validation("email", "This field may not be blank."));
    }
    if payload.password != payload.password2 {
        return Err(ApiError::validation("password", "Passwords do not match"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::validation(
            "password",
            "Password must be at least 8 characters",
        ));
    }

    let password_hash = hash_password(&payload.password)
        .map_err(|e| ApiError::Internal(format!("hash error: {e}")))?;

    let mut tx = state.pool.begin().await?;
    let user_id = sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO users (username, email, password_hash, first_name, last_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id"#,
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match unique_field(&e) {
        Some(field) => {
            ApiError::Validation(field, format!("A user with that {field} already exists."))
        }
        None => ApiError::Database(e),
    })?;

    create_profile(&mut *tx, user_id).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(UserOut {
            id: user_id,
            username: payload.username,
            email: payload.email,
        }),
    ))
}

fn unique_field(e: &sqlx::Error) -> Option<&'static str> {
    if !is_unique_violation(e) {
        return None;
    }
    let msg = e.as_database_error()?.message().to_string();
    if msg.contains("users.username") {
        Some("username")
    } else if msg.contains("users.email") {
        Some("email")
    } else {
        None
    }
}

/// Hook run after a user row is inserted. Kept separate from `signup` so the
/// profile side effect stays visible at the call site.
pub async fn create_profile(conn: &mut SqliteConnection, user_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO profiles (user_id, created_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<SigninReq>,
) -> Result<Json<SigninResp>, ApiError> {
    let row: Option<CredentialsRow> = sqlx::query_as(
        r#"SELECT id, username, email, password_hash FROM users WHERE username = ?"#,
    )
    .bind(&payload.username)
    .fetch_optional(&state.pool)
    .await?;

    let Some(row) = row else {
        return Err(ApiError::Unauthorized("Invalid username or password".to_string()));
    };
    let is_valid = verify_password(&payload.password, &row.password_hash)
        .map_err(|e| ApiError::Internal(format!("verify error: {e}")))?;
    if !is_valid {
        return Err(ApiError::Unauthorized("Invalid username or password".to_string()));
    }

    let token = encode_jwt(row.id)?;
    Ok(Json(SigninResp {
        token,
        user: UserOut {
            id: row.id,
            username: row.username,
            email: row.email,
        },
    }))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(
    password: &str,
    stored_hash: &str,
) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(stored_hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn jwt_secret() -> Result<String, ApiError> {
    std::env::var("JWT_SECRET").map_err(|_| ApiError::Internal("JWT_SECRET not set".into()))
}

pub fn encode_jwt(user_id: i64) -> Result<String, ApiError> {
    let secret = jwt_secret()?;
    let now = Utc::now();
    let expire = Duration::hours(24);
    let exp = (now + expire).timestamp() as usize;
    let iat = now.timestamp() as usize;

    let claim = Claims {
        sub: user_id.to_string(),
        iat,
        exp,
    };

    encode(
        &Header::default(),
        &claim,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("jwt encode error: {e}")))
}

pub fn decode_jwt(token: &str) -> Result<Claims, ApiError> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))?;

    Ok(data.claims)
}

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization scheme".into()))?;

    let claims = decode_jwt(token)?;
    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| ApiError::Unauthorized("Invalid sub in token".into()))?;

    req.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(req).await)
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ProfileResp>, ApiError> {
    let profile = fetch_profile(&state, user.user_id).await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileReq>,
) -> Result<Json<ProfileResp>, ApiError> {
    sqlx::query(
        r#"UPDATE users
        SET first_name = COALESCE(?, first_name), last_name = COALESCE(?, last_name)
        WHERE id = ?"#,
    )
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(user.user_id)
    .execute(&state.pool)
    .await?;

    let profile = fetch_profile(&state, user.user_id).await?;
    Ok(Json(profile))
}

async fn fetch_profile(state: &AppState, user_id: i64) -> Result<ProfileResp, ApiError> {
    sqlx::query_as::<_, ProfileResp>(
        r#"SELECT p.id, u.username, u.email, u.first_name, u.last_name, p.created_at
        FROM profiles p
        JOIN users u ON u.id = p.user_id
        WHERE p.user_id = ?"#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound("profile"))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("user"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,
    pub iat: usize,
    pub sub: String, // user id as a string
}

#[derive(Deserialize)]
pub struct SignupReq {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Deserialize)]
pub struct SigninReq {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SigninResp {
    pub token: String,
    pub user: UserOut,
}

#[derive(Serialize)]
pub struct UserOut {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Serialize, FromRow)]
pub struct ProfileResp {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct UpdateProfileReq {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i64,
}

#[derive(Debug, FromRow)]
struct CredentialsRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(verify_password("hunter2hunter2", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn jwt_round_trip() {
        std::env::set_var("JWT_SECRET", "unit-test-secret");
        let token = encode_jwt(42).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, "42");
    }
}
