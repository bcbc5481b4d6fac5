use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use friendzi_db::Database;
use friendzi_db::models::CreateUserOutcome;
use friendzi_types::api::{
    AuthResponse, Claims, Envelope, LoginRequest, MeResponse, MessageBody, RegisterRequest,
};
use friendzi_types::models::AccountUser;

use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::projection;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// Development mode: 500 responses carry the underlying error text.
    pub expose_internal_errors: bool,
}

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_LEN: usize = 8;

fn taken() -> ApiError {
    ApiError::Conflict("User with this email or username already exists".into())
}

fn avatar_for(username: &str) -> String {
    format!("https://i.pravatar.cc/150?u={}", username)
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let username = req.username.as_deref().map(str::trim).unwrap_or_default();
    let email = req
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    let password = req.password.unwrap_or_default();
    let full_name = req
        .full_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ApiError::Validation(
            "Username, email and password are required".into(),
        ));
    }
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(ApiError::Validation(
            "Username must be between 3 and 32 characters".into(),
        ));
    }
    if !email.contains('@') {
        return Err(ApiError::Validation("Email address is not valid".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }

    let (name, mail) = (username.to_string(), email.clone());
    if blocking(&state, move |db| db.username_or_email_taken(&name, &mail)).await? {
        return Err(taken());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let avatar = avatar_for(username);
    let user = AccountUser {
        id: user_id,
        username: username.to_string(),
        email,
        full_name,
        avatar: Some(avatar),
        is_verified: false,
    };

    let row = user.clone();
    let outcome = blocking(&state, move |db| {
        db.create_user(
            &row.id.to_string(),
            &row.username,
            &row.email,
            &password_hash,
            row.full_name.as_deref(),
            row.avatar.as_deref(),
        )
    })
    .await?;
    // The pre-check above can race another sign-up; the insert has the last word.
    if outcome == CreateUserOutcome::Taken {
        return Err(taken());
    }

    let token = create_token(&state, user_id, &user.username, &user.email)?;
    info!("Registered user {} ({})", user.username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(AuthResponse {
            message: "User registered successfully".into(),
            user,
            token,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let email = req
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    let password = req.password.unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        return Err(ApiError::Validation("Email and password are required".into()));
    }

    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let user = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let id = user.id.clone();
    blocking(&state, move |db| db.set_presence(&id, true)).await?;

    let user = projection::account_user(user);
    let token = create_token(&state, user.id, &user.username, &user.email)?;

    Ok(Json(Envelope::ok(AuthResponse {
        message: "Login successful".into(),
        user,
        token,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let id = claims.sub.to_string();
    blocking(&state, move |db| db.set_presence(&id, false)).await?;
    Ok(Json(Envelope::ok(MessageBody::new("Logout successful"))))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let id = claims.sub.to_string();
    let user = blocking(&state, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(Envelope::ok(MeResponse {
        user: projection::user_profile(user),
    })))
}

pub fn create_token(
    state: &AppStateInner,
    user_id: Uuid,
    username: &str,
    email: &str,
) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        email: email.to_string(),
        exp: (chrono::Utc::now() + state.token_ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}
