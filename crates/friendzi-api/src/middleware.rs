use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};

use friendzi_types::api::Claims;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

pub fn decode_token(secret: &str, token: &str) -> jsonwebtoken::errors::Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Extract and validate the bearer token, then make sure the account still
/// exists. On success the claims are attached to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| ApiError::Unauthorized("Access token required".into()))?;

    let claims = decode_token(&state.jwt_secret, bearer.token())
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    let uid = claims.sub.to_string();
    if !blocking(&state, move |db| db.user_exists(&uid)).await? {
        return Err(ApiError::Unauthorized("User no longer exists".into()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
