pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod pagination;
pub mod posts;
pub mod projection;
pub mod users;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware::{from_fn_with_state, map_response_with_state},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde_json::json;
use tracing::error;

use friendzi_db::Database;

use crate::auth::AppState;
use crate::error::ApiError;

/// Every route of the service. Transport layers (CORS, tracing) are added by
/// the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route(
            "/api/users/profile",
            get(users::get_own_profile).put(users::update_profile),
        )
        .route("/api/users/search", get(users::search_users))
        .route("/api/users/online", get(users::online_users))
        .route("/api/users/{id}", get(users::get_profile))
        .route(
            "/api/users/{id}/follow",
            post(users::follow).delete(users::unfollow),
        )
        .route("/api/users/{id}/followers", get(users::followers))
        .route("/api/users/{id}/following", get(users::following))
        .route("/api/users/{id}/posts", get(posts::user_posts))
        .route("/api/posts", post(posts::create_post).get(posts::list_posts))
        .route("/api/posts/trending", get(posts::trending_posts))
        .route(
            "/api/posts/{id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route(
            "/api/posts/{id}/like",
            post(posts::like_post).delete(posts::unlike_post),
        )
        .route(
            "/api/posts/{id}/comments",
            post(posts::add_comment).get(posts::list_comments),
        )
        .route(
            "/api/posts/{id}/comments/{comment_id}",
            delete(posts::delete_comment),
        )
        .route(
            "/api/messages/conversations",
            post(messages::create_or_get_conversation).get(messages::list_conversations),
        )
        .route(
            "/api/messages/conversations/{id}",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/api/messages/conversations/{id}/read",
            put(messages::mark_read),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .layer(map_response_with_state(state.clone(), error::expose_error_detail))
        .with_state(state)
}

async fn welcome() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "Welcome to the FriendZi API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Route not found" })),
    )
}

/// Run a store call off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::from)
}
