use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use friendzi_db::models::FollowOutcome;
use friendzi_types::api::{
    Claims, Envelope, FollowersResponse, FollowingResponse, MessageBody, ProfileResponse,
    UpdateProfileRequest, UpdatedProfileResponse, UsersResponse,
};
use friendzi_types::models::ProfileView;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::pagination::PageQuery;
use crate::projection;

const DEFAULT_PAGE_SIZE: u32 = 20;
const DIRECTORY_LIMIT: u32 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

async fn load_profile(state: &AppState, viewer: Uuid, target: Uuid) -> ApiResult<ProfileView> {
    let (viewer, target) = (viewer.to_string(), target.to_string());
    let loaded = blocking(state, move |db| {
        let Some(user) = db.get_user_by_id(&target)? else {
            return Ok(None);
        };
        let counts = db.profile_counts(&target)?;
        let is_following = db.is_following(&viewer, &target)?;
        Ok(Some((user, counts, is_following)))
    })
    .await?;

    let (user, counts, is_following) =
        loaded.ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(ProfileView {
        user: projection::user_profile(user),
        followers_count: counts.followers,
        following_count: counts.following,
        posts_count: counts.posts,
        is_following,
    })
}

pub async fn get_own_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = load_profile(&state, claims.sub, claims.sub).await?;
    Ok(Json(Envelope::ok(ProfileResponse { user })))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = load_profile(&state, claims.sub, user_id).await?;
    Ok(Json(Envelope::ok(ProfileResponse { user })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let id = claims.sub.to_string();
    let updated = blocking(&state, move |db| {
        db.update_profile(
            &id,
            req.full_name.as_deref(),
            req.bio.as_deref(),
            req.avatar.as_deref(),
        )
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(Envelope::ok(UpdatedProfileResponse {
        message: "Profile updated successfully".into(),
        user: projection::user_profile(updated),
    })))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    if user_id == claims.sub {
        return Err(ApiError::Validation("You cannot follow yourself".into()));
    }

    let (follower, following) = (claims.sub.to_string(), user_id.to_string());
    let outcome = blocking(&state, move |db| {
        db.follow(&Uuid::new_v4().to_string(), &follower, &following)
    })
    .await?;

    match outcome {
        FollowOutcome::Followed => {
            debug!("{} now follows {}", claims.sub, user_id);
            Ok(Json(Envelope::ok(MessageBody::new(
                "User followed successfully",
            ))))
        }
        FollowOutcome::AlreadyFollowing => Err(ApiError::Conflict(
            "You are already following this user".into(),
        )),
        FollowOutcome::TargetNotFound => Err(ApiError::NotFound("User not found".into())),
    }
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (follower, following) = (claims.sub.to_string(), user_id.to_string());
    let removed = blocking(&state, move |db| db.unfollow(&follower, &following)).await?;
    if !removed {
        return Err(ApiError::Validation(
            "You are not following this user".into(),
        ));
    }
    Ok(Json(Envelope::ok(MessageBody::new(
        "User unfollowed successfully",
    ))))
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let q = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::Validation("Search query is required".into()))?;

    let rows = blocking(&state, move |db| db.search_users(&q, DIRECTORY_LIMIT)).await?;
    Ok(Json(Envelope::ok(UsersResponse {
        users: rows.into_iter().map(projection::user_summary).collect(),
    })))
}

pub async fn online_users(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = blocking(&state, move |db| db.online_users(DIRECTORY_LIMIT)).await?;
    Ok(Json(Envelope::ok(UsersResponse {
        users: rows.into_iter().map(projection::user_summary).collect(),
    })))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(DEFAULT_PAGE_SIZE);
    let id = user_id.to_string();
    let (rows, total) = blocking(&state, move |db| {
        if !db.user_exists(&id)? {
            return Ok(None);
        }
        db.followers(&id, page.limit, page.offset()).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(Envelope::ok(FollowersResponse {
        followers: rows.into_iter().map(projection::user_summary).collect(),
        page: page.meta(total),
    })))
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(DEFAULT_PAGE_SIZE);
    let id = user_id.to_string();
    let (rows, total) = blocking(&state, move |db| {
        if !db.user_exists(&id)? {
            return Ok(None);
        }
        db.following(&id, page.limit, page.offset()).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(Envelope::ok(FollowingResponse {
        following: rows.into_iter().map(projection::user_summary).collect(),
        page: page.meta(total),
    })))
}
