use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use uuid::Uuid;

use friendzi_db::models::{FeedFilter, LikeOutcome, UnlikeOutcome};
use friendzi_types::api::{
    Claims, CommentRequest, CommentResponse, CommentsResponse, Envelope, LikeResponse,
    MessageBody, PostRequest, PostResponse, PostsResponse,
};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{Page, PageQuery};
use crate::projection;

const FEED_PAGE_SIZE: u32 = 10;
const COMMENT_PAGE_SIZE: u32 = 20;
const TRENDING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(flatten)]
    pub page: PageQuery,
    /// `all` (default) or `following`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn post_not_found() -> ApiError {
    ApiError::NotFound("Post not found".into())
}

/// One page of `filter`, annotated with whether `viewer` liked each post.
async fn feed_page(
    state: &AppState,
    viewer: Uuid,
    filter: FeedFilter,
    page: Page,
) -> ApiResult<PostsResponse> {
    let viewer = viewer.to_string();
    let (rows, total, liked) = blocking(state, move |db| {
        let (rows, total) = db.list_posts(&filter, page.limit, page.offset())?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let liked = db.liked_post_ids(&viewer, &ids)?;
        Ok((rows, total, liked))
    })
    .await?;

    Ok(PostsResponse {
        posts: rows
            .into_iter()
            .map(|row| {
                let user_liked = liked.contains(&row.id);
                projection::post(row, user_liked)
            })
            .collect(),
        page: page.meta(total),
    })
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<PostRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let content = non_blank(req.content);
    let image = non_blank(req.image);
    if content.is_none() && image.is_none() {
        return Err(ApiError::Validation(
            "Post content or image is required".into(),
        ));
    }

    let author = claims.sub.to_string();
    let row = blocking(&state, move |db| {
        db.create_post(
            &Uuid::new_v4().to_string(),
            &author,
            content.as_deref(),
            image.as_deref(),
        )
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(PostResponse {
            message: Some("Post created successfully".into()),
            post: projection::post(row, false),
        })),
    ))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.page.resolve(FEED_PAGE_SIZE);
    let filter = match query.kind.as_deref() {
        Some("following") => FeedFilter::Following {
            viewer_id: claims.sub.to_string(),
        },
        _ => FeedFilter::All,
    };
    let body = feed_page(&state, claims.sub, filter, page).await?;
    Ok(Json(Envelope::ok(body)))
}

pub async fn trending_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(FEED_PAGE_SIZE);
    let since = (Utc::now() - chrono::Duration::days(TRENDING_WINDOW_DAYS))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let body = feed_page(&state, claims.sub, FeedFilter::Trending { since }, page).await?;
    Ok(Json(Envelope::ok(body)))
}

pub async fn user_posts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(FEED_PAGE_SIZE);
    let id = user_id.to_string();
    if !blocking(&state, move |db| db.user_exists(&id)).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    let filter = FeedFilter::Author {
        user_id: user_id.to_string(),
    };
    let body = feed_page(&state, claims.sub, filter, page).await?;
    Ok(Json(Envelope::ok(body)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (id, viewer) = (post_id.to_string(), claims.sub.to_string());
    let (row, liked) = blocking(&state, move |db| {
        let Some(row) = db.get_post(&id)? else {
            return Ok(None);
        };
        let liked = !db.liked_post_ids(&viewer, &[id])?.is_empty();
        Ok(Some((row, liked)))
    })
    .await?
    .ok_or_else(post_not_found)?;

    Ok(Json(Envelope::ok(PostResponse {
        message: None,
        post: projection::post(row, liked),
    })))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<PostRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let (id, owner) = (post_id.to_string(), claims.sub.to_string());
    let (row, liked) = blocking(&state, move |db| {
        let Some(row) =
            db.update_post(&id, &owner, req.content.as_deref(), req.image.as_deref())?
        else {
            return Ok(None);
        };
        let liked = !db.liked_post_ids(&owner, &[id])?.is_empty();
        Ok(Some((row, liked)))
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("Post not found or unauthorized".into()))?;

    Ok(Json(Envelope::ok(PostResponse {
        message: Some("Post updated successfully".into()),
        post: projection::post(row, liked),
    })))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (id, owner) = (post_id.to_string(), claims.sub.to_string());
    if !blocking(&state, move |db| db.delete_post(&id, &owner)).await? {
        return Err(ApiError::NotFound("Post not found or unauthorized".into()));
    }
    Ok(Json(Envelope::ok(MessageBody::new(
        "Post deleted successfully",
    ))))
}

pub async fn like_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (id, user) = (post_id.to_string(), claims.sub.to_string());
    let outcome = blocking(&state, move |db| {
        db.like_post(&Uuid::new_v4().to_string(), &id, &user)
    })
    .await?;

    match outcome {
        LikeOutcome::Liked { likes } => Ok(Json(Envelope::ok(LikeResponse {
            message: "Post liked successfully".into(),
            likes,
        }))),
        LikeOutcome::AlreadyLiked => Err(ApiError::Conflict(
            "You have already liked this post".into(),
        )),
        LikeOutcome::PostNotFound => Err(post_not_found()),
    }
}

pub async fn unlike_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (id, user) = (post_id.to_string(), claims.sub.to_string());
    let outcome = blocking(&state, move |db| db.unlike_post(&id, &user)).await?;

    match outcome {
        UnlikeOutcome::Unliked { likes } => Ok(Json(Envelope::ok(LikeResponse {
            message: "Post unliked successfully".into(),
            likes,
        }))),
        UnlikeOutcome::NotLiked => Err(ApiError::Validation(
            "You have not liked this post".into(),
        )),
        UnlikeOutcome::PostNotFound => Err(post_not_found()),
    }
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let content = non_blank(req.content)
        .ok_or_else(|| ApiError::Validation("Comment content is required".into()))?;

    let (id, author) = (post_id.to_string(), claims.sub.to_string());
    let row = blocking(&state, move |db| {
        db.add_comment(&Uuid::new_v4().to_string(), &id, &author, &content)
    })
    .await?
    .ok_or_else(post_not_found)?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(CommentResponse {
            message: "Comment added successfully".into(),
            comment: projection::comment(row),
        })),
    ))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(COMMENT_PAGE_SIZE);
    let id = post_id.to_string();
    let (rows, total) = blocking(&state, move |db| {
        if !db.post_exists(&id)? {
            return Ok(None);
        }
        db.list_comments(&id, page.limit, page.offset()).map(Some)
    })
    .await?
    .ok_or_else(post_not_found)?;

    Ok(Json(Envelope::ok(CommentsResponse {
        comments: rows.into_iter().map(projection::comment).collect(),
        page: page.meta(total),
    })))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (post, comment, author) = (
        post_id.to_string(),
        comment_id.to_string(),
        claims.sub.to_string(),
    );
    if !blocking(&state, move |db| db.delete_comment(&comment, &post, &author)).await? {
        return Err(ApiError::NotFound(
            "Comment not found or unauthorized".into(),
        ));
    }
    Ok(Json(Envelope::ok(MessageBody::new(
        "Comment deleted successfully",
    ))))
}
