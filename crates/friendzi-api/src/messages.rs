use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use friendzi_db::models::{Access, SendOutcome};
use friendzi_types::api::{
    Claims, ConversationResponse, ConversationsResponse, CreateConversationRequest, Envelope,
    MessageBody, MessagesResponse, SendMessageRequest, SentMessageResponse,
};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::pagination::PageQuery;
use crate::projection;

const DEFAULT_PAGE_SIZE: u32 = 20;

fn conversation_not_found() -> ApiError {
    ApiError::NotFound("Conversation not found".into())
}

fn not_a_participant() -> ApiError {
    ApiError::Forbidden("You are not a participant in this conversation".into())
}

fn check_access(access: Access) -> ApiResult<()> {
    match access {
        Access::Participant => Ok(()),
        Access::NotParticipant => Err(not_a_participant()),
        Access::NoSuchConversation => Err(conversation_not_found()),
    }
}

/// Return the direct conversation between the caller and `userId`, creating
/// it on first contact. Both participants are included in the response.
pub async fn create_or_get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let raw = req
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("userId is required".into()))?;
    let other: Uuid = raw
        .parse()
        .map_err(|_| ApiError::Validation("userId is not a valid id".into()))?;
    if other == claims.sub {
        return Err(ApiError::Validation(
            "Cannot start a conversation with yourself".into(),
        ));
    }

    let (me, them) = (claims.sub.to_string(), other.to_string());
    let loaded = blocking(&state, move |db| {
        if !db.user_exists(&them)? {
            return Ok(None);
        }
        let (id, created) =
            db.find_or_create_direct_conversation(&Uuid::new_v4().to_string(), &me, &them)?;
        if created {
            info!("Opened conversation {} between {} and {}", id, me, them);
        }

        let row = db
            .get_conversation(&id, &me)?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after lookup", id))?;
        let ids = vec![id];
        let participants = db.participants_for(&ids)?;
        let last = db.last_messages_for(&ids)?;
        Ok(Some((row, participants, last)))
    })
    .await?;

    let (row, participants, last) =
        loaded.ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    let conversation = projection::conversations(vec![row], participants, last, None)
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("conversation projection was empty")))?;

    Ok(Json(Envelope::ok(ConversationResponse { conversation })))
}

/// The caller's conversations, most recent activity first. Each carries the
/// other participants, the last message and the caller's unread count.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(DEFAULT_PAGE_SIZE);
    let me = claims.sub.to_string();

    let viewer = me.clone();
    let (rows, total, participants, last) = blocking(&state, move |db| {
        let (rows, total) = db.list_conversations(&viewer, page.limit, page.offset())?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let participants = db.participants_for(&ids)?;
        let last = db.last_messages_for(&ids)?;
        Ok((rows, total, participants, last))
    })
    .await?;

    Ok(Json(Envelope::ok(ConversationsResponse {
        conversations: projection::conversations(rows, participants, last, Some(&me)),
        page: page.meta(total),
    })))
}

/// One page of messages, newest first. The page is returned as it was read;
/// marking the conversation read happens afterwards in its own transaction.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.resolve(DEFAULT_PAGE_SIZE);
    let (cid, me) = (conversation_id.to_string(), claims.sub.to_string());

    let (read_cid, read_me) = (cid.clone(), me.clone());
    let (access, fetched) = blocking(&state, move |db| {
        let access = db.conversation_access(&read_cid, &read_me)?;
        if access != Access::Participant {
            return Ok((access, None));
        }
        let fetched = db.get_messages(&read_cid, page.limit, page.offset())?;
        Ok((access, Some(fetched)))
    })
    .await?;
    check_access(access)?;
    let (rows, total) = fetched.ok_or_else(conversation_not_found)?;

    let marked = blocking(&state, move |db| db.mark_read(&cid, &me)).await?;
    if marked > 0 {
        debug!("Marked {} messages read in {}", marked, conversation_id);
    }

    Ok(Json(Envelope::ok(MessagesResponse {
        messages: rows.into_iter().map(projection::message).collect(),
        page: page.meta(total),
    })))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let content = req
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Message content is required".into()))?;

    let (cid, me) = (conversation_id.to_string(), claims.sub.to_string());
    let outcome = blocking(&state, move |db| {
        db.send_message(&Uuid::new_v4().to_string(), &cid, &me, &content)
    })
    .await?;

    match outcome {
        SendOutcome::Sent(row) => Ok((
            StatusCode::CREATED,
            Json(Envelope::ok(SentMessageResponse {
                message: projection::message(row),
            })),
        )),
        SendOutcome::NotParticipant => Err(not_a_participant()),
        SendOutcome::ConversationNotFound => Err(conversation_not_found()),
    }
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (cid, me) = (conversation_id.to_string(), claims.sub.to_string());

    let (check_cid, check_me) = (cid.clone(), me.clone());
    let access = blocking(&state, move |db| {
        db.conversation_access(&check_cid, &check_me)
    })
    .await?;
    check_access(access)?;

    blocking(&state, move |db| db.mark_read(&cid, &me)).await?;
    Ok(Json(Envelope::ok(MessageBody::new(
        "Messages marked as read",
    ))))
}
