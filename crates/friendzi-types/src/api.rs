use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AccountUser, Comment, Conversation, Message, Post, ProfileView, UserProfile, UserSummary,
};

// -- JWT Claims --

/// Bearer token claims. Issued at register/login, verified by the auth
/// middleware on every protected route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub exp: usize,
}

// -- Envelope --

/// Every successful response is `{ "success": true, ...body }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn ok(body: T) -> Self {
        Self { success: true, body }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pagination totals shared by every paged listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_count: i64,
    pub current_page: u32,
    pub total_pages: i64,
}

// -- Auth --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: AccountUser,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
}

// -- Users --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: ProfileView,
}

#[derive(Debug, Serialize)]
pub struct UpdatedProfileResponse {
    pub message: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct FollowersResponse {
    pub followers: Vec<UserSummary>,
    #[serde(flatten)]
    pub page: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct FollowingResponse {
    pub following: Vec<UserSummary>,
    #[serde(flatten)]
    pub page: PageMeta,
}

// -- Posts --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostRequest {
    pub content: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub post: Post,
}

#[derive(Debug, Serialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
    #[serde(flatten)]
    pub page: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub message: String,
    pub likes: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub message: String,
    pub comment: Comment,
}

#[derive(Debug, Serialize)]
pub struct CommentsResponse {
    pub comments: Vec<Comment>,
    #[serde(flatten)]
    pub page: PageMeta,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
    #[serde(flatten)]
    pub page: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SentMessageResponse {
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub page: PageMeta,
}
