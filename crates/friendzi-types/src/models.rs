use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile fields attached to posts, comments and messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
}

/// Conversation participant as shown in conversation listings,
/// with presence information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Everything about a user except the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Account fields returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
}

/// A profile page: the user plus social counts and whether the
/// viewer follows them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: UserProfile,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub content: Option<String>,
    pub image: Option<String>,
    pub likes: i64,
    pub comments_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: UserSummary,
    pub user_liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderRef {
    pub id: Uuid,
    pub username: String,
}

/// Most recent message of a conversation, as embedded in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender: SenderRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub users: Vec<ParticipantProfile>,
    pub last_message: Option<LastMessage>,
    /// The caller's own unread count for this conversation.
    pub unread_count: i64,
}
