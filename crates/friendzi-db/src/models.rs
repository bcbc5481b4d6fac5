//! Rows as stored, ids and timestamps still text. The api crate projects
//! them into `friendzi-types` wire models.

use rusqlite::Row;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub(crate) const COLUMNS: &'static str = "id, username, email, password, full_name, avatar, bio, \
         is_verified, is_online, last_seen, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            full_name: row.get(4)?,
            avatar: row.get(5)?,
            bio: row.get(6)?,
            is_verified: row.get(7)?,
            is_online: row.get(8)?,
            last_seen: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// Public profile columns joined onto posts, comments and messages.
#[derive(Debug, Clone)]
pub struct UserSummaryRow {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
}

impl UserSummaryRow {
    /// Read the five summary columns starting at `start`.
    pub(crate) fn from_row_at(row: &Row<'_>, start: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(start)?,
            username: row.get(start + 1)?,
            full_name: row.get(start + 2)?,
            avatar: row.get(start + 3)?,
            is_verified: row.get(start + 4)?,
        })
    }
}

pub struct ProfileCounts {
    pub followers: i64,
    pub following: i64,
    pub posts: i64,
}

pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub content: Option<String>,
    pub image: Option<String>,
    pub likes: i64,
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserSummaryRow,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub author: UserSummaryRow,
}

/// A conversation as seen by one participant.
pub struct ConversationRow {
    pub id: String,
    pub pair_key: Option<String>,
    pub last_message_at: String,
    pub created_at: String,
    /// The viewer's unread count, read from their participant row.
    pub unread_count: i64,
}

/// Participant joined with the user's public profile and presence.
pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
    pub sender: UserSummaryRow,
}

// -- Mutation outcomes --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created,
    /// Username or email already belongs to someone; nothing was written.
    Taken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowing,
    TargetNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Liked { likes: i64 },
    AlreadyLiked,
    PostNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlikeOutcome {
    Unliked { likes: i64 },
    NotLiked,
    PostNotFound,
}

/// Whether a user may touch a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Participant,
    NotParticipant,
    NoSuchConversation,
}

pub enum SendOutcome {
    Sent(MessageRow),
    NotParticipant,
    ConversationNotFound,
}

/// What the feed query filters and orders by.
#[derive(Debug, Clone)]
pub enum FeedFilter {
    /// Every post, newest first.
    All,
    /// Posts by users the viewer follows, plus the viewer's own.
    Following { viewer_id: String },
    /// Posts by one author, newest first.
    Author { user_id: String },
    /// Posts created at or after `since` (RFC 3339), most liked first.
    Trending { since: String },
}
