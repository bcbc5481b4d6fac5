//! Row-to-wire conversions. Stored ids and timestamps are text; a corrupt
//! value is logged and replaced with a default rather than failing the
//! whole listing.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use friendzi_db::models::{
    CommentRow, ConversationRow, MessageRow, ParticipantRow, PostRow, UserRow, UserSummaryRow,
};
use friendzi_types::models::{
    AccountUser, Comment, Conversation, LastMessage, Message, ParticipantProfile, Post,
    SenderRef, UserProfile, UserSummary,
};

pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's CURRENT_TIMESTAMP carry no zone; they are UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", what, raw, e);
            DateTime::default()
        })
}

fn parse_optional_timestamp(raw: Option<&str>, what: &str) -> Option<DateTime<Utc>> {
    raw.map(|r| parse_timestamp(r, what))
}

pub fn user_summary(row: UserSummaryRow) -> UserSummary {
    UserSummary {
        id: parse_id(&row.id, "user id"),
        username: row.username,
        full_name: row.full_name,
        avatar: row.avatar,
        is_verified: row.is_verified,
    }
}

pub fn user_profile(row: UserRow) -> UserProfile {
    UserProfile {
        id: parse_id(&row.id, "user id"),
        last_seen: parse_optional_timestamp(row.last_seen.as_deref(), "last_seen"),
        created_at: parse_timestamp(&row.created_at, "user created_at"),
        username: row.username,
        email: row.email,
        full_name: row.full_name,
        avatar: row.avatar,
        bio: row.bio,
        is_verified: row.is_verified,
        is_online: row.is_online,
    }
}

pub fn account_user(row: UserRow) -> AccountUser {
    AccountUser {
        id: parse_id(&row.id, "user id"),
        username: row.username,
        email: row.email,
        full_name: row.full_name,
        avatar: row.avatar,
        is_verified: row.is_verified,
    }
}

pub fn post(row: PostRow, user_liked: bool) -> Post {
    Post {
        id: parse_id(&row.id, "post id"),
        created_at: parse_timestamp(&row.created_at, "post created_at"),
        updated_at: parse_timestamp(&row.updated_at, "post updated_at"),
        content: row.content,
        image: row.image,
        likes: row.likes,
        comments_count: row.comments_count,
        author: user_summary(row.author),
        user_liked,
    }
}

pub fn comment(row: CommentRow) -> Comment {
    Comment {
        id: parse_id(&row.id, "comment id"),
        post_id: parse_id(&row.post_id, "comment post_id"),
        created_at: parse_timestamp(&row.created_at, "comment created_at"),
        content: row.content,
        author: user_summary(row.author),
    }
}

pub fn message(row: MessageRow) -> Message {
    Message {
        id: parse_id(&row.id, "message id"),
        conversation_id: parse_id(&row.conversation_id, "message conversation_id"),
        sender_id: parse_id(&row.sender_id, "message sender_id"),
        created_at: parse_timestamp(&row.created_at, "message created_at"),
        content: row.content,
        is_read: row.is_read,
        sender: user_summary(row.sender),
    }
}

fn last_message(row: MessageRow) -> LastMessage {
    let sender_id = parse_id(&row.sender_id, "message sender_id");
    LastMessage {
        id: parse_id(&row.id, "message id"),
        created_at: parse_timestamp(&row.created_at, "message created_at"),
        content: row.content,
        sender_id,
        is_read: row.is_read,
        sender: SenderRef {
            id: sender_id,
            username: row.sender.username,
        },
    }
}

fn participant(row: ParticipantRow) -> ParticipantProfile {
    ParticipantProfile {
        id: parse_id(&row.user_id, "participant user_id"),
        last_seen: parse_optional_timestamp(row.last_seen.as_deref(), "last_seen"),
        username: row.username,
        full_name: row.full_name,
        avatar: row.avatar,
        is_verified: row.is_verified,
        is_online: row.is_online,
    }
}

/// Assemble conversation views from their rows plus the batched participant
/// and last-message lookups. Participants equal to `hide_user` are left out.
pub fn conversations(
    rows: Vec<ConversationRow>,
    participants: Vec<ParticipantRow>,
    last_messages: Vec<MessageRow>,
    hide_user: Option<&str>,
) -> Vec<Conversation> {
    let mut users_by_conversation: HashMap<String, Vec<ParticipantProfile>> = HashMap::new();
    for p in participants {
        if hide_user == Some(p.user_id.as_str()) {
            continue;
        }
        users_by_conversation
            .entry(p.conversation_id.clone())
            .or_default()
            .push(participant(p));
    }

    let mut last_by_conversation: HashMap<String, LastMessage> = last_messages
        .into_iter()
        .map(|m| (m.conversation_id.clone(), last_message(m)))
        .collect();

    rows.into_iter()
        .map(|row| Conversation {
            id: parse_id(&row.id, "conversation id"),
            last_message_at: parse_timestamp(&row.last_message_at, "last_message_at"),
            created_at: parse_timestamp(&row.created_at, "conversation created_at"),
            users: users_by_conversation.remove(&row.id).unwrap_or_default(),
            last_message: last_by_conversation.remove(&row.id),
            unread_count: row.unread_count,
        })
        .collect()
}
