//! Conversations, participants, messages and unread counters.
//!
//! Every multi-row effect runs in one IMMEDIATE transaction on the writer:
//! creating a conversation writes the conversation and both participants
//! together, and sending a message inserts the message, bumps
//! `last_message_at` and increments the other participants' unread counts
//! together. Two-party threads carry a UNIQUE `pair_key`, so a pair of users
//! can never end up with two conversations.

use anyhow::{Result, bail};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::{
    Access, ConversationRow, MessageRow, ParticipantRow, SendOutcome, UserSummaryRow,
};
use crate::{Database, OptionalExt, placeholders};

const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.is_read, m.created_at,
            u.id, u.username, u.full_name, u.avatar, u.is_verified
     FROM messages m
     JOIN users u ON u.id = m.sender_id";

/// Order-independent key for a two-party conversation.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Database {
    /// Return the conversation between `user_a` and `user_b`, creating it
    /// (with `new_id`) if none exists. The flag is true when it was created.
    ///
    /// Both users must exist; callers check that first.
    pub fn find_or_create_direct_conversation(
        &self,
        new_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<(String, bool)> {
        if user_a == user_b {
            bail!("A conversation needs two distinct participants");
        }
        let key = pair_key(user_a, user_b);

        self.with_tx(|tx| {
            if let Some(id) = conversation_by_pair_key(tx, &key)? {
                return Ok((id, false));
            }

            // Two-party threads written without a pair key: adopt the oldest.
            let legacy: Option<String> = tx
                .query_row(
                    "SELECT p1.conversation_id
                     FROM participants p1
                     JOIN participants p2 ON p2.conversation_id = p1.conversation_id
                     JOIN conversations c ON c.id = p1.conversation_id
                     WHERE p1.user_id = ?1 AND p2.user_id = ?2
                       AND c.pair_key IS NULL
                       AND (SELECT COUNT(*) FROM participants p3
                            WHERE p3.conversation_id = p1.conversation_id) = 2
                     ORDER BY c.created_at, c.rowid
                     LIMIT 1",
                    [user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = legacy {
                tx.execute(
                    "UPDATE conversations SET pair_key = ?1 WHERE id = ?2 AND pair_key IS NULL",
                    [&key, &id],
                )?;
                return Ok((id, false));
            }

            let inserted = tx.execute(
                "INSERT INTO conversations (id, pair_key) VALUES (?1, ?2)
                 ON CONFLICT(pair_key) DO NOTHING",
                [new_id, key.as_str()],
            )?;
            if inserted == 0 {
                // Lost a race with another writer; theirs is the conversation.
                return conversation_by_pair_key(tx, &key)?
                    .map(|id| (id, false))
                    .ok_or_else(|| anyhow::anyhow!("Conversation for pair {} vanished", key));
            }

            for user_id in [user_a, user_b] {
                tx.execute(
                    "INSERT INTO participants (id, conversation_id, user_id, unread_count)
                     VALUES (?1, ?2, ?3, 0)",
                    rusqlite::params![Uuid::new_v4().to_string(), new_id, user_id],
                )?;
            }

            Ok((new_id.to_string(), true))
        })
    }

    pub fn conversation_access(&self, conversation_id: &str, user_id: &str) -> Result<Access> {
        self.with_conn(|conn| access(conn, conversation_id, user_id))
    }

    /// A conversation as seen by `viewer_id` (unread count 0 if the viewer is
    /// not a participant).
    pub fn get_conversation(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id, c.pair_key, c.last_message_at, c.created_at,
                        COALESCE(p.unread_count, 0)
                 FROM conversations c
                 LEFT JOIN participants p ON p.conversation_id = c.id AND p.user_id = ?2
                 WHERE c.id = ?1",
                [conversation_id, viewer_id],
                conversation_from_row,
            )
            .optional()
        })
    }

    /// The user's conversations, most recent activity first, with the total.
    pub fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ConversationRow>, i64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM participants WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT c.id, c.pair_key, c.last_message_at, c.created_at, p.unread_count
                 FROM participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 WHERE p.user_id = ?1
                 ORDER BY c.last_message_at DESC, c.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, offset], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }

    /// Participants (with public profile and presence) of every listed
    /// conversation, in join order.
    pub fn participants_for(&self, conversation_ids: &[String]) -> Result<Vec<ParticipantRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT p.conversation_id, u.id, u.username, u.full_name, u.avatar,
                        u.is_verified, u.is_online, u.last_seen
                 FROM participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id IN ({})
                 ORDER BY p.created_at, p.rowid",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids.iter()), |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        full_name: row.get(3)?,
                        avatar: row.get(4)?,
                        is_verified: row.get(5)?,
                        is_online: row.get(6)?,
                        last_seen: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The single most recent message of each listed conversation. Conversations
    /// without messages are absent from the result.
    pub fn last_messages_for(&self, conversation_ids: &[String]) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.is_read, m.created_at,
                        u.id, u.username, u.full_name, u.avatar, u.is_verified
                 FROM (
                     SELECT id, conversation_id, sender_id, content, is_read, created_at,
                            ROW_NUMBER() OVER (
                                PARTITION BY conversation_id
                                ORDER BY created_at DESC, rowid DESC
                            ) AS rn
                     FROM messages
                     WHERE conversation_id IN ({})
                 ) m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.rn = 1",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids.iter()), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Persist a message and apply its side effects atomically: bump the
    /// conversation's `last_message_at` to the message's timestamp and
    /// increment every other participant's unread count.
    pub fn send_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<SendOutcome> {
        self.with_tx(|tx| {
            match access(tx, conversation_id, sender_id)? {
                Access::Participant => {}
                Access::NotParticipant => return Ok(SendOutcome::NotParticipant),
                Access::NoSuchConversation => return Ok(SendOutcome::ConversationNotFound),
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                [id, conversation_id, sender_id, content],
            )?;
            tx.execute(
                "UPDATE conversations
                 SET last_message_at = (SELECT created_at FROM messages WHERE id = ?1)
                 WHERE id = ?2",
                [id, conversation_id],
            )?;
            tx.execute(
                "UPDATE participants SET unread_count = unread_count + 1
                 WHERE conversation_id = ?1 AND user_id != ?2",
                [conversation_id, sender_id],
            )?;

            let mut stmt = tx.prepare(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT))?;
            let row = stmt.query_row([id], message_from_row)?;
            Ok(SendOutcome::Sent(row))
        })
    }

    /// One page of messages, newest first, with the total. Pure read.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<MessageRow>, i64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2 OFFSET ?3",
                MESSAGE_SELECT
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((rows, total))
        })
    }

    /// Mark every message in the conversation not sent by `user_id` as read
    /// and reset that user's unread count to zero. Returns messages flipped.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<usize> {
        self.with_tx(|tx| {
            let marked = tx.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                [conversation_id, user_id],
            )?;
            tx.execute(
                "UPDATE participants SET unread_count = 0
                 WHERE conversation_id = ?1 AND user_id = ?2",
                [conversation_id, user_id],
            )?;
            Ok(marked)
        })
    }

    /// `None` if the user is not a participant.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT unread_count FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                [conversation_id, user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn conversation_by_pair_key(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE pair_key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

fn access(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<Access> {
    let (exists, member): (bool, bool) = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1),
                EXISTS(SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2)",
        [conversation_id, user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(match (exists, member) {
        (false, _) => Access::NoSuchConversation,
        (true, false) => Access::NotParticipant,
        (true, true) => Access::Participant,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        pair_key: row.get(1)?,
        last_message_at: row.get(2)?,
        created_at: row.get(3)?,
        unread_count: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
        sender: UserSummaryRow::from_row_at(row, 6)?,
    })
}
