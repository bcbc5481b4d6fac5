use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id           TEXT PRIMARY KEY,
                username     TEXT NOT NULL UNIQUE,
                email        TEXT NOT NULL UNIQUE,
                password     TEXT NOT NULL,
                full_name    TEXT,
                avatar       TEXT,
                bio          TEXT,
                is_verified  INTEGER NOT NULL DEFAULT 0,
                is_online    INTEGER NOT NULL DEFAULT 0,
                last_seen    TEXT,
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE follows (
                id            TEXT PRIMARY KEY,
                follower_id   TEXT NOT NULL REFERENCES users(id),
                following_id  TEXT NOT NULL REFERENCES users(id),
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(follower_id, following_id),
                CHECK (follower_id != following_id)
            );

            CREATE INDEX idx_follows_following ON follows(following_id);

            CREATE TABLE posts (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                content         TEXT,
                image           TEXT,
                likes           INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
                comments_count  INTEGER NOT NULL DEFAULT 0 CHECK (comments_count >= 0),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_posts_user ON posts(user_id, created_at);
            CREATE INDEX idx_posts_created ON posts(created_at);

            CREATE TABLE likes (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(post_id, user_id)
            );

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_comments_post ON comments(post_id, created_at);

            -- pair_key is the two participant ids, sorted and joined by ':'.
            -- NULL for threads that are not two-party.
            CREATE TABLE conversations (
                id               TEXT PRIMARY KEY,
                pair_key         TEXT UNIQUE,
                last_message_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_conversations_last_message ON conversations(last_message_at);

            CREATE TABLE participants (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                user_id          TEXT NOT NULL REFERENCES users(id),
                unread_count     INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user ON participants(user_id);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL REFERENCES users(id),
                content          TEXT NOT NULL CHECK (length(content) > 0),
                is_read          INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
