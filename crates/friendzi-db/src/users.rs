use anyhow::Result;
use rusqlite::{Connection, ErrorCode};

use crate::models::{CreateUserOutcome, ProfileCounts, UserRow, UserSummaryRow};
use crate::{Database, OptionalExt, SQL_NOW};

impl Database {
    /// Insert a new account. A UNIQUE violation on username or email is
    /// reported as `Taken`, so a sign-up racing another one still maps to a
    /// conflict.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<CreateUserOutcome> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, full_name, avatar)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, username, email, password_hash, full_name, avatar],
            );
            match inserted {
                Ok(_) => Ok(CreateUserOutcome::Created),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(CreateUserOutcome::Taken)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// True if either the username or the email already belongs to someone.
    pub fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 OR email = ?2)",
                [username, email],
                |row| row.get(0),
            )?;
            Ok(taken)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| user_exists(conn, id))
    }

    /// Flip the online flag and stamp `last_seen`. Called on login and logout.
    pub fn set_presence(&self, id: &str, online: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                &format!(
                    "UPDATE users SET is_online = ?1, last_seen = {now}, updated_at = {now}
                     WHERE id = ?2",
                    now = SQL_NOW
                ),
                rusqlite::params![online, id],
            )?;
            Ok(())
        })
    }

    /// Update the provided profile fields; `None` leaves a field unchanged.
    /// Returns the updated row, or `None` if the user does not exist.
    pub fn update_profile(
        &self,
        id: &str,
        full_name: Option<&str>,
        bio: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE users SET
                        full_name = CASE WHEN ?2 THEN ?3 ELSE full_name END,
                        bio = CASE WHEN ?4 THEN ?5 ELSE bio END,
                        avatar = CASE WHEN ?6 THEN ?7 ELSE avatar END,
                        updated_at = {}
                     WHERE id = ?1",
                    SQL_NOW
                ),
                rusqlite::params![
                    id,
                    full_name.is_some(),
                    full_name,
                    bio.is_some(),
                    bio,
                    avatar.is_some(),
                    avatar,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", id)
        })
    }

    pub fn profile_counts(&self, id: &str) -> Result<ProfileCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1),
                    (SELECT COUNT(*) FROM posts WHERE user_id = ?1)",
                [id],
                |row| {
                    Ok(ProfileCounts {
                        followers: row.get(0)?,
                        following: row.get(1)?,
                        posts: row.get(2)?,
                    })
                },
            )?;
            Ok(counts)
        })
    }

    /// Case-insensitive substring match on username or full name.
    pub fn search_users(&self, query: &str, limit: u32) -> Result<Vec<UserSummaryRow>> {
        let pattern = format!("%{}%", escape_like(query));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, avatar, is_verified
                 FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' OR full_name LIKE ?1 ESCAPE '\\'
                 ORDER BY username
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, limit], |row| {
                    UserSummaryRow::from_row_at(row, 0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn online_users(&self, limit: u32) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, avatar, is_verified
                 FROM users
                 WHERE is_online = 1
                 ORDER BY last_seen DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| UserSummaryRow::from_row_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn user_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        UserRow::COLUMNS,
        column
    ))?;
    stmt.query_row([value], UserRow::from_row).optional()
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
