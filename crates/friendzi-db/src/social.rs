use anyhow::Result;
use rusqlite::Connection;

use crate::models::{FollowOutcome, UserSummaryRow};
use crate::users::user_exists;
use crate::Database;

impl Database {
    /// Add a follow edge. The existence check and the insert share one
    /// transaction so a duplicate is never written.
    pub fn follow(&self, id: &str, follower_id: &str, following_id: &str) -> Result<FollowOutcome> {
        self.with_tx(|tx| {
            if !user_exists(tx, following_id)? {
                return Ok(FollowOutcome::TargetNotFound);
            }
            if is_following(tx, follower_id, following_id)? {
                return Ok(FollowOutcome::AlreadyFollowing);
            }
            tx.execute(
                "INSERT INTO follows (id, follower_id, following_id) VALUES (?1, ?2, ?3)",
                [id, follower_id, following_id],
            )?;
            Ok(FollowOutcome::Followed)
        })
    }

    /// Remove a follow edge. Returns false if there was none.
    pub fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                [follower_id, following_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn(|conn| is_following(conn, follower_id, following_id))
    }

    /// Users following `user_id`, newest edge first, with the total count.
    pub fn followers(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UserSummaryRow>, i64)> {
        self.with_conn(|conn| query_edges(conn, "following_id", "follower_id", user_id, limit, offset))
    }

    /// Users `user_id` follows, newest edge first, with the total count.
    pub fn following(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UserSummaryRow>, i64)> {
        self.with_conn(|conn| query_edges(conn, "follower_id", "following_id", user_id, limit, offset))
    }
}

fn is_following(conn: &Connection, follower_id: &str, following_id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
        [follower_id, following_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Page through follow edges where `match_col = user_id`, returning the user
/// on the `other_col` side.
fn query_edges(
    conn: &Connection,
    match_col: &str,
    other_col: &str,
    user_id: &str,
    limit: u32,
    offset: u32,
) -> Result<(Vec<UserSummaryRow>, i64)> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM follows WHERE {} = ?1", match_col),
        [user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT u.id, u.username, u.full_name, u.avatar, u.is_verified
         FROM follows f
         JOIN users u ON u.id = f.{other}
         WHERE f.{matching} = ?1
         ORDER BY f.created_at DESC, f.rowid DESC
         LIMIT ?2 OFFSET ?3",
        other = other_col,
        matching = match_col
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, limit, offset], |row| {
            UserSummaryRow::from_row_at(row, 0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_id, seed_user};

    #[test]
    fn follow_is_unique_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");

        assert_eq!(db.follow(&new_id(), &a, &b).unwrap(), FollowOutcome::Followed);
        assert_eq!(
            db.follow(&new_id(), &a, &b).unwrap(),
            FollowOutcome::AlreadyFollowing
        );
        assert_eq!(
            db.follow(&new_id(), &a, "missing").unwrap(),
            FollowOutcome::TargetNotFound
        );

        assert!(db.is_following(&a, &b).unwrap());
        assert!(!db.is_following(&b, &a).unwrap());

        let (followers, total) = db.followers(&b, 20, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(followers[0].username, "alice");

        let (following, total) = db.following(&a, 20, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(following[0].username, "bob");
    }

    #[test]
    fn unfollow_reports_missing_edge() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");

        assert!(!db.unfollow(&a, &b).unwrap());
        db.follow(&new_id(), &a, &b).unwrap();
        assert!(db.unfollow(&a, &b).unwrap());
        assert!(!db.is_following(&a, &b).unwrap());
        assert_eq!(db.profile_counts(&b).unwrap().followers, 0);
    }

    #[test]
    fn self_follow_is_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        assert!(db.follow(&new_id(), &a, &a).is_err());
    }

    #[test]
    fn edges_paginate() {
        let db = Database::open_in_memory().unwrap();
        let target = seed_user(&db, "target");
        for i in 0..5 {
            let f = seed_user(&db, &format!("fan{}", i));
            db.follow(&new_id(), &f, &target).unwrap();
        }

        let (page, total) = db.followers(&target, 2, 4).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
        // Oldest edge is last.
        assert_eq!(page[0].username, "fan0");
    }
}
