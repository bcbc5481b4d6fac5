use std::collections::HashSet;

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::models::{CommentRow, FeedFilter, LikeOutcome, PostRow, UnlikeOutcome, UserSummaryRow};
use crate::{Database, OptionalExt, SQL_NOW, placeholders};

const POST_SELECT: &str = "SELECT p.id, p.user_id, p.content, p.image, p.likes, p.comments_count,
            p.created_at, p.updated_at,
            u.id, u.username, u.full_name, u.avatar, u.is_verified
     FROM posts p
     JOIN users u ON u.id = p.user_id";

const COMMENT_SELECT: &str = "SELECT c.id, c.post_id, c.user_id, c.content, c.created_at,
            u.id, u.username, u.full_name, u.avatar, u.is_verified
     FROM comments c
     JOIN users u ON u.id = c.user_id";

impl Database {
    // -- Posts --

    pub fn create_post(
        &self,
        id: &str,
        user_id: &str,
        content: Option<&str>,
        image: Option<&str>,
    ) -> Result<PostRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, content, image) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id, content, image],
            )?;
            query_post(conn, id)?.ok_or_else(|| anyhow::anyhow!("Post {} vanished after insert", id))
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// One page of posts for `filter`, with the total number of matches.
    pub fn list_posts(
        &self,
        filter: &FeedFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<PostRow>, i64)> {
        let (clause, order, mut params) = match filter {
            FeedFilter::All => ("1 = 1", "p.created_at DESC, p.rowid DESC", vec![]),
            FeedFilter::Following { viewer_id } => (
                "(p.user_id = ?1
                  OR p.user_id IN (SELECT following_id FROM follows WHERE follower_id = ?1))",
                "p.created_at DESC, p.rowid DESC",
                vec![Value::Text(viewer_id.clone())],
            ),
            FeedFilter::Author { user_id } => (
                "p.user_id = ?1",
                "p.created_at DESC, p.rowid DESC",
                vec![Value::Text(user_id.clone())],
            ),
            FeedFilter::Trending { since } => (
                "p.created_at >= ?1",
                "p.likes DESC, p.comments_count DESC, p.created_at DESC, p.rowid DESC",
                vec![Value::Text(since.clone())],
            ),
        };

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM posts p WHERE {}", clause),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let n = params.len();
            params.push(Value::Integer(limit.into()));
            params.push(Value::Integer(offset.into()));
            let sql = format!(
                "{} WHERE {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
                POST_SELECT,
                clause,
                order,
                n + 1,
                n + 2
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }

    /// Which of `post_ids` has `user_id` liked.
    pub fn liked_post_ids(&self, user_id: &str, post_ids: &[String]) -> Result<HashSet<String>> {
        if post_ids.is_empty() {
            return Ok(HashSet::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id FROM likes WHERE post_id IN ({}) AND user_id = ?{}",
                placeholders(post_ids.len()),
                post_ids.len() + 1
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = post_ids
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(user_id));
            let ids = stmt
                .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Owner-only edit. Empty or missing fields keep their current value.
    /// `None` means no such post owned by `user_id`.
    pub fn update_post(
        &self,
        id: &str,
        user_id: &str,
        content: Option<&str>,
        image: Option<&str>,
    ) -> Result<Option<PostRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE posts SET
                        content = COALESCE(NULLIF(?3, ''), content),
                        image = COALESCE(NULLIF(?4, ''), image),
                        updated_at = {}
                     WHERE id = ?1 AND user_id = ?2",
                    SQL_NOW
                ),
                rusqlite::params![id, user_id, content, image],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_post(conn, id)
        })
    }

    /// Owner-only delete; likes and comments go with the post.
    pub fn delete_post(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM posts WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn post_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| post_exists(conn, id))
    }

    // -- Likes --

    pub fn like_post(&self, id: &str, post_id: &str, user_id: &str) -> Result<LikeOutcome> {
        self.with_tx(|tx| {
            if !post_exists(tx, post_id)? {
                return Ok(LikeOutcome::PostNotFound);
            }
            let inserted = tx.execute(
                "INSERT INTO likes (id, post_id, user_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(post_id, user_id) DO NOTHING",
                [id, post_id, user_id],
            )?;
            if inserted == 0 {
                return Ok(LikeOutcome::AlreadyLiked);
            }
            let likes = tx.query_row(
                "UPDATE posts SET likes = likes + 1 WHERE id = ?1 RETURNING likes",
                [post_id],
                |row| row.get(0),
            )?;
            Ok(LikeOutcome::Liked { likes })
        })
    }

    pub fn unlike_post(&self, post_id: &str, user_id: &str) -> Result<UnlikeOutcome> {
        self.with_tx(|tx| {
            if !post_exists(tx, post_id)? {
                return Ok(UnlikeOutcome::PostNotFound);
            }
            let removed = tx.execute(
                "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
                [post_id, user_id],
            )?;
            if removed == 0 {
                return Ok(UnlikeOutcome::NotLiked);
            }
            let likes = tx.query_row(
                "UPDATE posts SET likes = MAX(0, likes - 1) WHERE id = ?1 RETURNING likes",
                [post_id],
                |row| row.get(0),
            )?;
            Ok(UnlikeOutcome::Unliked { likes })
        })
    }

    // -- Comments --

    /// Returns `None` if the post does not exist.
    pub fn add_comment(
        &self,
        id: &str,
        post_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Option<CommentRow>> {
        self.with_tx(|tx| {
            if !post_exists(tx, post_id)? {
                return Ok(None);
            }
            tx.execute(
                "INSERT INTO comments (id, post_id, user_id, content) VALUES (?1, ?2, ?3, ?4)",
                [id, post_id, user_id, content],
            )?;
            tx.execute(
                "UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?1",
                [post_id],
            )?;
            let mut stmt = tx.prepare(&format!("{} WHERE c.id = ?1", COMMENT_SELECT))?;
            let row = stmt.query_row([id], comment_from_row)?;
            Ok(Some(row))
        })
    }

    pub fn list_comments(
        &self,
        post_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<CommentRow>, i64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "{} WHERE c.post_id = ?1 ORDER BY c.created_at DESC, c.rowid DESC LIMIT ?2 OFFSET ?3",
                COMMENT_SELECT
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![post_id, limit, offset], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((rows, total))
        })
    }

    /// Author-only delete. False if no such comment by `user_id` on `post_id`.
    pub fn delete_comment(&self, comment_id: &str, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM comments WHERE id = ?1 AND post_id = ?2 AND user_id = ?3",
                [comment_id, post_id, user_id],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE posts SET comments_count = MAX(0, comments_count - 1) WHERE id = ?1",
                [post_id],
            )?;
            Ok(true)
        })
    }

    // -- Reconciliation --

    /// Recompute `likes` and `comments_count` from their join tables for
    /// every post whose stored counter has drifted. Returns posts repaired.
    pub fn reconcile_counters(&self) -> Result<usize> {
        self.with_tx(|tx| {
            let fixed = tx.execute(
                "UPDATE posts SET
                    likes = (SELECT COUNT(*) FROM likes l WHERE l.post_id = posts.id),
                    comments_count = (SELECT COUNT(*) FROM comments c WHERE c.post_id = posts.id)
                 WHERE likes != (SELECT COUNT(*) FROM likes l WHERE l.post_id = posts.id)
                    OR comments_count != (SELECT COUNT(*) FROM comments c WHERE c.post_id = posts.id)",
                [],
            )?;
            Ok(fixed)
        })
    }
}

fn post_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn query_post(conn: &Connection, id: &str) -> Result<Option<PostRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE p.id = ?1", POST_SELECT))?;
    stmt.query_row([id], post_from_row).optional()
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        image: row.get(3)?,
        likes: row.get(4)?,
        comments_count: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        author: UserSummaryRow::from_row_at(row, 8)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        author: UserSummaryRow::from_row_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_id, seed_user};

    fn stored_likes(db: &Database, post_id: &str) -> (i64, i64) {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT likes, (SELECT COUNT(*) FROM likes WHERE post_id = ?1) FROM posts WHERE id = ?1",
                [post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .unwrap()
    }

    fn stored_comments(db: &Database, post_id: &str) -> (i64, i64) {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT comments_count, (SELECT COUNT(*) FROM comments WHERE post_id = ?1)
                 FROM posts WHERE id = ?1",
                [post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn like_counter_tracks_like_rows_under_any_interleaving() {
        let db = Database::open_in_memory().unwrap();
        let author = seed_user(&db, "author");
        let post = new_id();
        db.create_post(&post, &author, Some("hello"), None).unwrap();

        let users: Vec<String> = (0..5).map(|i| seed_user(&db, &format!("u{}", i))).collect();

        // (user index, like?) including duplicates and unlikes of absent likes.
        let ops = [
            (0, true), (1, true), (0, true), (2, false), (1, false), (1, false),
            (3, true), (4, true), (0, false), (0, false), (2, true), (4, false),
            (3, true), (1, true), (2, false), (3, false), (1, false), (4, true),
        ];

        for (i, like) in ops {
            if like {
                db.like_post(&new_id(), &post, &users[i]).unwrap();
            } else {
                db.unlike_post(&post, &users[i]).unwrap();
            }
            let (counter, rows) = stored_likes(&db, &post);
            assert!(counter >= 0);
            assert_eq!(counter, rows);
        }

        assert_eq!(stored_likes(&db, &post), (1, 1));
    }

    #[test]
    fn like_outcomes() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let post = new_id();
        db.create_post(&post, &a, Some("x"), None).unwrap();

        assert_eq!(
            db.like_post(&new_id(), &post, &a).unwrap(),
            LikeOutcome::Liked { likes: 1 }
        );
        assert_eq!(
            db.like_post(&new_id(), &post, &a).unwrap(),
            LikeOutcome::AlreadyLiked
        );
        assert_eq!(
            db.like_post(&new_id(), "missing", &a).unwrap(),
            LikeOutcome::PostNotFound
        );
        assert_eq!(
            db.unlike_post(&post, &a).unwrap(),
            UnlikeOutcome::Unliked { likes: 0 }
        );
        assert_eq!(db.unlike_post(&post, &a).unwrap(), UnlikeOutcome::NotLiked);
        assert_eq!(
            db.unlike_post("missing", &a).unwrap(),
            UnlikeOutcome::PostNotFound
        );
    }

    #[test]
    fn unlike_floors_drifted_counter_at_zero() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let post = new_id();
        db.create_post(&post, &a, Some("x"), None).unwrap();
        db.like_post(&new_id(), &post, &a).unwrap();

        // Simulate drift from a partial failure elsewhere.
        db.with_conn_mut(|conn| {
            conn.execute("UPDATE posts SET likes = 0 WHERE id = ?1", [&post])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(
            db.unlike_post(&post, &a).unwrap(),
            UnlikeOutcome::Unliked { likes: 0 }
        );
    }

    #[test]
    fn comment_counter_tracks_comment_rows() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let post = new_id();
        db.create_post(&post, &a, Some("x"), None).unwrap();

        let c1 = new_id();
        let c2 = new_id();
        let row = db.add_comment(&c1, &post, &a, "first").unwrap().unwrap();
        assert_eq!(row.author.username, "alice");
        db.add_comment(&c2, &post, &b, "second").unwrap().unwrap();
        assert_eq!(stored_comments(&db, &post), (2, 2));

        // Only the author may delete, and only on the right post.
        assert!(!db.delete_comment(&c1, &post, &b).unwrap());
        assert!(!db.delete_comment(&c1, "other", &a).unwrap());
        assert!(db.delete_comment(&c1, &post, &a).unwrap());
        assert_eq!(stored_comments(&db, &post), (1, 1));

        let (comments, total) = db.list_comments(&post, 20, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(comments[0].content, "second");

        assert!(db.add_comment(&new_id(), "missing", &a, "x").unwrap().is_none());
    }

    #[test]
    fn delete_post_is_owner_only_and_cascades() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let post = new_id();
        db.create_post(&post, &a, Some("x"), None).unwrap();
        db.like_post(&new_id(), &post, &b).unwrap();
        db.add_comment(&new_id(), &post, &b, "hi").unwrap();

        assert!(!db.delete_post(&post, &b).unwrap());
        assert!(db.delete_post(&post, &a).unwrap());
        assert!(db.get_post(&post).unwrap().is_none());

        let orphans: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM likes) + (SELECT COUNT(*) FROM comments)",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn update_post_keeps_fields_left_empty() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let post = new_id();
        db.create_post(&post, &a, Some("old"), Some("img.png")).unwrap();

        assert!(db.update_post(&post, &b, Some("hijack"), None).unwrap().is_none());

        let updated = db.update_post(&post, &a, Some("new"), Some("")).unwrap().unwrap();
        assert_eq!(updated.content.as_deref(), Some("new"));
        assert_eq!(updated.image.as_deref(), Some("img.png"));
    }

    #[test]
    fn feed_filters() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");
        db.follow(&new_id(), &a, &b).unwrap();

        let pa = new_id();
        let pb = new_id();
        let pc = new_id();
        db.create_post(&pa, &a, Some("a"), None).unwrap();
        db.create_post(&pb, &b, Some("b"), None).unwrap();
        db.create_post(&pc, &c, Some("c"), None).unwrap();
        db.like_post(&new_id(), &pb, &a).unwrap();
        db.like_post(&new_id(), &pb, &c).unwrap();
        db.like_post(&new_id(), &pa, &b).unwrap();

        let (all, total) = db.list_posts(&FeedFilter::All, 10, 0).unwrap();
        assert_eq!(total, 3);
        assert_eq!(all[0].id, pc);

        let (following, total) = db
            .list_posts(&FeedFilter::Following { viewer_id: a.clone() }, 10, 0)
            .unwrap();
        assert_eq!(total, 2);
        let ids: Vec<&str> = following.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![pb.as_str(), pa.as_str()]);

        let (by_author, total) = db
            .list_posts(&FeedFilter::Author { user_id: c.clone() }, 10, 0)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(by_author[0].author.username, "carol");

        let (trending, _) = db
            .list_posts(&FeedFilter::Trending { since: "1970-01-01T00:00:00.000Z".into() }, 10, 0)
            .unwrap();
        let ids: Vec<&str> = trending.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![pb.as_str(), pa.as_str(), pc.as_str()]);

        let (none, total) = db
            .list_posts(&FeedFilter::Trending { since: "9999-01-01T00:00:00.000Z".into() }, 10, 0)
            .unwrap();
        assert_eq!(total, 0);
        assert!(none.is_empty());

        let liked = db.liked_post_ids(&a, &[pa.clone(), pb.clone(), pc.clone()]).unwrap();
        assert_eq!(liked.len(), 1);
        assert!(liked.contains(&pb));
    }

    #[test]
    fn reconcile_repairs_drifted_counters() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let p1 = new_id();
        let p2 = new_id();
        db.create_post(&p1, &a, Some("x"), None).unwrap();
        db.create_post(&p2, &a, Some("y"), None).unwrap();
        db.like_post(&new_id(), &p1, &a).unwrap();
        db.add_comment(&new_id(), &p2, &a, "c").unwrap();

        db.with_conn_mut(|conn| {
            conn.execute("UPDATE posts SET likes = 7 WHERE id = ?1", [&p1])?;
            conn.execute("UPDATE posts SET comments_count = 0 WHERE id = ?1", [&p2])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.reconcile_counters().unwrap(), 2);
        assert_eq!(stored_likes(&db, &p1), (1, 1));
        assert_eq!(stored_comments(&db, &p2), (1, 1));
        assert_eq!(db.reconcile_counters().unwrap(), 0);
    }
}
