use anyhow::Result;
use rusqlite::{Connection, Row, TransactionBehavior, params};

use super::OptionalExt;
use crate::Database;
use crate::models::{AuthorRow, CommentRow, FeedRow, PostRow, now_timestamp};

const POST_COLUMNS: &str = "p.id, p.user_id, p.task_id, p.task_name, p.task_description, p.task_image,
                            p.likes_count, p.comment_count, p.created_at";

impl Database {
    /// All posts, newest first, with their authors. One JOIN instead of a
    /// lookup per post; posts whose author is gone are left out.
    pub fn feed(&self, limit: u32) -> Result<Vec<FeedRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS}, u.username, u.name, u.avatar_url
                 FROM posts p
                 JOIN users u ON u.id = p.user_id
                 ORDER BY p.created_at DESC
                 LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], |row| {
                    let post = map_post(row)?;
                    Ok(FeedRow {
                        author: AuthorRow {
                            id: post.user_id.clone(),
                            username: row.get(9)?,
                            name: row.get(10)?,
                            avatar_url: row.get(11)?,
                        },
                        post,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// A user's finished posts, newest first.
    pub fn posts_by_user(&self, user_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts p WHERE p.user_id = ?1 ORDER BY p.created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    // -- Likes --

    /// Toggle a like: removes if exists, inserts if not, then stores the
    /// recounted total on the post. Returns `(liked, likes_count)`, or `None`
    /// if the post does not exist.
    pub fn toggle_like(&self, like_id: &str, post_id: &str, user_id: &str) -> Result<Option<(bool, i64)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if query_post(&tx, post_id)?.is_none() {
                return Ok(None);
            }

            let removed = tx.execute(
                "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, user_id],
            )?;
            let liked = if removed == 0 {
                tx.execute(
                    "INSERT INTO likes (id, post_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![like_id, post_id, user_id, now_timestamp()],
                )?;
                true
            } else {
                false
            };

            let count: i64 =
                tx.query_row("SELECT COUNT(*) FROM likes WHERE post_id = ?1", [post_id], |row| row.get(0))?;
            tx.execute("UPDATE posts SET likes_count = ?2 WHERE id = ?1", params![post_id, count])?;
            tx.commit()?;

            Ok(Some((liked, count)))
        })
    }

    /// `(liked_by_user, likes_count)`, or `None` if the post does not exist.
    pub fn like_status(&self, post_id: &str, user_id: &str) -> Result<Option<(bool, i64)>> {
        self.with_conn(|conn| {
            let Some(post) = query_post(conn, post_id)? else {
                return Ok(None);
            };
            let liked: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM likes WHERE post_id = ?1 AND user_id = ?2",
                    params![post_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(Some((liked.is_some(), post.likes_count)))
        })
    }

    // -- Comments --

    /// Insert a comment and bump the post's comment counter in one
    /// transaction. `None` if the post does not exist.
    pub fn add_comment(&self, id: &str, post_id: &str, user_id: &str, text: &str) -> Result<Option<CommentRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if query_post(&tx, post_id)?.is_none() {
                return Ok(None);
            }

            let created_at = now_timestamp();
            tx.execute(
                "INSERT INTO comments (id, post_id, user_id, text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, post_id, user_id, text, created_at],
            )?;
            tx.execute(
                "UPDATE posts SET comment_count = comment_count + 1 WHERE id = ?1",
                [post_id],
            )?;
            let username: Option<String> =
                tx.query_row("SELECT username FROM users WHERE id = ?1", [user_id], |row| row.get(0))?;
            tx.commit()?;

            Ok(Some(CommentRow {
                id: id.to_string(),
                post_id: post_id.to_string(),
                user_id: user_id.to_string(),
                username,
                text: text.to_string(),
                created_at,
            }))
        })
    }

    /// Comments of a post, oldest first, with the commenter's username.
    pub fn comments(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, c.user_id, u.username, c.text, c.created_at
                 FROM comments c
                 LEFT JOIN users u ON u.id = c.user_id
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt
                .query_map([post_id], |row| {
                    Ok(CommentRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        user_id: row.get(2)?,
                        username: row.get(3)?,
                        text: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_post(conn: &Connection, id: &str) -> Result<Option<PostRow>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?1");
    let row = conn.query_row(&sql, [id], map_post).optional()?;
    Ok(row)
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        task_name: row.get(3)?,
        task_description: row.get(4)?,
        task_image: row.get(5)?,
        likes_count: row.get(6)?,
        comment_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testutil::{proof, user};

    fn post(db: &Database, owner: &str, task: &str) -> String {
        db.create_task(task, owner, task, "desc", None).unwrap();
        let post_id = format!("post-{task}");
        let object = proof(owner, &format!("{owner}/{task}"));
        db.complete_task(task, owner, &post_id, &object, "http://img").unwrap();
        post_id
    }

    #[test]
    fn toggling_like_twice_restores_state() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let p = post(&db, &alice, "t1");
        db.toggle_like("l0", &p, &alice).unwrap();

        let before = db.like_status(&p, &bob).unwrap().unwrap();
        assert_eq!(before, (false, 1));

        assert_eq!(db.toggle_like("l1", &p, &bob).unwrap(), Some((true, 2)));
        assert_eq!(db.like_status(&p, &bob).unwrap(), Some((true, 2)));
        assert_eq!(db.toggle_like("l2", &p, &bob).unwrap(), Some((false, 1)));
        assert_eq!(db.like_status(&p, &bob).unwrap(), Some(before));
        assert_eq!(db.get_post(&p).unwrap().unwrap().likes_count, 1);
    }

    #[test]
    fn like_on_missing_post_is_none() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        assert_eq!(db.toggle_like("l1", "nope", &alice).unwrap(), None);
        assert_eq!(db.like_status("nope", &alice).unwrap(), None);
    }

    #[test]
    fn comments_bump_counter_and_keep_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let p = post(&db, &alice, "t1");

        let first = db.add_comment("c1", &p, &bob, "nice").unwrap().unwrap();
        assert_eq!(first.username.as_deref(), Some("bob"));
        db.add_comment("c2", &p, &alice, "thanks").unwrap().unwrap();

        let texts: Vec<String> = db.comments(&p).unwrap().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["nice", "thanks"]);
        assert_eq!(db.get_post(&p).unwrap().unwrap().comment_count, 2);
        assert!(db.add_comment("c3", "nope", &bob, "x").unwrap().is_none());
    }

    #[test]
    fn feed_is_newest_first_with_authors() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let older = post(&db, &alice, "t1");
        let newer = post(&db, &bob, "t2");

        let feed = db.feed(50).unwrap();
        let ids: Vec<&str> = feed.iter().map(|f| f.post.id.as_str()).collect();
        assert_eq!(ids, vec![newer.as_str(), older.as_str()]);
        assert_eq!(feed[0].author.username.as_deref(), Some("bob"));
        assert_eq!(feed[1].author.id, alice);
    }
}
