//! Follow graph.
//!
//! Each user has one `following` row holding both directions of the graph and
//! two denormalized counters. Every mutation reads and rewrites both affected
//! rows inside a single `BEGIN IMMEDIATE` transaction and recomputes the
//! counters from the list lengths, so after any committed call:
//!
//! - `follower_count == follower_accounts.len()` and
//!   `following_count == followed_accounts.len()`
//! - A is in B's `follower_accounts` iff B is in A's `followed_accounts`
//!
//! A row whose lists fail to decode is never rewritten: mutations touching it
//! fail, and reads see it as empty.

use anyhow::{Context, Result};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, warn};

use super::OptionalExt;
use super::users::query_authors;
use crate::Database;
use crate::models::{AuthorRow, FollowRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    Unfollowed,
    AlreadyFollowing,
    NotFollowing,
    SelfFollow,
    UnknownUser,
}

impl FollowOutcome {
    /// Whether the actor follows the target after the call.
    pub fn is_following(self) -> bool {
        matches!(self, Self::Followed | Self::AlreadyFollowing)
    }
}

impl Database {
    pub fn follow(&self, actor_id: &str, target_id: &str) -> Result<FollowOutcome> {
        self.mutate_follow(actor_id, target_id, true)
    }

    pub fn unfollow(&self, actor_id: &str, target_id: &str) -> Result<FollowOutcome> {
        self.mutate_follow(actor_id, target_id, false)
    }

    fn mutate_follow(&self, actor_id: &str, target_id: &str, follow: bool) -> Result<FollowOutcome> {
        if actor_id == target_id {
            return Ok(FollowOutcome::SelfFollow);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !user_exists(&tx, actor_id)? || !user_exists(&tx, target_id)? {
                return Ok(FollowOutcome::UnknownUser);
            }

            let mut actor = load_follow_row(&tx, actor_id)?;
            let mut target = load_follow_row(&tx, target_id)?;
            let currently = actor.followed_accounts.iter().any(|id| id == target_id);

            let outcome = match (follow, currently) {
                (true, true) => FollowOutcome::AlreadyFollowing,
                (false, false) => FollowOutcome::NotFollowing,
                (true, false) => {
                    actor.followed_accounts.push(target_id.to_string());
                    if !target.follower_accounts.iter().any(|id| id == actor_id) {
                        target.follower_accounts.push(actor_id.to_string());
                    }
                    FollowOutcome::Followed
                }
                (false, true) => {
                    actor.followed_accounts.retain(|id| id != target_id);
                    target.follower_accounts.retain(|id| id != actor_id);
                    FollowOutcome::Unfollowed
                }
            };

            if matches!(outcome, FollowOutcome::Followed | FollowOutcome::Unfollowed) {
                store_follow_row(&tx, &mut actor)?;
                store_follow_row(&tx, &mut target)?;
                tx.commit()?;
                debug!("{} -> {}: {:?}", actor_id, target_id, outcome);
            }

            Ok(outcome)
        })
    }

    pub fn is_following(&self, actor_id: &str, target_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let row = read_follow_row(conn, actor_id)?;
            Ok(row.followed_accounts.iter().any(|id| id == target_id))
        })
    }

    /// The user's follow row; an all-empty row if the user never followed or
    /// was followed by anyone.
    pub fn follow_row(&self, user_id: &str) -> Result<FollowRow> {
        self.with_conn(|conn| read_follow_row(conn, user_id))
    }

    /// `(follower_count, following_count)`, zero for users without a row.
    pub fn follow_stats(&self, user_id: &str) -> Result<(i64, i64)> {
        let row = self.follow_row(user_id)?;
        Ok((row.follower_count, row.following_count))
    }

    pub fn followers(&self, user_id: &str) -> Result<Vec<AuthorRow>> {
        self.with_conn(|conn| {
            let row = read_follow_row(conn, user_id)?;
            authors_in_order(conn, &row.follower_accounts)
        })
    }

    pub fn following(&self, user_id: &str) -> Result<Vec<AuthorRow>> {
        self.with_conn(|conn| {
            let row = read_follow_row(conn, user_id)?;
            authors_in_order(conn, &row.followed_accounts)
        })
    }

    /// Rewrite counters that disagree with their list lengths.
    /// Returns the number of rows corrected. Undecodable rows are skipped.
    pub fn reconcile_follow_counts(&self) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let rows: Vec<FollowRow> = {
                let mut stmt = tx.prepare(
                    "SELECT user_id, followed_accounts, follower_accounts, follower_count, following_count
                     FROM following",
                )?;
                let raw = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                raw.into_iter()
                    .filter_map(|(user_id, followed, followers, follower_count, following_count)| {
                        match decode_row(&user_id, &followed, &followers, follower_count, following_count) {
                            Ok(row) => Some(row),
                            Err(e) => {
                                warn!("Skipping follow row: {:#}", e);
                                None
                            }
                        }
                    })
                    .collect()
            };

            let mut corrected = 0;
            for mut row in rows {
                let follower_count = row.follower_accounts.len() as i64;
                let following_count = row.followed_accounts.len() as i64;
                if row.follower_count != follower_count || row.following_count != following_count {
                    warn!(
                        "Follow counters for {} drifted ({}/{} vs {}/{})",
                        row.user_id, row.follower_count, row.following_count, follower_count, following_count
                    );
                    store_follow_row(&tx, &mut row)?;
                    corrected += 1;
                }
            }

            tx.commit()?;
            Ok(corrected)
        })
    }
}

fn user_exists(conn: &Connection, user_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// The user's row for a mutation. A list that fails to decode is an error,
/// so the caller never writes back a truncated graph.
fn load_follow_row(conn: &Connection, user_id: &str) -> Result<FollowRow> {
    match fetch_follow_row(conn, user_id)? {
        Some((followed, followers, follower_count, following_count)) => {
            decode_row(user_id, &followed, &followers, follower_count, following_count)
        }
        None => Ok(FollowRow {
            user_id: user_id.to_string(),
            ..FollowRow::default()
        }),
    }
}

/// Like [`load_follow_row`], but a corrupt row reads as empty.
fn read_follow_row(conn: &Connection, user_id: &str) -> Result<FollowRow> {
    let Some((followed, followers, follower_count, following_count)) = fetch_follow_row(conn, user_id)? else {
        return Ok(FollowRow {
            user_id: user_id.to_string(),
            ..FollowRow::default()
        });
    };
    Ok(decode_row(user_id, &followed, &followers, follower_count, following_count).unwrap_or_else(|e| {
        warn!("{:#}", e);
        FollowRow {
            user_id: user_id.to_string(),
            ..FollowRow::default()
        }
    }))
}

fn fetch_follow_row(conn: &Connection, user_id: &str) -> Result<Option<(String, String, i64, i64)>> {
    conn.query_row(
        "SELECT followed_accounts, follower_accounts, follower_count, following_count
         FROM following WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .optional()
}

fn decode_row(
    user_id: &str,
    followed: &str,
    followers: &str,
    follower_count: i64,
    following_count: i64,
) -> Result<FollowRow> {
    Ok(FollowRow {
        user_id: user_id.to_string(),
        followed_accounts: serde_json::from_str(followed)
            .with_context(|| format!("Corrupt followed_accounts on {}", user_id))?,
        follower_accounts: serde_json::from_str(followers)
            .with_context(|| format!("Corrupt follower_accounts on {}", user_id))?,
        follower_count,
        following_count,
    })
}

/// Upsert the row with counters derived from the lists.
fn store_follow_row(conn: &Connection, row: &mut FollowRow) -> Result<()> {
    row.follower_count = row.follower_accounts.len() as i64;
    row.following_count = row.followed_accounts.len() as i64;

    conn.execute(
        "INSERT INTO following (user_id, followed_accounts, follower_accounts, follower_count, following_count)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            followed_accounts = excluded.followed_accounts,
            follower_accounts = excluded.follower_accounts,
            follower_count = excluded.follower_count,
            following_count = excluded.following_count",
        params![
            row.user_id,
            serde_json::to_string(&row.followed_accounts)?,
            serde_json::to_string(&row.follower_accounts)?,
            row.follower_count,
            row.following_count,
        ],
    )?;
    Ok(())
}

/// Author rows in the order of `ids`, skipping users that no longer exist.
fn authors_in_order(conn: &Connection, ids: &[String]) -> Result<Vec<AuthorRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let mut found = query_authors(conn, ids)?;
    let mut ordered = Vec::with_capacity(found.len());
    for id in ids {
        if let Some(pos) = found.iter().position(|a| &a.id == id) {
            ordered.push(found.swap_remove(pos));
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testutil::user;

    fn assert_consistent(db: &Database, ids: &[&str]) {
        for id in ids {
            let row = db.follow_row(id).unwrap();
            assert_eq!(row.follower_count, row.follower_accounts.len() as i64);
            assert_eq!(row.following_count, row.followed_accounts.len() as i64);
            for followed in &row.followed_accounts {
                assert!(db.follow_row(followed).unwrap().follower_accounts.contains(&id.to_string()));
            }
            for follower in &row.follower_accounts {
                assert!(db.follow_row(follower).unwrap().followed_accounts.contains(&id.to_string()));
            }
        }
    }

    #[test]
    fn follow_updates_both_sides() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        assert_eq!(db.follow(&a, &b).unwrap(), FollowOutcome::Followed);
        assert!(db.is_following(&a, &b).unwrap());
        assert!(!db.is_following(&b, &a).unwrap());

        let target = db.follow_row(&b).unwrap();
        assert_eq!(target.follower_accounts, vec![a.clone()]);
        assert_eq!(target.follower_count, 1);
        assert_eq!(db.follow_row(&a).unwrap().following_count, 1);
        assert_consistent(&db, &[&a, &b]);
    }

    #[test]
    fn follow_then_unfollow_restores_lists() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        db.follow(&c, &b).unwrap();
        db.follow(&a, &c).unwrap();

        let before_a = db.follow_row(&a).unwrap();
        let before_b = db.follow_row(&b).unwrap();

        db.follow(&a, &b).unwrap();
        assert_eq!(db.unfollow(&a, &b).unwrap(), FollowOutcome::Unfollowed);

        assert_eq!(db.follow_row(&a).unwrap(), before_a);
        assert_eq!(db.follow_row(&b).unwrap(), before_b);
        assert_consistent(&db, &[&a, &b, &c]);
    }

    #[test]
    fn repeated_calls_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        db.follow(&a, &b).unwrap();
        assert_eq!(db.follow(&a, &b).unwrap(), FollowOutcome::AlreadyFollowing);
        assert_eq!(db.follow_row(&b).unwrap().follower_count, 1);

        db.unfollow(&a, &b).unwrap();
        assert_eq!(db.unfollow(&a, &b).unwrap(), FollowOutcome::NotFollowing);
        assert_eq!(db.follow_row(&b).unwrap().follower_count, 0);
    }

    #[test]
    fn rejects_self_and_unknown_users() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        assert_eq!(db.follow(&a, &a).unwrap(), FollowOutcome::SelfFollow);
        assert_eq!(db.follow(&a, "nobody").unwrap(), FollowOutcome::UnknownUser);
        assert_eq!(db.follow_row(&a).unwrap().following_count, 0);
    }

    #[test]
    fn mutual_follows_stay_consistent() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");

        for (x, y) in [(&a, &b), (&b, &a), (&c, &a), (&a, &c), (&b, &c)] {
            db.follow(x, y).unwrap();
        }
        db.unfollow(&a, &b).unwrap();
        db.unfollow(&c, &a).unwrap();

        assert_consistent(&db, &[&a, &b, &c]);
        assert_eq!(db.follow_row(&a).unwrap().follower_count, 1);
        assert_eq!(db.follow_row(&a).unwrap().following_count, 1);
    }

    #[test]
    fn concurrent_follows_keep_counts_exact() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let target = user(&db, "target");
        let fans: Vec<String> = (0..8).map(|i| user(&db, &format!("fan{i}"))).collect();

        let handles: Vec<_> = fans
            .iter()
            .cloned()
            .map(|fan| {
                let db = db.clone();
                let target = target.clone();
                std::thread::spawn(move || db.follow(&fan, &target).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), FollowOutcome::Followed);
        }

        let row = db.follow_row(&target).unwrap();
        assert_eq!(row.follower_count, 8);
        assert_eq!(row.follower_accounts.len(), 8);
    }

    #[test]
    fn follower_lists_resolve_to_authors() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        db.follow(&b, &a).unwrap();
        db.follow(&c, &a).unwrap();

        let followers: Vec<String> = db.followers(&a).unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(followers, vec![b.clone(), c.clone()]);
        let following: Vec<String> = db.following(&b).unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(following, vec![a]);
    }

    #[test]
    fn reconcile_repairs_drifted_counters() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        db.follow(&a, &b).unwrap();

        db.with_conn(|conn| {
            conn.execute("UPDATE following SET follower_count = 5 WHERE user_id = ?1", [&b])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.reconcile_follow_counts().unwrap(), 1);
        assert_eq!(db.follow_row(&b).unwrap().follower_count, 1);
        assert_eq!(db.reconcile_follow_counts().unwrap(), 0);
    }

    #[test]
    fn corrupt_follow_list_is_never_overwritten() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        db.follow(&a, &b).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE following SET followed_accounts = '[not json', following_count = 7 WHERE user_id = ?1",
                [&a],
            )?;
            Ok(())
        })
        .unwrap();
        let raw = |db: &Database| -> String {
            db.with_conn(|conn| {
                Ok(conn.query_row("SELECT followed_accounts FROM following WHERE user_id = ?1", [&a], |row| {
                    row.get(0)
                })?)
            })
            .unwrap()
        };

        assert!(db.follow(&a, &c).is_err());
        assert!(db.unfollow(&a, &b).is_err());
        assert_eq!(db.reconcile_follow_counts().unwrap(), 0);
        assert_eq!(raw(&db), "[not json");
        assert!(db.follow_row(&c).unwrap().follower_accounts.is_empty());

        // Reads degrade to an empty list
        assert!(db.following(&a).unwrap().is_empty());
        assert!(!db.is_following(&a, &b).unwrap());
    }
}
