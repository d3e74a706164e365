use anyhow::Result;
use rusqlite::params;

use super::OptionalExt;
use crate::Database;
use crate::models::{SessionRow, now_timestamp};

impl Database {
    pub fn create_session(&self, id: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, user_id, now_timestamp(), expires_at],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, created_at, expires_at, revoked FROM sessions WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(SessionRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            created_at: row.get(2)?,
                            expires_at: row.get(3)?,
                            revoked: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// True when the session exists, belongs to `user_id`, is not revoked and
    /// has not expired.
    pub fn is_session_active(&self, id: &str, user_id: &str) -> Result<bool> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let active: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM sessions
                     WHERE id = ?1 AND user_id = ?2 AND revoked = 0 AND expires_at > ?3",
                    params![id, user_id, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(active.is_some())
        })
    }

    /// Returns false when the session was unknown or already revoked.
    pub fn revoke_session(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE sessions SET revoked = 1 WHERE id = ?1 AND revoked = 0", [id])?;
            Ok(changed == 1)
        })
    }

    /// Delete expired and revoked sessions. Returns how many were removed.
    pub fn prune_sessions(&self) -> Result<usize> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM sessions WHERE revoked = 1 OR expires_at <= ?1", [now])?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testutil::user;

    fn in_days(days: i64) -> String {
        (chrono::Utc::now() + chrono::Duration::days(days))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }

    #[test]
    fn revoked_session_is_inactive() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        db.create_session("s1", &alice, &in_days(30)).unwrap();
        assert!(db.is_session_active("s1", &alice).unwrap());

        assert!(db.revoke_session("s1").unwrap());
        assert!(!db.revoke_session("s1").unwrap());
        assert!(!db.is_session_active("s1", &alice).unwrap());
    }

    #[test]
    fn session_is_bound_to_its_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        db.create_session("s1", &alice, &in_days(30)).unwrap();
        assert!(!db.is_session_active("s1", &bob).unwrap());
    }

    #[test]
    fn prune_removes_expired_and_revoked() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        db.create_session("live", &alice, &in_days(30)).unwrap();
        db.create_session("old", &alice, &in_days(-1)).unwrap();
        db.create_session("gone", &alice, &in_days(30)).unwrap();
        db.revoke_session("gone").unwrap();

        assert_eq!(db.prune_sessions().unwrap(), 2);
        assert!(db.get_session("live").unwrap().is_some());
        assert!(db.get_session("old").unwrap().is_none());
    }
}
