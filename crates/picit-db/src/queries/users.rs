use anyhow::Result;
use rusqlite::{Connection, Row, params};

use super::OptionalExt;
use crate::Database;
use crate::models::{AuthorRow, UserRow, now_timestamp};

const USER_COLUMNS: &str =
    "id, email, password, username, name, website, avatar_url, reg_complete, created_at, updated_at";

/// Result of a profile upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate {
    Updated(UserRow),
    UsernameTaken,
    NotFound,
}

impl Database {
    /// Returns false, inserting nothing, when `email` is already registered.
    pub fn create_user(&self, id: &str, email: &str, password_hash: &str) -> Result<bool> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, password, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(email) DO NOTHING",
                params![id, email, password_hash, now],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Set username, name and website and mark registration complete.
    /// `username` is expected to be normalized already.
    pub fn update_profile(
        &self,
        id: &str,
        username: &str,
        name: &str,
        website: &str,
    ) -> Result<ProfileUpdate> {
        self.with_conn(|conn| {
            let taken: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1 AND id != ?2",
                    params![username, id],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Ok(ProfileUpdate::UsernameTaken);
            }

            let changed = conn.execute(
                "UPDATE users
                 SET username = ?2, name = ?3, website = ?4, reg_complete = 1, updated_at = ?5
                 WHERE id = ?1",
                params![id, username, name, website, now_timestamp()],
            )?;
            if changed == 0 {
                return Ok(ProfileUpdate::NotFound);
            }

            Ok(query_user(conn, "id", id)?.map_or(ProfileUpdate::NotFound, ProfileUpdate::Updated))
        })
    }

    pub fn set_avatar_url(&self, id: &str, avatar_url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar_url = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, avatar_url, now_timestamp()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Users whose name or username contains `term`, ignoring case in any
    /// script. A blank term matches nobody.
    pub fn search_users(&self, term: &str, limit: u32) -> Result<Vec<UserRow>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(vec![]);
        }
        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE fold_case(name) LIKE ?1 ESCAPE '\\' OR fold_case(username) LIKE ?1 ESCAPE '\\'
                 ORDER BY username
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![pattern, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch author summaries for a set of user IDs.
    pub fn get_authors(&self, user_ids: &[String]) -> Result<Vec<AuthorRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| query_authors(conn, user_ids))
    }

    /// Completed tasks are exactly the user's posts.
    pub fn completed_task_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

pub(crate) fn query_authors(conn: &Connection, user_ids: &[String]) -> Result<Vec<AuthorRow>> {
    let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, username, name, avatar_url FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = user_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(AuthorRow {
                id: row.get(0)?,
                username: row.get(1)?,
                name: row.get(2)?,
                avatar_url: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let row = conn.query_row(&sql, [value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        username: row.get(3)?,
        name: row.get(4)?,
        website: row.get(5)?,
        avatar_url: row.get(6)?,
        reg_complete: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
