pub mod follows;
pub mod messages;
pub mod objects;
pub mod posts;
pub mod sessions;
pub mod tasks;
pub mod users;

use anyhow::Result;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::Database;
    use crate::models::{ObjectRow, now_timestamp};

    /// Create a registered user and return its id.
    pub fn user(db: &Database, username: &str) -> String {
        let id = super::new_id();
        db.create_user(&id, &format!("{username}@example.com"), "hash").unwrap();
        db.update_profile(&id, username, &username.to_uppercase(), "").unwrap();
        id
    }

    /// Metadata for a proof image at `posts/{path}`.
    pub fn proof(owner: &str, path: &str) -> ObjectRow {
        ObjectRow {
            bucket: "posts".into(),
            path: path.into(),
            owner_id: owner.into(),
            content_type: "image/jpeg".into(),
            size: 3,
            sha256: "00".repeat(32),
            created_at: now_timestamp(),
        }
    }
}
