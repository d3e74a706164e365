use anyhow::Result;
use rusqlite::{Connection, Row, params};

use super::OptionalExt;
use crate::Database;
use crate::models::ObjectRow;

impl Database {
    /// Record an uploaded object, replacing the metadata of an earlier upload
    /// at the same path.
    pub fn upsert_object(&self, object: &ObjectRow) -> Result<()> {
        self.with_conn(|conn| write_object(conn, object))
    }

    pub fn get_object(&self, bucket: &str, path: &str) -> Result<Option<ObjectRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT bucket, path, owner_id, content_type, size, sha256, created_at
                     FROM storage_objects WHERE bucket = ?1 AND path = ?2",
                    params![bucket, path],
                    map_object,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Objects in a bucket whose path starts with `prefix`, by path.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bucket, path, owner_id, content_type, size, sha256, created_at
                 FROM storage_objects
                 WHERE bucket = ?1 AND substr(path, 1, length(?2)) = ?2
                 ORDER BY path",
            )?;
            let rows = stmt
                .query_map(params![bucket, prefix], map_object)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_object(&self, bucket: &str, path: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM storage_objects WHERE bucket = ?1 AND path = ?2",
                params![bucket, path],
            )?;
            Ok(removed == 1)
        })
    }
}

fn map_object(row: &Row<'_>) -> rusqlite::Result<ObjectRow> {
    Ok(ObjectRow {
        bucket: row.get(0)?,
        path: row.get(1)?,
        owner_id: row.get(2)?,
        content_type: row.get(3)?,
        size: row.get(4)?,
        sha256: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Shared by `upsert_object` and the task completion transaction.
pub(crate) fn write_object(conn: &Connection, object: &ObjectRow) -> Result<()> {
    conn.execute(
        "INSERT INTO storage_objects (bucket, path, owner_id, content_type, size, sha256, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(bucket, path) DO UPDATE SET
            owner_id = excluded.owner_id,
            content_type = excluded.content_type,
            size = excluded.size,
            sha256 = excluded.sha256,
            created_at = excluded.created_at",
        params![
            object.bucket,
            object.path,
            object.owner_id,
            object.content_type,
            object.size,
            object.sha256,
            object.created_at,
        ],
    )?;
    Ok(())
}
