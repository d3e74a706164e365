use anyhow::Result;
use rusqlite::{Connection, Row, TransactionBehavior, params};
use tracing::info;

use super::OptionalExt;
use super::objects::write_object;
use super::posts::query_post;
use crate::Database;
use crate::models::{ObjectRow, PostRow, TaskRow, now_timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum CompleteOutcome {
    Completed(PostRow),
    NotFound,
    Forbidden,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTaskOutcome {
    Deleted,
    NotFound,
    Forbidden,
    AlreadyCompleted,
}

impl Database {
    pub fn create_task(
        &self,
        id: &str,
        user_id: &str,
        name: &str,
        description: &str,
        deadline: Option<&str>,
    ) -> Result<TaskRow> {
        let created_at = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, user_id, name, description, deadline, is_completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![id, user_id, name, description, deadline, created_at],
            )?;
            Ok(TaskRow {
                id: id.to_string(),
                user_id: user_id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                deadline: deadline.map(str::to_string),
                is_completed: false,
                created_at,
            })
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        self.with_conn(|conn| query_task(conn, id))
    }

    /// Incomplete tasks of a user, oldest first.
    pub fn open_tasks(&self, user_id: &str) -> Result<Vec<TaskRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, description, deadline, is_completed, created_at
                 FROM tasks
                 WHERE user_id = ?1 AND is_completed = 0
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id], map_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Only open tasks can be deleted; completed ones are referenced by a post.
    pub fn delete_task(&self, id: &str, user_id: &str) -> Result<DeleteTaskOutcome> {
        self.with_conn(|conn| {
            let Some(task) = query_task(conn, id)? else {
                return Ok(DeleteTaskOutcome::NotFound);
            };
            if task.user_id != user_id {
                return Ok(DeleteTaskOutcome::Forbidden);
            }
            if task.is_completed {
                return Ok(DeleteTaskOutcome::AlreadyCompleted);
            }
            conn.execute("DELETE FROM tasks WHERE id = ?1 AND is_completed = 0", [id])?;
            Ok(DeleteTaskOutcome::Deleted)
        })
    }

    /// Flip the task to completed and create its post, atomically.
    ///
    /// The image must already be uploaded; `proof` is its metadata row and
    /// `image_url` its public URL. The metadata is written in the same
    /// transaction, so either all three rows commit or none do.
    /// A task transitions at most once, so a second call reports
    /// `AlreadyCompleted` and creates nothing.
    pub fn complete_task(
        &self,
        task_id: &str,
        user_id: &str,
        post_id: &str,
        proof: &ObjectRow,
        image_url: &str,
    ) -> Result<CompleteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(task) = query_task(&tx, task_id)? else {
                return Ok(CompleteOutcome::NotFound);
            };
            if task.user_id != user_id {
                return Ok(CompleteOutcome::Forbidden);
            }

            let flipped = tx.execute(
                "UPDATE tasks SET is_completed = 1 WHERE id = ?1 AND is_completed = 0",
                [task_id],
            )?;
            if flipped == 0 {
                return Ok(CompleteOutcome::AlreadyCompleted);
            }

            tx.execute(
                "INSERT INTO posts (id, user_id, task_id, task_name, task_description, task_image,
                                    likes_count, comment_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)",
                params![post_id, user_id, task_id, task.name, task.description, image_url, now_timestamp()],
            )?;
            write_object(&tx, proof)?;

            let post = query_post(&tx, post_id)?
                .ok_or_else(|| anyhow::anyhow!("Post {} vanished inside its transaction", post_id))?;
            tx.commit()?;

            info!("Task {} completed, post {} created", task_id, post_id);
            Ok(CompleteOutcome::Completed(post))
        })
    }
}

fn query_task(conn: &Connection, id: &str) -> Result<Option<TaskRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, description, deadline, is_completed, created_at
             FROM tasks WHERE id = ?1",
            [id],
            map_task,
        )
        .optional()?;
    Ok(row)
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        deadline: row.get(4)?,
        is_completed: row.get(5)?,
        created_at: row.get(6)?,
    })
}
