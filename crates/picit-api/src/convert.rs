//! Row to wire-model conversions.
//!
//! Stored ids and timestamps are strings; a corrupt value is logged and
//! replaced by a default instead of failing the whole response.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use picit_crypto::MessageCipher;
use picit_db::models::{
    AuthorRow, CommentRow, ConversationRow, FeedRow, MessageRow, ObjectRow, PostRow, TaskRow, UserRow,
};
use picit_types::models::{
    Comment, Conversation, FeedPost, Message, Post, StorageObject, Task, User, UserSummary,
};

pub fn parse_id(field: &str, owner: &str, raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", field, raw, owner, e);
        Uuid::default()
    })
}

pub fn parse_time(field: &str, owner: &str, raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}' on '{}': {}", field, raw, owner, e);
            DateTime::default()
        })
}

pub fn user(row: UserRow) -> User {
    User {
        id: parse_id("id", &row.id, &row.id),
        created_at: parse_time("created_at", &row.id, &row.created_at),
        username: row.username,
        name: row.name,
        website: row.website,
        avatar_url: row.avatar_url,
        reg_complete: row.reg_complete,
    }
}

pub fn summary(row: AuthorRow) -> UserSummary {
    UserSummary {
        id: parse_id("id", &row.id, &row.id),
        username: row.username,
        name: row.name,
        avatar_url: row.avatar_url,
    }
}

pub fn user_summary(row: UserRow) -> UserSummary {
    UserSummary {
        id: parse_id("id", &row.id, &row.id),
        username: row.username,
        name: row.name,
        avatar_url: row.avatar_url,
    }
}

/// `today` decides the overdue flag: an open task is overdue once its
/// deadline is in the past.
pub fn task(row: TaskRow, today: NaiveDate) -> Task {
    let deadline = row.deadline.as_deref().and_then(|raw| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| warn!("Corrupt deadline '{}' on task '{}': {}", raw, row.id, e))
            .ok()
    });
    Task {
        id: parse_id("id", &row.id, &row.id),
        user_id: parse_id("user_id", &row.id, &row.user_id),
        created_at: parse_time("created_at", &row.id, &row.created_at),
        overdue: !row.is_completed && deadline.is_some_and(|d| d < today),
        deadline,
        is_completed: row.is_completed,
        name: row.name,
        description: row.description,
    }
}

pub fn post(row: PostRow) -> Post {
    Post {
        id: parse_id("id", &row.id, &row.id),
        user_id: parse_id("user_id", &row.id, &row.user_id),
        task_id: parse_id("task_id", &row.id, &row.task_id),
        created_at: parse_time("created_at", &row.id, &row.created_at),
        task_name: row.task_name,
        task_description: row.task_description,
        task_image: row.task_image,
        likes_count: row.likes_count,
        comment_count: row.comment_count,
    }
}

pub fn feed_post(row: FeedRow) -> FeedPost {
    FeedPost {
        post: post(row.post),
        user: summary(row.author),
    }
}

pub fn comment(row: CommentRow) -> Comment {
    Comment {
        id: parse_id("id", &row.id, &row.id),
        post_id: parse_id("post_id", &row.id, &row.post_id),
        user_id: parse_id("user_id", &row.id, &row.user_id),
        created_at: parse_time("created_at", &row.id, &row.created_at),
        username: row.username,
        text: row.text,
    }
}

/// Decrypts the stored content.
pub fn message(row: MessageRow, cipher: &MessageCipher) -> Message {
    Message {
        id: parse_id("id", &row.id, &row.id),
        conversation_id: parse_id("conversation_id", &row.id, &row.conversation_id),
        sender_id: parse_id("sender_id", &row.id, &row.sender_id),
        recipient_id: parse_id("recipient_id", &row.id, &row.recipient_id),
        timestamp: parse_time("timestamp", &row.id, &row.timestamp),
        content: cipher.decrypt_lossy(&row.content),
    }
}

/// `other_user` is the participant that is not the viewer, if still present.
pub fn conversation(row: ConversationRow, other_user: Option<UserSummary>, cipher: &MessageCipher) -> Conversation {
    Conversation {
        id: parse_id("id", &row.id, &row.id),
        user1_id: parse_id("user1_id", &row.id, &row.user1_id),
        user2_id: parse_id("user2_id", &row.id, &row.user2_id),
        other_user,
        last_message_content: row.last_message_content.as_deref().map(|c| cipher.decrypt_lossy(c)),
        last_message_timestamp: row
            .last_message_timestamp
            .as_deref()
            .map(|t| parse_time("last_message_timestamp", &row.id, t)),
    }
}

pub fn object(row: ObjectRow, public_url: String) -> StorageObject {
    StorageObject {
        created_at: parse_time("created_at", &row.path, &row.created_at),
        bucket: row.bucket,
        path: row.path,
        content_type: row.content_type,
        size: row.size,
        public_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_row(deadline: Option<&str>, is_completed: bool) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            name: "Run".into(),
            description: "5k".into(),
            deadline: deadline.map(str::to_string),
            is_completed,
            created_at: "2024-05-01T10:00:00.000000Z".into(),
        }
    }

    #[test]
    fn overdue_only_for_open_tasks_past_deadline() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(task(task_row(Some("2024-05-31"), false), today).overdue);
        assert!(!task(task_row(Some("2024-06-01"), false), today).overdue);
        assert!(!task(task_row(Some("2024-05-31"), true), today).overdue);
        assert!(!task(task_row(None, false), today).overdue);
    }

    #[test]
    fn corrupt_values_fall_back_to_defaults() {
        let mut row = task_row(Some("someday"), false);
        row.user_id = "not-a-uuid".into();
        row.created_at = "yesterday".into();
        let task = task(row, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(task.user_id, Uuid::default());
        assert_eq!(task.created_at, DateTime::<Utc>::default());
        assert_eq!(task.deadline, None);
    }
}
