/// Database row types: these map directly to SQLite rows.
/// Distinct from picit-types API models to keep the DB layer independent.
/// Ids are UUID strings, timestamps RFC 3339 UTC strings.

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub name: String,
    pub website: String,
    pub avatar_url: Option<String>,
    pub reg_complete: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowRow {
    pub user_id: String,
    /// Users this user follows.
    pub followed_accounts: Vec<String>,
    /// Users following this user.
    pub follower_accounts: Vec<String>,
    pub follower_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    /// `YYYY-MM-DD`
    pub deadline: Option<String>,
    pub is_completed: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_description: String,
    pub task_image: String,
    pub likes_count: i64,
    pub comment_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorRow {
    pub id: String,
    pub username: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub post: PostRow,
    pub author: AuthorRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    /// Ciphertext of the last message.
    pub last_message_content: Option<String>,
    pub last_message_timestamp: Option<String>,
    pub created_at: String,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.user1_id == user_id { &self.user2_id } else { &self.user1_id }
    }
}

/// Message as stored: `content` is ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRow {
    pub bucket: String,
    pub path: String,
    pub owner_id: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: String,
}

/// Current time in the stored timestamp format. Microsecond precision keeps
/// lexicographic order equal to chronological order.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
