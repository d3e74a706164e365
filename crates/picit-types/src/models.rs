use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    pub name: String,
    pub website: String,
    pub avatar_url: Option<String>,
    pub reg_complete: bool,
    pub created_at: DateTime<Utc>,
}

/// A user's profile page: the user plus social and task counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub follower_count: i64,
    pub following_count: i64,
    pub completed_task_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowStats {
    pub follower_count: i64,
    pub following_count: i64,
}

/// Short author record embedded in feed posts, comments and conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    pub is_completed: bool,
    /// Open task whose deadline has already passed.
    pub overdue: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub task_description: String,
    pub task_image: String,
    pub likes_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPost {
    #[serde(flatten)]
    pub post: Post,
    pub user: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub other_user: Option<UserSummary>,
    /// Decrypted last message.
    pub last_message_content: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

/// A direct message with its content already decrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub size: i64,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
}
