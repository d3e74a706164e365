use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                username        TEXT UNIQUE,
                name            TEXT NOT NULL DEFAULT '',
                website         TEXT NOT NULL DEFAULT '',
                avatar_url      TEXT,
                reg_complete    INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                revoked     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);

            -- One row per user: both directions of the follow graph plus counters.
            CREATE TABLE following (
                user_id             TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                followed_accounts   TEXT NOT NULL DEFAULT '[]',
                follower_accounts   TEXT NOT NULL DEFAULT '[]',
                follower_count      INTEGER NOT NULL DEFAULT 0,
                following_count     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE tasks (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name            TEXT NOT NULL,
                description     TEXT NOT NULL,
                deadline        TEXT,
                is_completed    INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_tasks_user ON tasks(user_id, is_completed);

            CREATE TABLE posts (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                task_id             TEXT NOT NULL UNIQUE REFERENCES tasks(id),
                task_name           TEXT NOT NULL,
                task_description    TEXT NOT NULL,
                task_image          TEXT NOT NULL,
                likes_count         INTEGER NOT NULL DEFAULT 0,
                comment_count       INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_posts_created ON posts(created_at);
            CREATE INDEX idx_posts_user ON posts(user_id);

            CREATE TABLE likes (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                UNIQUE(post_id, user_id)
            );

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                text        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_post ON comments(post_id, created_at);

            CREATE TABLE conversations (
                id                      TEXT PRIMARY KEY,
                user1_id                TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                user2_id                TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_message_content    TEXT,
                last_message_timestamp  TEXT,
                created_at              TEXT NOT NULL
            );

            -- One conversation per unordered pair
            CREATE UNIQUE INDEX idx_conversations_pair
                ON conversations(min(user1_id, user2_id), max(user1_id, user2_id));

            CREATE TABLE messages (
                id                  TEXT PRIMARY KEY,
                conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id           TEXT NOT NULL REFERENCES users(id),
                recipient_id        TEXT NOT NULL REFERENCES users(id),
                content             TEXT NOT NULL,
                timestamp           TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, timestamp);

            CREATE TABLE storage_objects (
                bucket          TEXT NOT NULL,
                path            TEXT NOT NULL,
                owner_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content_type    TEXT NOT NULL,
                size            INTEGER NOT NULL,
                sha256          TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (bucket, path)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
