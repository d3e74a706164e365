use anyhow::{Result, bail};
use rusqlite::{Connection, Row, TransactionBehavior, params};

use super::{OptionalExt, new_id};
use crate::Database;
use crate::models::{ConversationRow, MessageRow, now_timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent(MessageRow),
    NotFound,
    NotParticipant,
}

const CONVERSATION_COLUMNS: &str =
    "id, user1_id, user2_id, last_message_content, last_message_timestamp, created_at";

impl Database {
    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
            let row = conn.query_row(&sql, [id], map_conversation).optional()?;
            Ok(row)
        })
    }

    /// The conversation between two users, in either participant order.
    pub fn find_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_pair(conn, user_a, user_b))
    }

    /// Return the pair's conversation, creating it if needed.
    /// The flag is true when a new conversation was created.
    pub fn open_conversation(&self, user_a: &str, user_b: &str) -> Result<(ConversationRow, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = query_pair(&tx, user_a, user_b)? {
                return Ok((existing, false));
            }

            let id = new_id();
            tx.execute(
                "INSERT INTO conversations (id, user1_id, user2_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, user_a, user_b, now_timestamp()],
            )?;
            let created = query_pair(&tx, user_a, user_b)?
                .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished inside its transaction", id))?;
            tx.commit()?;
            Ok((created, true))
        })
    }

    /// A user's conversations, most recent activity first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY COALESCE(last_message_timestamp, created_at) DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Messages of a conversation, oldest first. Content is ciphertext.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, recipient_id, content, timestamp
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a message and move the conversation's last-message fields in one
    /// transaction: either both become visible or neither does.
    /// `content` must already be encrypted.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<SendOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
            let Some(conversation) = tx.query_row(&sql, [conversation_id], map_conversation).optional()?
            else {
                return Ok(SendOutcome::NotFound);
            };
            if !conversation.has_participant(sender_id) {
                return Ok(SendOutcome::NotParticipant);
            }

            let message = MessageRow {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                recipient_id: conversation.other_participant(sender_id).to_string(),
                content: content.to_string(),
                timestamp: now_timestamp(),
            };

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.recipient_id,
                    message.content,
                    message.timestamp,
                ],
            )?;

            let updated = tx.execute(
                "UPDATE conversations SET last_message_content = ?2, last_message_timestamp = ?3 WHERE id = ?1",
                params![conversation_id, message.content, message.timestamp],
            )?;
            if updated != 1 {
                bail!("Conversation {} not updated", conversation_id);
            }

            tx.commit()?;
            Ok(SendOutcome::Sent(message))
        })
    }
}

fn query_pair(conn: &Connection, user_a: &str, user_b: &str) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1)"
    );
    let row = conn.query_row(&sql, params![user_a, user_b], map_conversation).optional()?;
    Ok(row)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        last_message_content: row.get(3)?,
        last_message_timestamp: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testutil::user;

    #[test]
    fn one_conversation_per_unordered_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        let (first, created) = db.open_conversation(&a, &b).unwrap();
        assert!(created);
        let (second, created) = db.open_conversation(&b, &a).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let duplicate = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user1_id, user2_id, created_at) VALUES ('x', ?1, ?2, 'now')",
                params![b, a],
            )?;
            Ok(())
        });
        assert!(duplicate.is_err());
    }

    #[test]
    fn send_updates_last_message_and_recipient() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let (conv, _) = db.open_conversation(&a, &b).unwrap();

        let SendOutcome::Sent(sent) = db.insert_message("m1", &conv.id, &b, "cipher-1").unwrap() else {
            panic!("expected send");
        };
        assert_eq!(sent.recipient_id, a);

        let conv = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(conv.last_message_content.as_deref(), Some("cipher-1"));
        assert_eq!(conv.last_message_timestamp, Some(sent.timestamp));

        db.insert_message("m2", &conv.id, &a, "cipher-2").unwrap();
        let ids: Vec<String> = db.get_messages(&conv.id).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn outsiders_and_missing_conversations_send_nothing() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        let (conv, _) = db.open_conversation(&a, &b).unwrap();

        assert_eq!(db.insert_message("m1", &conv.id, &c, "x").unwrap(), SendOutcome::NotParticipant);
        assert_eq!(db.insert_message("m2", "nope", &a, "x").unwrap(), SendOutcome::NotFound);
        assert!(db.get_messages(&conv.id).unwrap().is_empty());
        assert!(db.get_conversation(&conv.id).unwrap().unwrap().last_message_content.is_none());
    }

    #[test]
    fn failed_insert_leaves_conversation_untouched() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let (conv, _) = db.open_conversation(&a, &b).unwrap();
        db.insert_message("m1", &conv.id, &a, "first").unwrap();

        // Same id again violates the primary key inside the transaction
        assert!(db.insert_message("m1", &conv.id, &a, "second").is_err());

        let conv = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(conv.last_message_content.as_deref(), Some("first"));
        assert_eq!(db.get_messages(&conv.id).unwrap().len(), 1);
    }

    #[test]
    fn conversations_sorted_by_activity() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        let (with_b, _) = db.open_conversation(&a, &b).unwrap();
        let (with_c, _) = db.open_conversation(&c, &a).unwrap();
        db.insert_message("m1", &with_b.id, &b, "ping").unwrap();

        let ids: Vec<String> = db.conversations_for_user(&a).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![with_b.id.clone(), with_c.id]);
        assert_eq!(db.conversations_for_user(&b).unwrap().len(), 1);
    }
}
