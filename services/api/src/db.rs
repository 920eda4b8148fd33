use crate::models::{ChatMessage, ChatRoom, MessageRole, User, VocabEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Raised when a vocabulary word already exists for a user.
#[derive(Debug, thiserror::Error)]
#[error("word '{0}' is already in the notebook")]
pub struct DuplicateWord(pub String);

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    room_id: Uuid,
    role: String,
    content: String,
    origin: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VocabRow {
    id: Uuid,
    user_id: Uuid,
    word: String,
    definition: String,
    examples: serde_json::Value,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role = row
            .role
            .parse::<MessageRole>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("message {} has a corrupt role column", row.id))?;
        Ok(ChatMessage {
            id: row.id,
            room_id: row.room_id,
            role,
            content: row.content,
            origin: row.origin,
            created_at: row.created_at,
        })
    }
}

impl From<VocabRow> for VocabEntry {
    fn from(row: VocabRow) -> Self {
        let examples = serde_json::from_value(row.examples).unwrap_or_default();
        VocabEntry {
            id: row.id,
            user_id: row.user_id,
            word: row.word,
            definition: row.definition,
            examples,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

/// Database access layer backed by Postgres.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Returns the user with the given username, creating it on first sight.
    pub async fn get_or_create_user(&self, username: &str) -> Result<User> {
        if let Some(row) = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up user")?
        {
            return Ok(User {
                id: row.id,
                username: row.username,
                created_at: row.created_at,
            });
        }

        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, username) VALUES ($1, $2)
             RETURNING id, username, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create user")?;

        info!(username, "Created new user");
        Ok(User {
            id: row.id,
            username: row.username,
            created_at: row.created_at,
        })
    }

    pub async fn create_room(&self, user_id: Uuid, name: &str) -> Result<ChatRoom> {
        let row = sqlx::query_as::<_, RoomRow>(
            "INSERT INTO chat_rooms (id, user_id, name) VALUES ($1, $2, $3)
             RETURNING id, user_id, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create chat room")?;

        Ok(ChatRoom {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            created_at: row.created_at,
        })
    }

    pub async fn list_rooms(&self, user_id: Uuid) -> Result<Vec<ChatRoom>> {
        let rows = sqlx::query_as::<_, RoomRow>(
            "SELECT id, user_id, name, created_at FROM chat_rooms
             WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list chat rooms")?;

        Ok(rows
            .into_iter()
            .map(|row| ChatRoom {
                id: row.id,
                user_id: row.user_id,
                name: row.name,
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn get_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>> {
        let row = sqlx::query_as::<_, RoomRow>(
            "SELECT id, user_id, name, created_at FROM chat_rooms WHERE id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch chat room")?;

        Ok(row.map(|row| ChatRoom {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            created_at: row.created_at,
        }))
    }

    pub async fn rename_room(&self, room_id: Uuid, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_rooms SET name = $1 WHERE id = $2")
            .bind(name)
            .bind(room_id)
            .execute(&self.pool)
            .await
            .context("Failed to rename chat room")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a room; messages cascade at the database level.
    pub async fn delete_room(&self, room_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_rooms WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete chat room")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_room_message(
        &self,
        room_id: Uuid,
        role: MessageRole,
        content: &str,
        origin: Option<&str>,
    ) -> Result<ChatMessage> {
        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO chat_messages (id, room_id, role, content, origin)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, room_id, role, content, origin, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(room_id)
        .bind(role.to_string())
        .bind(content)
        .bind(origin)
        .fetch_one(&self.pool)
        .await
        .context("Failed to store chat message")?;

        row.try_into()
    }

    pub async fn room_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, room_id, role, content, origin, created_at FROM chat_messages
             WHERE room_id = $1 ORDER BY created_at ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch chat messages")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Recent history for prompting, balanced across both roles.
    pub async fn recent_history(&self, room_id: Uuid, max: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.room_messages(room_id).await?;
        Ok(balance_history(&messages, max))
    }

    pub async fn add_vocab_entry(
        &self,
        user_id: Uuid,
        word: &str,
        definition: &str,
        examples: &[String],
        notes: Option<&str>,
    ) -> Result<VocabEntry> {
        let existing = sqlx::query(
            "SELECT 1 FROM vocab_entries WHERE user_id = $1 AND lower(word) = lower($2)",
        )
        .bind(user_id)
        .bind(word)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check vocabulary entry")?;

        if existing.is_some() {
            return Err(DuplicateWord(word.to_string()).into());
        }

        let row = sqlx::query_as::<_, VocabRow>(
            "INSERT INTO vocab_entries (id, user_id, word, definition, examples, notes)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, user_id, word, definition, examples, notes, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(word)
        .bind(definition)
        .bind(serde_json::to_value(examples).unwrap_or_default())
        .bind(notes)
        .fetch_one(&self.pool)
        .await
        .context("Failed to add vocabulary entry")?;

        Ok(row.into())
    }

    pub async fn list_vocab(&self, user_id: Uuid) -> Result<Vec<VocabEntry>> {
        let rows = sqlx::query_as::<_, VocabRow>(
            "SELECT id, user_id, word, definition, examples, notes, created_at
             FROM vocab_entries WHERE user_id = $1 ORDER BY word ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list vocabulary entries")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn delete_vocab(&self, user_id: Uuid, word: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM vocab_entries WHERE user_id = $1 AND lower(word) = lower($2)",
        )
        .bind(user_id)
        .bind(word)
        .execute(&self.pool)
        .await
        .context("Failed to delete vocabulary entry")?;
        Ok(result.rows_affected() > 0)
    }
}

/// Picks a recency window with at most `max / 2` messages per role,
/// scanning newest first, then restores chronological order.
pub fn balance_history(messages: &[ChatMessage], max: usize) -> Vec<ChatMessage> {
    let per_role = (max / 2).max(1);
    let mut user_count = 0usize;
    let mut assistant_count = 0usize;
    let mut picked: Vec<ChatMessage> = Vec::new();

    for msg in messages.iter().rev() {
        let count = match msg.role {
            MessageRole::User => &mut user_count,
            MessageRole::Assistant => &mut assistant_count,
        };
        if *count < per_role {
            *count += 1;
            picked.push(msg.clone());
        }
        if user_count >= per_role && assistant_count >= per_role {
            break;
        }
    }

    picked.reverse();
    picked
}
