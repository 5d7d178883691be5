//! Message repository: append, visibility-filtered read, visibility change.

use crate::pool::Storage;
use crate::sessions::parse_ts;
use blackboard_core::{
    AccessTier, AgentId, AgentType, CoreError, CoreResult, Message, MessageId, SessionId,
    Visibility, DEFAULT_MESSAGE_TYPE, MESSAGE_CONTENT_MAX_LEN,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::Row;

/// Server-side cap on `get_messages` page size, regardless of requested
/// `limit`.
pub const MESSAGES_LIMIT_CAP: i64 = 200;

/// Reader identity used to evaluate the visibility predicate (§4.4).
#[derive(Debug, Clone)]
pub struct ReaderContext {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub tier: AccessTier,
}

impl ReaderContext {
    /// `(m.visibility = 'public')
    ///  OR (m.visibility = 'private' AND m.sender = A)
    ///  OR (m.visibility = 'agent_only' AND m.sender_type = T)
    ///  OR (m.visibility = 'admin_only' AND 'admin' ∈ P)`
    pub(crate) fn can_see(&self, visibility: Visibility, sender: &str, sender_type: &str) -> bool {
        // ADMIN bypasses the per-tier predicate entirely: per the spec's own
        // visibility-isolation scenario, an admin reader receives all four
        // tiers, not just public/agent_only/admin_only plus their own
        // private messages.
        if self.tier.is_admin() {
            return true;
        }
        match visibility {
            Visibility::Public => true,
            Visibility::Private => sender == self.agent_id.as_str(),
            Visibility::AgentOnly => sender_type == self.agent_type.as_str(),
            Visibility::AdminOnly => false,
        }
    }
}

impl Storage {
    /// Append a message. Caller must hold the session write lock for
    /// `session_id` before calling this (see [`crate::SessionLockRegistry`]);
    /// this function performs the insert and `updated_at` bump as one unit
    /// but does not itself acquire the lock, since the server layer also
    /// needs the lock held across the notification-bus publish decision.
    pub async fn add_message(
        &self,
        session_id: &SessionId,
        sender: &AgentId,
        sender_type: &AgentType,
        content: &str,
        visibility: Visibility,
        message_type: Option<&str>,
        metadata: Option<JsonValue>,
        parent_message_id: Option<MessageId>,
    ) -> CoreResult<Message> {
        if content.is_empty() {
            return Err(CoreError::invalid_input("content must not be empty"));
        }
        if content.chars().count() > MESSAGE_CONTENT_MAX_LEN {
            return Err(CoreError::invalid_input(format!(
                "content must be at most {} characters",
                MESSAGE_CONTENT_MAX_LEN
            )));
        }

        // Session must exist and be active (deactivation closes writes).
        let session = self.get_session(session_id).await?;
        if !session.is_active {
            return Err(CoreError::invalid_input(format!(
                "session {} is not active",
                session_id
            )));
        }

        let message_type = message_type.unwrap_or(DEFAULT_MESSAGE_TYPE);
        let now = Utc::now();
        let metadata_str = metadata.as_ref().map(|v| v.to_string());

        let id: i64 = self
            .with_timeout(async {
                let result = sqlx::query(
                    "INSERT INTO messages
                        (session_id, sender, sender_type, content, visibility, message_type, metadata, timestamp, parent_message_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(session_id.as_str())
                .bind(sender.as_str())
                .bind(sender_type.as_str())
                .bind(content)
                .bind(visibility.as_db_str())
                .bind(message_type)
                .bind(&metadata_str)
                .bind(now.to_rfc3339())
                .bind(parent_message_id.map(|p| p.get()))
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
                Ok(result.last_insert_rowid())
            })
            .await?;

        self.touch_session(session_id).await?;

        Ok(Message {
            id: MessageId::new(id),
            session_id: session_id.clone(),
            sender: sender.clone(),
            sender_type: sender_type.clone(),
            content: content.to_string(),
            visibility,
            message_type: message_type.to_string(),
            metadata,
            timestamp: now,
            parent_message_id,
        })
    }

    /// Fetch messages visible to `reader`, ordered by timestamp ascending.
    pub async fn get_messages(
        &self,
        session_id: &SessionId,
        reader: &ReaderContext,
        limit: Option<i64>,
        offset: Option<i64>,
        visibility_filter: Option<Visibility>,
    ) -> CoreResult<Vec<Message>> {
        let limit = limit.unwrap_or(MESSAGES_LIMIT_CAP).clamp(1, MESSAGES_LIMIT_CAP);
        let offset = offset.unwrap_or(0).max(0);

        let rows = sqlx::query(
            "SELECT id, session_id, sender, sender_type, content, visibility, message_type,
                    metadata, timestamp, parent_message_id
             FROM messages WHERE session_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let msg = row_to_message(&row)?;
            if !reader.can_see(msg.visibility, msg.sender.as_str(), msg.sender_type.as_str()) {
                continue;
            }
            if let Some(filter) = visibility_filter {
                if msg.visibility != filter {
                    continue;
                }
            }
            out.push(msg);
        }

        let out = out
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(out)
    }

    /// Change a message's visibility. Caller enforces the permission rule
    /// (original sender, or ADMIN for any change, and ADMIN specifically to
    /// set `admin_only`) before calling this.
    pub async fn set_message_visibility(
        &self,
        message_id: MessageId,
        new_visibility: Visibility,
    ) -> CoreResult<(Message, Visibility)> {
        let row = sqlx::query(
            "SELECT id, session_id, sender, sender_type, content, visibility, message_type,
                    metadata, timestamp, parent_message_id
             FROM messages WHERE id = ?",
        )
        .bind(message_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .ok_or_else(|| CoreError::not_found(format!("message {} not found", message_id)))?;

        let old_message = row_to_message(&row)?;
        let old_visibility = old_message.visibility;

        sqlx::query("UPDATE messages SET visibility = ? WHERE id = ?")
            .bind(new_visibility.as_db_str())
            .bind(message_id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        self.touch_session(&old_message.session_id).await?;

        let mut updated = old_message;
        updated.visibility = new_visibility;
        Ok((updated, old_visibility))
    }

    /// Count messages visible to `reader` in a session, for `get_session`'s
    /// `message_count` field. Shares the same predicate as [`Self::get_messages`]
    /// rather than re-deriving visibility rules in SQL.
    pub async fn count_visible_messages(
        &self,
        session_id: &SessionId,
        reader: &ReaderContext,
    ) -> CoreResult<i64> {
        let rows = sqlx::query("SELECT visibility, sender, sender_type FROM messages WHERE session_id = ?")
            .bind(session_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        let count = rows
            .iter()
            .filter(|row| {
                let visibility: String = row.try_get("visibility").unwrap_or_default();
                let sender: String = row.try_get("sender").unwrap_or_default();
                let sender_type: String = row.try_get("sender_type").unwrap_or_default();
                let visibility: Visibility = visibility.parse().unwrap_or(Visibility::Public);
                reader.can_see(visibility, &sender, &sender_type)
            })
            .count();
        Ok(count as i64)
    }

    /// Fetch a single message by id (used by the server to check "original
    /// sender" ownership before permitting a visibility change).
    pub async fn get_message(&self, message_id: MessageId) -> CoreResult<Message> {
        let row = sqlx::query(
            "SELECT id, session_id, sender, sender_type, content, visibility, message_type,
                    metadata, timestamp, parent_message_id
             FROM messages WHERE id = ?",
        )
        .bind(message_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .ok_or_else(|| CoreError::not_found(format!("message {} not found", message_id)))?;
        row_to_message(&row)
    }
}

pub(crate) fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Message> {
    let session_id: String = row
        .try_get("session_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let sender: String = row
        .try_get("sender")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let sender_type: String = row
        .try_get("sender_type")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let visibility: String = row
        .try_get("visibility")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let metadata_str: Option<String> = row
        .try_get("metadata")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let timestamp: String = row
        .try_get("timestamp")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let parent: Option<i64> = row
        .try_get("parent_message_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(Message {
        id: MessageId::new(
            row.try_get("id")
                .map_err(|e| CoreError::internal(e.to_string()))?,
        ),
        session_id: SessionId::parse(session_id).map_err(CoreError::from)?,
        sender: AgentId::parse(sender).map_err(CoreError::from)?,
        sender_type: AgentType::new(sender_type),
        content: row
            .try_get("content")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        visibility: visibility
            .parse()
            .map_err(|e: blackboard_core::VisibilityParseError| CoreError::internal(e.to_string()))?,
        message_type: row
            .try_get("message_type")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        metadata: metadata_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| CoreError::internal(e.to_string()))?,
        timestamp: parse_ts(&timestamp)?,
        parent_message_id: parent.map(MessageId::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    async fn test_storage() -> Storage {
        Storage::connect(&PoolConfig {
            database_url: "sqlite::memory:".into(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn reader(agent: &str, agent_type: &str, tier: AccessTier) -> ReaderContext {
        ReaderContext {
            agent_id: AgentId::parse(agent).unwrap(),
            agent_type: AgentType::new(agent_type),
            tier,
        }
    }

    #[tokio::test]
    async fn visibility_isolation_scenario() {
        let storage = test_storage().await;
        let agent_a = AgentId::parse("agent-a").unwrap();
        let session = storage.create_session("test", &agent_a, None).await.unwrap();
        let claude = AgentType::new("claude");

        for (visibility, content) in [
            (Visibility::Public, "public msg"),
            (Visibility::Private, "private msg"),
            (Visibility::AgentOnly, "agent-only msg"),
            (Visibility::AdminOnly, "admin-only msg"),
        ] {
            storage
                .add_message(&session.id, &agent_a, &claude, content, visibility, None, None, None)
                .await
                .unwrap();
        }

        // Agent B, type gemini, non-admin: sees only the public message.
        let b = reader("agent-b", "gemini", AccessTier::Agent);
        let seen = storage.get_messages(&session.id, &b, None, None, None).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content, "public msg");

        // Agent C, type claude, non-admin: sees public + agent_only (same type).
        let c = reader("agent-c", "claude", AccessTier::Agent);
        let seen = storage.get_messages(&session.id, &c, None, None, None).await.unwrap();
        assert_eq!(seen.len(), 2);

        // Admin sees all four.
        let admin = reader("admin1", "claude", AccessTier::Admin);
        let seen = storage.get_messages(&session.id, &admin, None, None, None).await.unwrap();
        assert_eq!(seen.len(), 4);

        // Original sender (agent-a) sees public + private + agent_only.
        let owner = reader("agent-a", "claude", AccessTier::Agent);
        let seen = storage.get_messages(&session.id, &owner, None, None, None).await.unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn content_length_boundary() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("test", &agent, None).await.unwrap();
        let agent_type = AgentType::new("claude");

        let ok_content = "x".repeat(MESSAGE_CONTENT_MAX_LEN);
        storage
            .add_message(&session.id, &agent, &agent_type, &ok_content, Visibility::Public, None, None, None)
            .await
            .unwrap();

        let too_long = "x".repeat(MESSAGE_CONTENT_MAX_LEN + 1);
        let err = storage
            .add_message(&session.id, &agent, &agent_type, &too_long, Visibility::Public, None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn message_ids_strictly_increase_under_concurrency() {
        let storage = std::sync::Arc::new(test_storage().await);
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("test", &agent, None).await.unwrap();
        let agent_type = AgentType::new("claude");

        let mut handles = Vec::new();
        for i in 0..20 {
            let storage = storage.clone();
            let agent = agent.clone();
            let agent_type = agent_type.clone();
            let session_id = session.id.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .add_message(
                        &session_id,
                        &agent,
                        &agent_type,
                        &format!("message {i}"),
                        Visibility::Public,
                        None,
                        None,
                        None,
                    )
                    .await
                    .unwrap()
                    .id
                    .get()
            }));
        }
        let mut ids: Vec<i64> = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn set_visibility_admin_only_requires_admin_enforced_by_caller() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("test", &agent, None).await.unwrap();
        let agent_type = AgentType::new("claude");
        let msg = storage
            .add_message(&session.id, &agent, &agent_type, "hi", Visibility::Public, None, None, None)
            .await
            .unwrap();

        let (updated, old) = storage
            .set_message_visibility(msg.id, Visibility::AdminOnly)
            .await
            .unwrap();
        assert_eq!(old, Visibility::Public);
        assert_eq!(updated.visibility, Visibility::AdminOnly);
    }
}
