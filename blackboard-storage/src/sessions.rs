//! Session repository: create/get sessions, soft deactivation, cascade
//! delete.

use crate::pool::Storage;
use blackboard_core::{AgentId, CoreError, CoreResult, Session, SessionId};
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::Row;

/// Maximum length of a session's `purpose` field.
pub const SESSION_PURPOSE_MAX_LEN: usize = 1000;

impl Storage {
    /// Create a new session. Requires the caller to already hold write
    /// permission; that check lives in the server layer, not here.
    pub async fn create_session(
        &self,
        purpose: &str,
        created_by: &AgentId,
        metadata: Option<JsonValue>,
    ) -> CoreResult<Session> {
        if purpose.is_empty() || purpose.chars().count() > SESSION_PURPOSE_MAX_LEN {
            return Err(CoreError::invalid_input(format!(
                "purpose must be 1-{} characters",
                SESSION_PURPOSE_MAX_LEN
            )));
        }

        let id = SessionId::generate();
        let now = Utc::now();
        let metadata_str = metadata.as_ref().map(|v| v.to_string());

        self.with_timeout(async {
            sqlx::query(
                "INSERT INTO sessions (id, purpose, created_at, updated_at, is_active, created_by, metadata)
                 VALUES (?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(id.as_str())
            .bind(purpose)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(created_by.as_str())
            .bind(&metadata_str)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
            Ok(())
        })
        .await?;

        Ok(Session {
            id,
            purpose: purpose.to_string(),
            created_at: now,
            updated_at: now,
            is_active: true,
            created_by: created_by.clone(),
            metadata,
        })
    }

    /// Fetch a session by id, or `NOT_FOUND`.
    pub async fn get_session(&self, id: &SessionId) -> CoreResult<Session> {
        let row = sqlx::query(
            "SELECT id, purpose, created_at, updated_at, is_active, created_by, metadata
             FROM sessions WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .ok_or_else(|| CoreError::not_found(format!("session {} not found", id)))?;

        row_to_session(&row)
    }

    /// Soft-deactivate a session. Per the spec's resolved open question,
    /// this both hides non-admin reads and closes writes — enforced by
    /// callers checking `is_active` before invoking write operations and the
    /// visibility layer treating an inactive session's non-public content as
    /// admin-only for non-admin readers.
    pub async fn set_session_active(
        &self,
        id: &SessionId,
        is_active: bool,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE sessions SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(now.to_rfc3339())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("session {} not found", id)));
        }
        Ok(())
    }

    /// Bump `updated_at` for a session; called by any child mutation.
    pub async fn touch_session(&self, id: &SessionId) -> CoreResult<()> {
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(())
    }
}

pub(crate) fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Session> {
    let id_str: String = row
        .try_get("id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let metadata_str: Option<String> = row
        .try_get("metadata")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let created_by: String = row
        .try_get("created_by")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(Session {
        id: SessionId::parse(id_str).map_err(CoreError::from)?,
        purpose: row
            .try_get("purpose")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        is_active: row
            .try_get::<i64, _>("is_active")
            .map_err(|e| CoreError::internal(e.to_string()))?
            != 0,
        created_by: AgentId::parse(created_by).map_err(CoreError::from)?,
        metadata: metadata_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| CoreError::internal(e.to_string()))?,
    })
}

pub(crate) fn parse_ts(s: &str) -> CoreResult<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::internal(format!("bad timestamp '{s}': {e}")))
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

    #[tokio::test]
    async fn create_and_get_session() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("testing", &agent, None).await.unwrap();
        let fetched = storage.get_session(&session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(fetched.is_active);
        assert_eq!(fetched.created_by, agent);
    }

    #[tokio::test]
    async fn get_missing_session_not_found() {
        let storage = test_storage().await;
        let id = SessionId::parse("nonexistent1").unwrap();
        let err = storage.get_session(&id).await.unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn empty_purpose_rejected() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let err = storage.create_session("", &agent, None).await.unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn deactivate_session() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("p", &agent, None).await.unwrap();
        storage.set_session_active(&session.id, false).await.unwrap();
        let fetched = storage.get_session(&session.id).await.unwrap();
        assert!(!fetched.is_active);
    }
}
