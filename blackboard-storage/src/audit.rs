//! Audit log repository: append-only, ADMIN-readable only (permission check
//! lives at the server layer; this module just stores/retrieves rows).

use crate::pool::Storage;
use crate::sessions::parse_ts;
use blackboard_core::{AgentId, AuditId, AuditRecord, CoreError, CoreResult, SessionId};
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::Row;

impl Storage {
    /// Append an audit row. Never accepts a protected token or decrypted
    /// capability token in `metadata` — callers must pass only `token_id`s.
    pub async fn append_audit(
        &self,
        event_type: &str,
        agent_id: Option<&AgentId>,
        session_id: Option<&SessionId>,
        resource: Option<&str>,
        action: Option<&str>,
        result: Option<&str>,
        metadata: Option<JsonValue>,
    ) -> CoreResult<AuditId> {
        let now = Utc::now();
        let metadata_str = metadata.as_ref().map(|v| v.to_string());

        let id = sqlx::query(
            "INSERT INTO audit_log (timestamp, event_type, agent_id, session_id, resource, action, result, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(now.to_rfc3339())
        .bind(event_type)
        .bind(agent_id.map(|a| a.as_str()))
        .bind(session_id.map(|s| s.as_str()))
        .bind(resource)
        .bind(action)
        .bind(result)
        .bind(&metadata_str)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .last_insert_rowid();

        Ok(AuditId::new(id))
    }

    /// Query audit rows, newest first, optionally filtered by agent/session.
    /// Caller enforces the ADMIN-only gate.
    pub async fn query_audit(
        &self,
        agent_id: Option<&AgentId>,
        session_id: Option<&SessionId>,
        limit: i64,
    ) -> CoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, event_type, agent_id, session_id, resource, action, result, metadata
             FROM audit_log
             WHERE (? IS NULL OR agent_id = ?) AND (? IS NULL OR session_id = ?)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?",
        )
        .bind(agent_id.map(|a| a.as_str()))
        .bind(agent_id.map(|a| a.as_str()))
        .bind(session_id.map(|s| s.as_str()))
        .bind(session_id.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        rows.iter().map(row_to_audit).collect()
    }
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> CoreResult<AuditRecord> {
    let agent_id: Option<String> = row
        .try_get("agent_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let session_id: Option<String> = row
        .try_get("session_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let metadata_str: Option<String> = row
        .try_get("metadata")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let timestamp: String = row
        .try_get("timestamp")
        .map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(AuditRecord {
        id: AuditId::new(
            row.try_get("id")
                .map_err(|e| CoreError::internal(e.to_string()))?,
        ),
        timestamp: parse_ts(&timestamp)?,
        event_type: row
            .try_get("event_type")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        agent_id: agent_id
            .map(AgentId::parse)
            .transpose()
            .map_err(CoreError::from)?,
        session_id: session_id
            .map(SessionId::parse)
            .transpose()
            .map_err(CoreError::from)?,
        resource: row
            .try_get("resource")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        action: row
            .try_get("action")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        result: row
            .try_get("result")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        metadata: metadata_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| CoreError::internal(e.to_string()))?,
    })
}
