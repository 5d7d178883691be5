//! Protected token record persistence.
//!
//! This module only stores and retrieves opaque `encrypted_payload` bytes by
//! `token_id`; encryption, decryption and capability-token encoding live in
//! the server crate's token manager. Storage never sees plaintext claims.

use crate::pool::Storage;
use crate::sessions::parse_ts;
use blackboard_core::{AgentId, CoreError, CoreResult, ProtectedTokenRecord, TokenId};
use chrono::{DateTime, Utc};
use sqlx::Row;

impl Storage {
    pub async fn insert_protected_token(
        &self,
        token_id: &TokenId,
        encrypted_payload: &[u8],
        agent_id: &AgentId,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO protected_tokens (token_id, encrypted_payload, agent_id, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token_id.as_str())
        .bind(encrypted_payload)
        .bind(agent_id.as_str())
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_protected_token(&self, token_id: &TokenId) -> CoreResult<ProtectedTokenRecord> {
        let row = sqlx::query(
            "SELECT token_id, encrypted_payload, agent_id, expires_at, created_at
             FROM protected_tokens WHERE token_id = ?",
        )
        .bind(token_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .ok_or_else(|| CoreError::invalid_token("protected token not found"))?;

        row_to_token(&row)
    }

    pub async fn delete_protected_token(&self, token_id: &TokenId) -> CoreResult<()> {
        sqlx::query("DELETE FROM protected_tokens WHERE token_id = ?")
            .bind(token_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(())
    }

    /// Periodic removal of expired protected token rows.
    pub async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM protected_tokens WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> CoreResult<ProtectedTokenRecord> {
    let token_id: String = row
        .try_get("token_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let agent_id: String = row
        .try_get("agent_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let expires_at: String = row
        .try_get("expires_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(ProtectedTokenRecord {
        token_id: token_id.parse().map_err(|e: blackboard_core::ValidationError| CoreError::from(e))?,
        encrypted_payload: row
            .try_get("encrypted_payload")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        agent_id: AgentId::parse(agent_id).map_err(CoreError::from)?,
        expires_at: parse_ts(&expires_at)?,
        created_at: parse_ts(&created_at)?,
    })
}
