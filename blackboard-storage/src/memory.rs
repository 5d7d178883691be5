//! Agent memory repository: dual-scoped KV with TTL.

use crate::pool::Storage;
use crate::sessions::parse_ts;
use blackboard_core::{
    AgentId, AgentMemoryEntry, CoreError, CoreResult, MemoryEntryId, MemoryScope, SessionId,
    MEMORY_KEY_MAX_LEN,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::Row;

impl Storage {
    /// Upsert a memory entry for `(agent_id, session_id, key)`. `now` is a
    /// single application-computed timestamp used for both `created_at`/
    /// `updated_at` bookkeeping and `expires_at = now + ttl_seconds`, so the
    /// `expires_at > created_at` invariant never depends on mixing an
    /// application clock with a database-side default.
    pub async fn set_memory(
        &self,
        agent_id: &AgentId,
        key: &str,
        value: &str,
        session_id: Option<&SessionId>,
        ttl_seconds: Option<i64>,
        overwrite: bool,
        metadata: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<DateTime<Utc>>> {
        if key.is_empty() || key.chars().count() > MEMORY_KEY_MAX_LEN {
            return Err(CoreError::invalid_input(format!(
                "key must be 1-{} characters",
                MEMORY_KEY_MAX_LEN
            )));
        }
        if let Some(ttl) = ttl_seconds {
            if ttl <= 0 {
                return Err(CoreError::invalid_input("ttl_seconds must be > 0"));
            }
        }

        let expires_at = ttl_seconds.map(|ttl| now + chrono::Duration::seconds(ttl));
        let metadata_str = metadata.as_ref().map(|v| v.to_string());
        let session_id_str = session_id.map(|s| s.as_str());
        let expires_at_str = expires_at.map(|e| e.to_rfc3339());

        self.with_timeout(async {
            // last-writer-wins upsert, keyed on the two partial unique indexes
            let existing_row: Option<(i64, Option<String>)> = sqlx::query_as(
                "SELECT id, expires_at FROM agent_memory
                 WHERE agent_id = ? AND key = ?
                   AND ((session_id IS NULL AND ? IS NULL) OR session_id = ?)",
            )
            .bind(agent_id.as_str())
            .bind(key)
            .bind(session_id_str)
            .bind(session_id_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

            let existing = match existing_row {
                Some((id, row_expires_at)) => {
                    let is_expired = row_expires_at
                        .as_deref()
                        .map(parse_ts)
                        .transpose()?
                        .is_some_and(|e| e <= now);
                    if is_expired {
                        self.delete_memory_row(MemoryEntryId::new(id)).await?;
                        None
                    } else {
                        Some(id)
                    }
                }
                None => None,
            };

            if existing.is_some() && !overwrite {
                return Err(CoreError::conflict(format!(
                    "memory key '{}' already exists",
                    key
                )));
            }

            if let Some(id) = existing {
                sqlx::query(
                    "UPDATE agent_memory SET value = ?, metadata = ?, updated_at = ?, expires_at = ? WHERE id = ?",
                )
                .bind(value)
                .bind(&metadata_str)
                .bind(now.to_rfc3339())
                .bind(&expires_at_str)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
            } else {
                sqlx::query(
                    "INSERT INTO agent_memory
                        (agent_id, session_id, key, value, metadata, created_at, updated_at, expires_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(agent_id.as_str())
                .bind(session_id_str)
                .bind(key)
                .bind(value)
                .bind(&metadata_str)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(&expires_at_str)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
            }
            Ok(())
        })
        .await?;

        Ok(expires_at)
    }

    /// Fetch a (non-expired) memory entry. Expired entries are rejected with
    /// `NOT_FOUND` and scheduled for sweep rather than returned.
    pub async fn get_memory(
        &self,
        agent_id: &AgentId,
        key: &str,
        session_id: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> CoreResult<AgentMemoryEntry> {
        let session_id_str = session_id.map(|s| s.as_str());
        let row = sqlx::query(
            "SELECT id, agent_id, session_id, key, value, metadata, created_at, updated_at, expires_at
             FROM agent_memory
             WHERE agent_id = ? AND key = ?
               AND ((session_id IS NULL AND ? IS NULL) OR session_id = ?)",
        )
        .bind(agent_id.as_str())
        .bind(key)
        .bind(session_id_str)
        .bind(session_id_str)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?
        .ok_or_else(|| CoreError::not_found(format!("memory key '{}' not found", key)))?;

        let entry = row_to_memory(&row)?;
        if entry.is_expired(now) {
            let id = entry.id;
            let _ = self.delete_memory_row(id).await;
            return Err(CoreError::not_found(format!("memory key '{}' not found", key)));
        }
        Ok(entry)
    }

    /// List memory entries visible to `agent_id`, scoped as requested.
    /// Expired-but-unswept rows are silently filtered out rather than
    /// returned: readers should never observe a stale value, and the
    /// background sweep is purely an optimization, not the source of truth.
    pub async fn list_memory(
        &self,
        agent_id: &AgentId,
        session_id: Option<&SessionId>,
        scope: MemoryScope,
        prefix: Option<&str>,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<AgentMemoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, agent_id, session_id, key, value, metadata, created_at, updated_at, expires_at
             FROM agent_memory WHERE agent_id = ?",
        )
        .bind(agent_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let entry = row_to_memory(&row)?;
            if entry.is_expired(now) {
                continue;
            }
            match scope {
                MemoryScope::Global if entry.session_id.is_some() => continue,
                MemoryScope::Session => match (&entry.session_id, session_id) {
                    (Some(s), Some(want)) if s == want => {}
                    _ => continue,
                },
                _ => {}
            }
            if let Some(prefix) = prefix {
                if !entry.key.starts_with(prefix) {
                    continue;
                }
            }
            out.push(entry);
        }

        out.sort_by_key(|b| std::cmp::Reverse(b.updated_at));
        if let Some(limit) = limit {
            out.truncate(limit.max(0) as usize);
        }
        Ok(out)
    }

    /// Remove all memory rows whose `expires_at` has passed.
    pub async fn sweep_expired_memory(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM agent_memory WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn delete_memory_row(&self, id: MemoryEntryId) -> CoreResult<()> {
        sqlx::query("DELETE FROM agent_memory WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;
        Ok(())
    }
}

fn row_to_memory(row: &sqlx::sqlite::SqliteRow) -> CoreResult<AgentMemoryEntry> {
    let agent_id: String = row
        .try_get("agent_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let session_id: Option<String> = row
        .try_get("session_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let metadata_str: Option<String> = row
        .try_get("metadata")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let expires_at: Option<String> = row
        .try_get("expires_at")
        .map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(AgentMemoryEntry {
        id: MemoryEntryId::new(
            row.try_get("id")
                .map_err(|e| CoreError::internal(e.to_string()))?,
        ),
        agent_id: AgentId::parse(agent_id).map_err(CoreError::from)?,
        session_id: session_id
            .map(SessionId::parse)
            .transpose()
            .map_err(CoreError::from)?,
        key: row
            .try_get("key")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        value: row
            .try_get("value")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        metadata: metadata_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| CoreError::internal(e.to_string()))?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
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

    #[tokio::test]
    async fn set_then_get_global_memory() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let now = Utc::now();
        storage
            .set_memory(&agent, "k", "v", None, None, true, None, now)
            .await
            .unwrap();
        let entry = storage.get_memory(&agent, "k", None, now).await.unwrap();
        assert_eq!(entry.value, "v");
        assert!(entry.session_id.is_none());
    }

    #[tokio::test]
    async fn ttl_zero_rejected() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let now = Utc::now();
        let err = storage
            .set_memory(&agent, "k", "v", None, Some(0), true, None, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn memory_expires_and_is_not_found_after_ttl() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let t0 = Utc::now();
        storage
            .set_memory(&agent, "k", "v", None, Some(2), true, None, t0)
            .await
            .unwrap();

        let at_1s = storage.get_memory(&agent, "k", None, t0 + chrono::Duration::seconds(1)).await;
        assert!(at_1s.is_ok());

        let at_3s = storage.get_memory(&agent, "k", None, t0 + chrono::Duration::seconds(3)).await;
        assert_eq!(at_3s.unwrap_err().kind, blackboard_core::ErrorKind::NotFound);

        let listed = storage
            .list_memory(&agent, None, MemoryScope::All, None, None, t0 + chrono::Duration::seconds(3))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn set_memory_overwrite_last_writer_wins() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let now = Utc::now();
        storage.set_memory(&agent, "k", "v1", None, None, true, None, now).await.unwrap();
        storage.set_memory(&agent, "k", "v2", None, None, true, None, now + chrono::Duration::seconds(1)).await.unwrap();
        let entry = storage.get_memory(&agent, "k", None, now + chrono::Duration::seconds(2)).await.unwrap();
        assert_eq!(entry.value, "v2");
    }

    #[tokio::test]
    async fn global_and_session_scoped_entries_are_distinct() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("p", &agent, None).await.unwrap();
        let now = Utc::now();
        storage.set_memory(&agent, "k", "global", None, None, true, None, now).await.unwrap();
        storage
            .set_memory(&agent, "k", "scoped", Some(&session.id), None, true, None, now)
            .await
            .unwrap();

        let g = storage.get_memory(&agent, "k", None, now).await.unwrap();
        let s = storage.get_memory(&agent, "k", Some(&session.id), now).await.unwrap();
        assert_eq!(g.value, "global");
        assert_eq!(s.value, "scoped");
    }

    #[tokio::test]
    async fn sweep_removes_expired_rows() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let t0 = Utc::now();
        storage.set_memory(&agent, "k", "v", None, Some(1), true, None, t0).await.unwrap();
        let removed = storage.sweep_expired_memory(t0 + chrono::Duration::seconds(5)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn overwrite_false_rejects_existing_key() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let now = Utc::now();
        storage.set_memory(&agent, "k", "v1", None, None, true, None, now).await.unwrap();
        let err = storage
            .set_memory(&agent, "k", "v2", None, None, false, None, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::Conflict);
        let entry = storage.get_memory(&agent, "k", None, now).await.unwrap();
        assert_eq!(entry.value, "v1");
    }

    #[tokio::test]
    async fn overwrite_false_allows_write_after_expiry() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let t0 = Utc::now();
        storage.set_memory(&agent, "k", "v1", None, Some(1), true, None, t0).await.unwrap();
        let later = t0 + chrono::Duration::seconds(5);
        storage
            .set_memory(&agent, "k", "v2", None, None, false, None, later)
            .await
            .unwrap();
        let entry = storage.get_memory(&agent, "k", None, later).await.unwrap();
        assert_eq!(entry.value, "v2");
    }
}
