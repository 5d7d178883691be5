//! Search core: fuzzy content search, sender filters, time-range filters.
//! All three are constrained by the same visibility predicate as
//! `get_messages`.

use crate::messages::{row_to_message, ReaderContext};
use crate::pool::Storage;
use blackboard_core::{partial_ratio, AgentId, CoreError, CoreResult, Message, SearchScope, SessionId};
use chrono::{DateTime, Utc};

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message: Message,
    pub score: u32,
}

impl Storage {
    /// Substring-biased fuzzy search over a session's visible messages.
    /// Ranked by descending score, then descending timestamp.
    pub async fn search_context(
        &self,
        session_id: &SessionId,
        reader: &ReaderContext,
        query: &str,
        threshold: u32,
        limit: i64,
        search_scope: SearchScope,
    ) -> CoreResult<Vec<SearchHit>> {
        let visible = self.get_messages(session_id, reader, None, None, None).await?;

        let mut hits: Vec<SearchHit> = visible
            .into_iter()
            .filter_map(|m| {
                let mut best = partial_ratio(query, &m.content);
                if matches!(search_scope, SearchScope::Sender | SearchScope::All) {
                    best = best.max(partial_ratio(query, m.sender.as_str()));
                }
                if matches!(search_scope, SearchScope::Metadata | SearchScope::All) {
                    if let Some(meta) = &m.metadata {
                        best = best.max(partial_ratio(query, &meta.to_string()));
                    }
                }
                if best >= threshold {
                    Some(SearchHit { message: m, score: best })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score).then(b.message.timestamp.cmp(&a.message.timestamp)));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    /// Exact-sender match, constrained to what `reader` may see.
    pub async fn search_by_sender(
        &self,
        session_id: &SessionId,
        reader: &ReaderContext,
        sender: &AgentId,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let mut visible = self.get_messages(session_id, reader, None, None, None).await?;
        visible.retain(|m| &m.sender == sender);
        visible.truncate(limit.max(0) as usize);
        Ok(visible)
    }

    /// Time-range match using SQLite's native datetime comparison, not
    /// textual comparison of ISO strings.
    pub async fn search_by_timerange(
        &self,
        session_id: &SessionId,
        reader: &ReaderContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, sender, sender_type, content, visibility, message_type,
                    metadata, timestamp, parent_message_id
             FROM messages
             WHERE session_id = ?
               AND datetime(timestamp) >= datetime(?)
               AND datetime(timestamp) <= datetime(?)
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id.as_str())
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let msg = row_to_message(&row)?;
            if reader.can_see(msg.visibility, msg.sender.as_str(), msg.sender_type.as_str()) {
                out.push(msg);
            }
        }
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use blackboard_core::{AccessTier, AgentType, Visibility};

    async fn test_storage() -> Storage {
        Storage::connect(&PoolConfig {
            database_url: "sqlite::memory:".into(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn reader(agent: &str) -> ReaderContext {
        ReaderContext {
            agent_id: AgentId::parse(agent).unwrap(),
            agent_type: AgentType::new("claude"),
            tier: AccessTier::Admin,
        }
    }

    #[tokio::test]
    async fn fuzzy_search_ordering() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("p", &agent, None).await.unwrap();
        let agent_type = AgentType::new("claude");

        for content in ["the quick brown fox", "Python programming language", "python scripting"] {
            storage
                .add_message(&session.id, &agent, &agent_type, content, Visibility::Public, None, None, None)
                .await
                .unwrap();
        }

        let hits = storage
            .search_context(&session.id, &reader("agent1"), "python", 60, 10, SearchScope::Content)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score >= 60));
        assert!(hits.iter().all(|h| h.message.content != "the quick brown fox"));
    }

    #[tokio::test]
    async fn search_by_sender_exact_match() {
        let storage = test_storage().await;
        let a1 = AgentId::parse("agent1").unwrap();
        let a2 = AgentId::parse("agent2").unwrap();
        let session = storage.create_session("p", &a1, None).await.unwrap();
        let agent_type = AgentType::new("claude");

        storage.add_message(&session.id, &a1, &agent_type, "from a1", Visibility::Public, None, None, None).await.unwrap();
        storage.add_message(&session.id, &a2, &agent_type, "from a2", Visibility::Public, None, None, None).await.unwrap();

        let hits = storage.search_by_sender(&session.id, &reader("admin"), &a1, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "from a1");
    }

    #[tokio::test]
    async fn search_by_timerange_uses_native_comparison() {
        let storage = test_storage().await;
        let agent = AgentId::parse("agent1").unwrap();
        let session = storage.create_session("p", &agent, None).await.unwrap();
        let agent_type = AgentType::new("claude");
        storage.add_message(&session.id, &agent, &agent_type, "hi", Visibility::Public, None, None, None).await.unwrap();

        let now = Utc::now();
        let hits = storage
            .search_by_timerange(&session.id, &reader("admin"), now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(5), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let none = storage
            .search_by_timerange(&session.id, &reader("admin"), now + chrono::Duration::hours(1), now + chrono::Duration::hours(2), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
