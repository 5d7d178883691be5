//! Entity types persisted by the storage engine.
//!
//! Pure data, no behavior beyond small invariant checks — mirrors the
//! teacher's "entities.rs contains only data" convention.

use crate::enums::Visibility;
use crate::identity::{AgentId, AgentType, AuditId, MemoryEntryId, MessageId, SessionId, TokenId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An isolated conversational workspace containing messages and optional
/// session-scoped memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_by: AgentId,
    pub metadata: Option<JsonValue>,
}

/// A single message appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender: AgentId,
    pub sender_type: AgentType,
    pub content: String,
    pub visibility: Visibility,
    pub message_type: String,
    pub metadata: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
    pub parent_message_id: Option<MessageId>,
}

/// Maximum message content length, in chars (§8 boundary: 100_000 accepted,
/// 100_001 rejected).
pub const MESSAGE_CONTENT_MAX_LEN: usize = 100_000;

/// Default message type applied when the caller doesn't supply one.
pub const DEFAULT_MESSAGE_TYPE: &str = "agent_response";

/// A per-agent key-value memory entry, optionally scoped to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemoryEntry {
    pub id: MemoryEntryId,
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub key: String,
    pub value: String,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentMemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Maximum length of a memory key.
pub const MEMORY_KEY_MAX_LEN: usize = 255;

/// Append-only audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub agent_id: Option<AgentId>,
    pub session_id: Option<SessionId>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub result: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// The capability claims carried inside a signed capability token.
///
/// Never crosses the tool boundary directly — only a [`TokenId`]-keyed
/// [`ProtectedTokenRecord`] does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub permissions: Vec<crate::enums::Permission>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Server-side record of an opaque protected token. The `encrypted_payload`
/// is ciphertext over an encoded [`CapabilityClaims`] JWT; it is never
/// serialized into audit rows or notification payloads — only `token_id` is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedTokenRecord {
    pub token_id: TokenId,
    pub encrypted_payload: Vec<u8>,
    pub agent_id: AgentId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_entry_expiry() {
        let now = Utc::now();
        let mut entry = AgentMemoryEntry {
            id: MemoryEntryId::new(1),
            agent_id: AgentId::parse("a1").unwrap(),
            session_id: None,
            key: "k".into(),
            value: "v".into(),
            metadata: None,
            created_at: now,
            updated_at: now,
            expires_at: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(entry.is_expired(now));
        entry.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!entry.is_expired(now));
    }
}
