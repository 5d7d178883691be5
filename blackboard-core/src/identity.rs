//! Identity types for blackboard entities.
//!
//! Sessions and agents are identified by opaque, caller-meaningful strings
//! rather than UUIDs (agents are external processes that pick their own
//! ids); messages, memory entries and audit rows get server-assigned
//! monotonic integers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum length of a [`SessionId`].
pub const SESSION_ID_MIN_LEN: usize = 8;
/// Maximum length of a [`SessionId`].
pub const SESSION_ID_MAX_LEN: usize = 64;
/// Maximum length of an [`AgentId`].
pub const AGENT_ID_MAX_LEN: usize = 255;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Opaque session identifier: 8-64 chars, alphanumerics/`-`/`_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a caller-supplied id.
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.len() < SESSION_ID_MIN_LEN || s.len() > SESSION_ID_MAX_LEN {
            return Err(ValidationError::InvalidValue {
                field: "session_id".to_string(),
                reason: format!(
                    "must be {}-{} characters, got {}",
                    SESSION_ID_MIN_LEN,
                    SESSION_ID_MAX_LEN,
                    s.len()
                ),
            });
        }
        if !s.chars().all(is_id_char) {
            return Err(ValidationError::InvalidValue {
                field: "session_id".to_string(),
                reason: "must be alphanumeric, '-' or '_'".to_string(),
            });
        }
        Ok(Self(s))
    }

    /// Generate a new random conforming id.
    pub fn generate() -> Self {
        Self(format!("sess_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Opaque agent identifier, supplied by the connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.is_empty() || s.len() > AGENT_ID_MAX_LEN {
            return Err(ValidationError::InvalidValue {
                field: "agent_id".to_string(),
                reason: format!("must be 1-{} characters", AGENT_ID_MAX_LEN),
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Free-form agent type/role label (e.g. "claude", "gemini").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(String);

impl AgentType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque protected-token handle exposed to clients: `sct_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub const PREFIX: &'static str = "sct_";

    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with(Self::PREFIX) {
            return Err(ValidationError::InvalidValue {
                field: "token".to_string(),
                reason: format!("must start with '{}'", Self::PREFIX),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// Macro to define a server-assigned, monotonic integer id newtype.
macro_rules! define_integer_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(v: i64) -> Self {
                Self(v)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

define_integer_id!(MessageId, "Monotonic message identifier, unique per server.");
define_integer_id!(MemoryEntryId, "Server-assigned memory row identifier.");
define_integer_id!(AuditId, "Server-assigned audit row identifier.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_boundary_lengths() {
        assert!(SessionId::parse("a".repeat(7)).is_err());
        assert!(SessionId::parse("a".repeat(8)).is_ok());
        assert!(SessionId::parse("a".repeat(64)).is_ok());
        assert!(SessionId::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn session_id_rejects_bad_chars() {
        assert!(SessionId::parse("abc def!!").is_err());
        assert!(SessionId::parse("abc-def_123").is_ok());
    }

    #[test]
    fn token_id_roundtrip() {
        let t = TokenId::generate();
        let parsed: TokenId = t.as_str().parse().unwrap();
        assert_eq!(t, parsed);
    }

    #[test]
    fn token_id_rejects_bad_prefix() {
        assert!("not_a_token".parse::<TokenId>().is_err());
    }
}
