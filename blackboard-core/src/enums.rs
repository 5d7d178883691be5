//! Enum types shared across the blackboard crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message visibility tier. Determines who may read a given message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    AgentOnly,
    AdminOnly,
}

impl Visibility {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::AgentOnly => "agent_only",
            Visibility::AdminOnly => "admin_only",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityParseError(pub String);

impl fmt::Display for VisibilityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid visibility: {}", self.0)
    }
}
impl std::error::Error for VisibilityParseError {}

impl FromStr for Visibility {
    type Err = VisibilityParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "agent_only" => Ok(Visibility::AgentOnly),
            "admin_only" => Ok(Visibility::AdminOnly),
            other => Err(VisibilityParseError(other.to_string())),
        }
    }
}

/// Capability-token permission. Intersected against an agent type's allowed
/// set at issuance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Permission {
    type Err = VisibilityParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(VisibilityParseError(other.to_string())),
        }
    }
}

/// Access tier derived from a resolved capability token's permission set.
///
/// Ordered from least to most privileged; the `Ord` impl is used only for
/// readability in logs, never for permission decisions (those go through
/// explicit tier checks, not comparisons).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessTier {
    Anonymous,
    ReadOnly,
    Agent,
    Admin,
}

impl AccessTier {
    /// Derive the tier from a permission set.
    pub fn from_permissions(permissions: &[Permission]) -> Self {
        if permissions.contains(&Permission::Admin) {
            AccessTier::Admin
        } else if permissions.contains(&Permission::Write) {
            AccessTier::Agent
        } else if permissions.contains(&Permission::Read) {
            AccessTier::ReadOnly
        } else {
            AccessTier::Anonymous
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AccessTier::Admin)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, AccessTier::Agent | AccessTier::Admin)
    }

    pub fn can_read(&self) -> bool {
        !matches!(self, AccessTier::Anonymous)
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessTier::Anonymous => "ANONYMOUS",
            AccessTier::ReadOnly => "READ_ONLY",
            AccessTier::Agent => "AGENT",
            AccessTier::Admin => "ADMIN",
        };
        write!(f, "{}", s)
    }
}

/// Scope of a `list_memory` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Global,
    Session,
    #[default]
    All,
}

impl FromStr for MemoryScope {
    type Err = VisibilityParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(MemoryScope::Global),
            "session" => Ok(MemoryScope::Session),
            "all" => Ok(MemoryScope::All),
            other => Err(VisibilityParseError(other.to_string())),
        }
    }
}

/// What text a `search_context` call matches against in addition to content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    Content,
    Sender,
    Metadata,
    All,
}

impl FromStr for SearchScope {
    type Err = VisibilityParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(SearchScope::Content),
            "sender" => Ok(SearchScope::Sender),
            "metadata" => Ok(SearchScope::Metadata),
            "all" => Ok(SearchScope::All),
            other => Err(VisibilityParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_roundtrip() {
        for v in [
            Visibility::Public,
            Visibility::Private,
            Visibility::AgentOnly,
            Visibility::AdminOnly,
        ] {
            let s = v.as_db_str();
            assert_eq!(s.parse::<Visibility>().unwrap(), v);
        }
    }

    #[test]
    fn access_tier_from_permissions() {
        assert_eq!(AccessTier::from_permissions(&[]), AccessTier::Anonymous);
        assert_eq!(
            AccessTier::from_permissions(&[Permission::Read]),
            AccessTier::ReadOnly
        );
        assert_eq!(
            AccessTier::from_permissions(&[Permission::Read, Permission::Write]),
            AccessTier::Agent
        );
        assert_eq!(
            AccessTier::from_permissions(&[Permission::Admin]),
            AccessTier::Admin
        );
    }
}
