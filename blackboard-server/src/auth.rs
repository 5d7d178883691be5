//! Auth/permission core: turns a resolved capability token into an access
//! tier and a storage-layer [`ReaderContext`].
//!
//! One of four tiers is derived from the claims' permission set (§4.3):
//! `ADMIN` (has `admin`), `AGENT` (has `write`), `READ_ONLY` (has `read`
//! only), `ANONYMOUS` (none of the above — unauthenticated callers never
//! reach this far since they hold no capability claims at all, but an empty
//! permission set degrades to this tier rather than panicking).

use blackboard_core::{AccessTier, AgentId, AgentType, CapabilityClaims};
use blackboard_storage::ReaderContext;

/// The authenticated identity and derived permission tier for one request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub tier: AccessTier,
}

impl AuthContext {
    pub fn from_claims(claims: CapabilityClaims) -> Self {
        let tier = AccessTier::from_permissions(&claims.permissions);
        Self {
            agent_id: claims.agent_id,
            agent_type: claims.agent_type,
            tier,
        }
    }

    pub fn reader(&self) -> ReaderContext {
        ReaderContext {
            agent_id: self.agent_id.clone(),
            agent_type: self.agent_type.clone(),
            tier: self.tier,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.tier.is_admin()
    }

    pub fn can_write(&self) -> bool {
        self.tier.can_write()
    }

    pub fn can_read(&self) -> bool {
        self.tier.can_read()
    }
}
