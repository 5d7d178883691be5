//! Capability-token issuance and protected-token resolution.
//!
//! Two-layer credential model: a signed, time-bounded *capability token*
//! carries `{agent_id, agent_type, permissions, iat, exp, iss, aud}`; it
//! never crosses the tool boundary directly. Clients only ever see an opaque
//! *protected token* (`sct_<uuid>`) whose server-side record holds the
//! capability token encrypted at rest. `TokenManager` is constructed
//! per-request from [`crate::config::Config`] rather than held as a process
//! singleton, so its keys and clock never leak across requests or tests.

use crate::clock::JwtClock;
use crate::crypto;
use blackboard_core::{
    AgentId, AgentType, CapabilityClaims, CoreError, CoreResult, Permission, TokenId,
};
use blackboard_storage::Storage;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;

/// Clock-skew tolerance applied to `exp`/`iat` checks, per §4.2.
pub const CLOCK_SKEW_SECS: i64 = 300;

const ISSUER: &str = "blackboard-server";
const AUDIENCE: &str = "blackboard-agents";

/// Permissions an agent type may ever be granted, intersected against what
/// it requests at `issue` time. Only the `admin` agent type may hold the
/// `admin` permission; every other type may hold `read`/`write`.
fn allowed_permissions_for(agent_type: &AgentType) -> &'static [Permission] {
    if agent_type.as_str() == "admin" {
        &[Permission::Read, Permission::Write, Permission::Admin]
    } else {
        &[Permission::Read, Permission::Write]
    }
}

pub struct TokenManager {
    storage: Arc<Storage>,
    signing_key: Vec<u8>,
    encryption_key: [u8; 32],
    clock: Arc<dyn JwtClock>,
    expiration_secs: i64,
}

impl TokenManager {
    pub fn new(
        storage: Arc<Storage>,
        signing_key: Vec<u8>,
        encryption_key: [u8; 32],
        clock: Arc<dyn JwtClock>,
        expiration_secs: i64,
    ) -> Self {
        Self {
            storage,
            signing_key,
            encryption_key,
            clock,
            expiration_secs,
        }
    }

    /// Intersects `requested` against the agent type's allowed set,
    /// defaulting to `{read}` if nothing survives, then mints and stores a
    /// new protected token.
    pub async fn issue(
        &self,
        agent_id: AgentId,
        agent_type: AgentType,
        requested: &[Permission],
    ) -> CoreResult<(TokenId, Vec<Permission>, DateTime<Utc>)> {
        let allowed = allowed_permissions_for(&agent_type);
        let mut granted: Vec<Permission> = requested
            .iter()
            .copied()
            .filter(|p| allowed.contains(p))
            .collect();
        granted.dedup();
        if granted.is_empty() {
            granted.push(Permission::Read);
        }

        let now = self.clock.now_epoch_secs();
        let exp = now + self.expiration_secs;
        let claims = CapabilityClaims {
            agent_id: agent_id.clone(),
            agent_type,
            permissions: granted.clone(),
            iat: now,
            exp,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        };

        let jwt = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.signing_key),
        )
        .map_err(|e| CoreError::internal(format!("failed to sign capability token: {e}")))?;

        let encrypted = crypto::encrypt(&self.encryption_key, jwt.as_bytes())?;
        let token_id = TokenId::generate();
        let expires_at = epoch_to_datetime(exp)?;

        self.storage
            .insert_protected_token(&token_id, &encrypted, &agent_id, expires_at)
            .await?;

        Ok((token_id, granted, expires_at))
    }

    /// Resolves a protected token to its capability claims. Rejects a
    /// missing record, an expired record (checked against the stored
    /// `expires_at` before touching the JWT at all), a decryption failure,
    /// or a capability token whose own `exp`/`iss`/`aud` fail validation.
    pub async fn resolve(&self, protected_token: &str) -> CoreResult<CapabilityClaims> {
        let token_id: TokenId = protected_token
            .parse()
            .map_err(|_| CoreError::invalid_token("malformed protected token"))?;

        let record = self.storage.get_protected_token(&token_id).await?;

        let now = self.clock.now_epoch_secs();
        if record.expires_at.timestamp() + CLOCK_SKEW_SECS <= now {
            return Err(CoreError::token_expired("protected token expired"));
        }

        let plaintext = crypto::decrypt(&self.encryption_key, &record.encrypted_payload)?;
        let jwt = String::from_utf8(plaintext)
            .map_err(|_| CoreError::invalid_token("corrupt capability token payload"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);

        let data = decode::<CapabilityClaims>(
            &jwt,
            &DecodingKey::from_secret(&self.signing_key),
            &validation,
        )
        .map_err(|e| CoreError::invalid_token(format!("capability token invalid: {e}")))?;
        let claims = data.claims;

        if now > claims.exp + CLOCK_SKEW_SECS {
            return Err(CoreError::token_expired("capability token expired"));
        }
        if now < claims.iat - CLOCK_SKEW_SECS {
            return Err(CoreError::invalid_token("capability token not yet valid"));
        }

        Ok(claims)
    }

    /// Issues a replacement token for the holder of `protected_token`, then
    /// deletes the old record. A failure to delete does not invalidate the
    /// new token; the old one simply expires naturally.
    pub async fn refresh(
        &self,
        protected_token: &str,
    ) -> CoreResult<(TokenId, Vec<Permission>, DateTime<Utc>)> {
        let claims = self.resolve(protected_token).await?;
        let new_token = self
            .issue(claims.agent_id, claims.agent_type, &claims.permissions)
            .await?;

        if let Ok(old_token_id) = protected_token.parse::<TokenId>() {
            if let Err(e) = self.storage.delete_protected_token(&old_token_id).await {
                tracing::debug!(error = %e, "failed to delete old protected token on refresh");
            }
        }

        Ok(new_token)
    }

    /// Periodic removal of expired protected-token rows.
    pub async fn sweep(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        self.storage.sweep_expired_tokens(now).await
    }
}

fn epoch_to_datetime(epoch_secs: i64) -> CoreResult<DateTime<Utc>> {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .ok_or_else(|| CoreError::internal("invalid expiry timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use blackboard_storage::PoolConfig;

    async fn manager(clock_secs: i64) -> TokenManager {
        let storage = Storage::connect(&PoolConfig {
            database_url: "sqlite::memory:".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        TokenManager::new(
            Arc::new(storage),
            b"test-signing-key".to_vec(),
            [9u8; 32],
            Arc::new(FixedClock(clock_secs)),
            3600,
        )
    }

    #[tokio::test]
    async fn issue_then_resolve_roundtrips() {
        let mgr = manager(1_700_000_000).await;
        let agent = AgentId::parse("agent-a").unwrap();
        let agent_type = AgentType::new("claude");
        let (token_id, granted, _expires) = mgr
            .issue(agent.clone(), agent_type.clone(), &[Permission::Read, Permission::Write])
            .await
            .unwrap();

        assert_eq!(granted, vec![Permission::Read, Permission::Write]);

        let claims = mgr.resolve(token_id.as_str()).await.unwrap();
        assert_eq!(claims.agent_id, agent);
        assert_eq!(claims.permissions, granted);
    }

    #[tokio::test]
    async fn non_admin_agent_type_cannot_obtain_admin_permission() {
        let mgr = manager(1_700_000_000).await;
        let (_, granted, _) = mgr
            .issue(
                AgentId::parse("agent-a").unwrap(),
                AgentType::new("claude"),
                &[Permission::Admin],
            )
            .await
            .unwrap();
        // admin stripped, nothing survives the intersection, defaults to read
        assert_eq!(granted, vec![Permission::Read]);
    }

    #[tokio::test]
    async fn admin_agent_type_can_obtain_admin_permission() {
        let mgr = manager(1_700_000_000).await;
        let (_, granted, _) = mgr
            .issue(
                AgentId::parse("root").unwrap(),
                AgentType::new("admin"),
                &[Permission::Admin],
            )
            .await
            .unwrap();
        assert_eq!(granted, vec![Permission::Admin]);
    }

    #[tokio::test]
    async fn expired_protected_token_rejected() {
        let mgr = manager(1_700_000_000).await;
        let (token_id, _, _) = mgr
            .issue(AgentId::parse("agent-a").unwrap(), AgentType::new("claude"), &[Permission::Read])
            .await
            .unwrap();

        let later = manager(1_700_000_000 + 3600 + CLOCK_SKEW_SECS + 1).await;
        // reuse the same keys/storage is impractical across two `manager()` instances
        // since each gets its own in-memory db; instead fast-forward the same manager's clock.
        let _ = later; // keep grounded in the skew constant without a second db
        let mgr_expired = TokenManager::new(
            mgr.storage.clone(),
            mgr.signing_key.clone(),
            mgr.encryption_key,
            Arc::new(FixedClock(1_700_000_000 + 3600 + CLOCK_SKEW_SECS + 1)),
            3600,
        );
        let err = mgr_expired.resolve(token_id.as_str()).await.unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::TokenExpired);
    }

    #[tokio::test]
    async fn clock_skew_within_tolerance_still_resolves() {
        let mgr = manager(1_700_000_000).await;
        let (token_id, _, _) = mgr
            .issue(AgentId::parse("agent-a").unwrap(), AgentType::new("claude"), &[Permission::Read])
            .await
            .unwrap();

        let mgr_skewed = TokenManager::new(
            mgr.storage.clone(),
            mgr.signing_key.clone(),
            mgr.encryption_key,
            Arc::new(FixedClock(1_700_000_000 + 3600 + CLOCK_SKEW_SECS - 1)),
            3600,
        );
        assert!(mgr_skewed.resolve(token_id.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_invalidates_old_token() {
        let mgr = manager(1_700_000_000).await;
        let (old_id, _, _) = mgr
            .issue(AgentId::parse("agent-a").unwrap(), AgentType::new("claude"), &[Permission::Read])
            .await
            .unwrap();

        let (new_id, _, _) = mgr.refresh(old_id.as_str()).await.unwrap();
        assert_ne!(old_id, new_id);

        let err = mgr.resolve(old_id.as_str()).await.unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::InvalidToken);
        assert!(mgr.resolve(new_id.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn resolve_rejects_malformed_token() {
        let mgr = manager(1_700_000_000).await;
        let err = mgr.resolve("not-a-protected-token").await.unwrap_err();
        assert_eq!(err.kind, blackboard_core::ErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn sweep_removes_expired_tokens() {
        let mgr = manager(1_700_000_000).await;
        mgr.issue(AgentId::parse("agent-a").unwrap(), AgentType::new("claude"), &[Permission::Read])
            .await
            .unwrap();
        let removed = mgr.sweep(Utc::now() + chrono::Duration::seconds(7200)).await.unwrap();
        assert_eq!(removed, 1);
    }
}
