//! Session coordination lock typestate.
//!
//! Distinct from the in-process *session write lock* (§5, serializes message
//! appends — see `blackboard-storage::session_lock`): this is the
//! TTL+heartbeat coordination primitive the spec says agents may be handed
//! to coordinate work within a session. A lock expires if its absolute TTL
//! lapses or its heartbeat isn't renewed within the renewal interval; ADMIN
//! may force-unlock. Ported from the teacher's typestate lock so invalid
//! transitions (using a released lock) don't compile.

use crate::identity::{AgentId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Lock state marker trait, sealed so external crates can't implement new
/// states.
pub trait LockState: private::Sealed + Send + Sync {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LockState for Held {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LockState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
    impl Sealed for super::Released {}
}

/// Persisted lock data, independent of the compile-time state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockData {
    pub session_id: SessionId,
    pub holder: AgentId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub heartbeat_interval: Duration,
}

impl LockData {
    /// Expired either by absolute TTL or by a missed heartbeat renewal.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return true;
        }
        let heartbeat_interval = chrono::Duration::from_std(self.heartbeat_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        now >= self.last_heartbeat + heartbeat_interval
    }
}

/// A session coordination lock with compile-time state tracking.
#[derive(Debug, Clone)]
pub struct SessionLock<S: LockState> {
    data: LockData,
    _state: PhantomData<S>,
}

impl<S: LockState> SessionLock<S> {
    pub fn data(&self) -> &LockData {
        &self.data
    }

    pub fn session_id(&self) -> &SessionId {
        &self.data.session_id
    }

    pub fn holder(&self) -> &AgentId {
        &self.data.holder
    }
}

impl SessionLock<Held> {
    pub fn new(data: LockData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Renew the heartbeat, proving the holder is still alive. Does not
    /// extend the absolute TTL.
    pub fn heartbeat(mut self, now: DateTime<Utc>) -> Self {
        self.data.last_heartbeat = now;
        self
    }

    /// Extend the absolute expiry.
    pub fn extend(mut self, additional: Duration) -> Self {
        let additional = chrono::Duration::from_std(additional)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.data.expires_at += additional;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.data.is_expired(now)
    }

    /// Release the lock, consuming it.
    pub fn release(self) -> LockData {
        self.data
    }
}

/// A lock as loaded from storage, before its state is known at compile time.
#[derive(Debug, Clone)]
pub struct StoredLock {
    pub data: LockData,
    pub is_active: bool,
}

impl StoredLock {
    pub fn into_held(self, now: DateTime<Utc>) -> Result<SessionLock<Held>, LockStateError> {
        if !self.is_active {
            return Err(LockStateError::NotActive {
                session_id: self.data.session_id,
            });
        }
        if self.data.is_expired(now) {
            return Err(LockStateError::Expired {
                session_id: self.data.session_id,
                expired_at: self.data.expires_at,
            });
        }
        Ok(SessionLock::new(self.data))
    }
}

#[derive(Debug, Clone)]
pub enum LockStateError {
    NotActive { session_id: SessionId },
    Expired { session_id: SessionId, expired_at: DateTime<Utc> },
}

impl fmt::Display for LockStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStateError::NotActive { session_id } => {
                write!(f, "lock for session {} is not active", session_id)
            }
            LockStateError::Expired {
                session_id,
                expired_at,
            } => write!(f, "lock for session {} expired at {}", session_id, expired_at),
        }
    }
}
impl std::error::Error for LockStateError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_data(now: DateTime<Utc>) -> LockData {
        LockData {
            session_id: SessionId::parse("session1").unwrap(),
            holder: AgentId::parse("agent1").unwrap(),
            acquired_at: now,
            expires_at: now + chrono::Duration::minutes(5),
            last_heartbeat: now,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn heartbeat_missed_expires_lock() {
        let now = Utc::now();
        let data = make_data(now);
        let lock = SessionLock::<Held>::new(data);
        let later = now + chrono::Duration::seconds(31);
        assert!(lock.is_expired(later));
    }

    #[test]
    fn heartbeat_renews_within_interval() {
        let now = Utc::now();
        let data = make_data(now);
        let lock = SessionLock::<Held>::new(data).heartbeat(now + chrono::Duration::seconds(20));
        let later = now + chrono::Duration::seconds(40);
        assert!(!lock.is_expired(later));
    }

    #[test]
    fn ttl_expiry_overrides_heartbeat() {
        let now = Utc::now();
        let mut data = make_data(now);
        data.expires_at = now + chrono::Duration::seconds(10);
        data.heartbeat_interval = Duration::from_secs(3600);
        let lock = SessionLock::<Held>::new(data);
        assert!(lock.is_expired(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn stored_lock_rejects_inactive() {
        let now = Utc::now();
        let stored = StoredLock {
            data: make_data(now),
            is_active: false,
        };
        assert!(matches!(
            stored.into_held(now),
            Err(LockStateError::NotActive { .. })
        ));
    }
}
