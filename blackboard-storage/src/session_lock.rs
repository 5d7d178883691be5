//! Per-session write lock.
//!
//! Writes to messages or session metadata for session `S` acquire this
//! in-process lock before touching the database, so concurrent agents never
//! race on write ordering for the same session. Reads never acquire it.
//! Distinct from [`blackboard_core::SessionLock`], the TTL+heartbeat
//! coordination primitive exposed to agents — this one is purely internal
//! plumbing and never visible over the wire.

use blackboard_core::SessionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry of per-session write locks. One process-wide instance is shared
/// by the whole server; entries are created lazily and never removed (a
/// session id space is bounded by how many sessions actually exist, so this
/// doesn't grow without bound in practice).
#[derive(Default)]
pub struct SessionLockRegistry {
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the write lock for `session_id`. The returned guard releases
    /// the lock on drop, including on early return or panic unwinding.
    pub async fn acquire(&self, session_id: &SessionId) -> tokio::sync::OwnedMutexGuard<()> {
        self.entry(session_id).lock_owned().await
    }
}
