//! Blackboard Storage - SQLite-backed persistence for sessions, messages,
//! agent memory, audit records and protected tokens.

mod audit;
mod memory;
mod messages;
mod pool;
mod search;
mod session_lock;
mod sessions;
mod tokens;

pub use messages::{ReaderContext, MESSAGES_LIMIT_CAP};
pub use pool::{PoolConfig, Storage};
pub use search::SearchHit;
pub use session_lock::SessionLockRegistry;
pub use sessions::SESSION_PURPOSE_MAX_LEN;
