//! Shared application state for axum routers.

use crate::clock::SystemClock;
use crate::config::Config;
use crate::notify::NotificationBus;
use crate::rate_limit::RateLimitState;
use crate::tokens::TokenManager;
use blackboard_storage::{SessionLockRegistry, Storage};
use secrecy::ExposeSecret;
use std::sync::Arc;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub locks: Arc<SessionLockRegistry>,
    pub notify: Arc<NotificationBus>,
    pub tokens: Arc<TokenManager>,
    pub config: Arc<Config>,
    pub rate_limit: RateLimitState,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, blackboard_core::CoreError> {
        let storage = Arc::new(Storage::connect(&config.pool).await?);
        let tokens = Arc::new(TokenManager::new(
            storage.clone(),
            config.signing_key.expose_secret().to_vec(),
            config.encryption_key,
            Arc::new(SystemClock),
            3600,
        ));
        let config = Arc::new(config);
        Ok(Self {
            storage,
            locks: Arc::new(SessionLockRegistry::default()),
            notify: Arc::new(NotificationBus::new()),
            tokens,
            rate_limit: RateLimitState::new(config.clone()),
            config,
        })
    }
}

crate::impl_from_ref!(Arc<Storage>, storage);
crate::impl_from_ref!(Arc<SessionLockRegistry>, locks);
crate::impl_from_ref!(Arc<NotificationBus>, notify);
crate::impl_from_ref!(Arc<TokenManager>, tokens);
crate::impl_from_ref!(Arc<Config>, config);
crate::impl_from_ref!(RateLimitState, rate_limit);
