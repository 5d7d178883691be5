//! Per-caller rate limiting (§5), adapted from the teacher's
//! `middleware::auth::rate_limit_middleware` (IP/tenant-keyed `governor`
//! limiters behind a `DashMap`), rekeyed to this server's bearer-token
//! identity instead of a tenant id.
//!
//! Runs as an axum middleware layer ahead of route extraction, so the key is
//! derived straight from the raw `Authorization` header rather than a
//! resolved [`crate::auth::AuthContext`] (resolving the token here would
//! mean a second token lookup on every request).

use crate::config::Config;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use blackboard_core::CoreError;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
enum RateLimitKey {
    Ip(IpAddr),
    Token(String),
}

#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<Config>,
    limiters: Arc<DashMap<RateLimitKey, Arc<DirectRateLimiter>>>,
}

impl RateLimitState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            limiters: Arc::new(DashMap::new()),
        }
    }

    fn limiter_for(&self, key: &RateLimitKey) -> Arc<DirectRateLimiter> {
        self.limiters
            .entry(key.clone())
            .or_insert_with(|| {
                let quota = Quota::per_minute(
                    NonZeroU32::new(self.config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN),
                );
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }
}

struct RateLimitedResponse {
    retry_after: u64,
}

impl IntoResponse for RateLimitedResponse {
    fn into_response(self) -> Response {
        let err = crate::error::ApiError::from(CoreError::rate_limited("too many requests"));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(err)).into_response();
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

fn extract_client_ip(request: &Request<Body>, fallback: SocketAddr) -> IpAddr {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(ip) = forwarded.split(',').next().and_then(|s| s.trim().parse().ok()) {
            return ip;
        }
    }
    if let Some(real_ip) = request.headers().get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }
    fallback.ip()
}

fn rate_limit_key(request: &Request<Body>, addr: SocketAddr) -> RateLimitKey {
    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match bearer {
        Some(token) => RateLimitKey::Token(token.to_string()),
        None => RateLimitKey::Ip(extract_client_ip(request, addr)),
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.rate_limit_enabled {
        return next.run(request).await;
    }
    let key = rate_limit_key(&request, addr);
    let limiter = state.limiter_for(&key);
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            RateLimitedResponse { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(per_minute: u32, enabled: bool) -> Arc<Config> {
        Arc::new(Config {
            api_key: "k".to_string(),
            signing_key: secrecy::SecretBox::new(Box::from(b"s".as_slice())),
            encryption_key: [0u8; 32],
            pool: blackboard_storage::PoolConfig::default(),
            http_port: 0,
            ws_port: 0,
            cors_origins: vec![],
            rate_limit_enabled: enabled,
            rate_limit_per_minute: per_minute,
            rate_limit_window: std::time::Duration::from_secs(60),
            broadcast_bridge_timeout: std::time::Duration::from_secs(2),
        })
    }

    #[test]
    fn distinct_keys_get_independent_budgets() {
        let state = RateLimitState::new(test_config(1, true));
        let a = RateLimitKey::Ip("127.0.0.1".parse().unwrap());
        let b = RateLimitKey::Ip("127.0.0.2".parse().unwrap());
        assert!(state.limiter_for(&a).check().is_ok());
        assert!(state.limiter_for(&a).check().is_err());
        assert!(state.limiter_for(&b).check().is_ok());
    }
}
