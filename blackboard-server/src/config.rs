//! Server configuration, loaded from the environment.
//!
//! Mirrors `caliber-api::config::ApiConfig`'s `from_env()` pattern, extended
//! with the secrets §6 requires at startup: an API key that gates
//! `authenticate_agent`, a signing key for capability tokens, and an
//! encryption key for protected tokens. All three are required; there is no
//! implicit random fallback.

use blackboard_storage::PoolConfig;
use secrecy::{ExposeSecret, SecretBox};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(String),
    #[error("{field} must decode to exactly {expected} bytes, got {actual}")]
    BadKeyLength {
        field: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone)]
pub struct Config {
    /// Gates `authenticate_agent`.
    pub api_key: String,
    /// HMAC signing key for capability-token JWTs. Wrapped so a stray
    /// `{:?}` on `Config` can never leak it into logs.
    pub signing_key: SecretBox<[u8]>,
    /// 32-byte AES-256-GCM key for protected-token encryption at rest.
    pub encryption_key: [u8; 32],

    pub pool: PoolConfig,

    pub http_port: u16,
    pub ws_port: u16,

    pub cors_origins: Vec<String>,

    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub rate_limit_window: Duration,

    /// `POST /broadcast/{session_id}` internal bridge timeout.
    pub broadcast_bridge_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required_env("BLACKBOARD_API_KEY")?;
        let signing_key = SecretBox::new(required_env("BLACKBOARD_SIGNING_KEY")?.into_bytes().into());

        let encryption_key_str = required_env("BLACKBOARD_ENCRYPTION_KEY")?;
        let encryption_key_bytes = decode_key(&encryption_key_str);
        if encryption_key_bytes.len() != 32 {
            return Err(ConfigError::BadKeyLength {
                field: "BLACKBOARD_ENCRYPTION_KEY".to_string(),
                expected: 32,
                actual: encryption_key_bytes.len(),
            });
        }
        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&encryption_key_bytes);

        let http_port = env_parse("BLACKBOARD_HTTP_PORT").unwrap_or(8080);
        let ws_port = env_parse("BLACKBOARD_WS_PORT").unwrap_or(8081);

        let cors_origins = std::env::var("BLACKBOARD_CORS_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
            .unwrap_or_default();

        let rate_limit_enabled = std::env::var("BLACKBOARD_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        let rate_limit_per_minute = env_parse("BLACKBOARD_RATE_LIMIT_PER_MINUTE").unwrap_or(600);

        Ok(Self {
            api_key,
            signing_key,
            encryption_key,
            pool: PoolConfig::from_env(),
            http_port,
            ws_port,
            cors_origins,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_window: Duration::from_secs(60),
            broadcast_bridge_timeout: Duration::from_secs(2),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("signing_key", &format!("[REDACTED, {} bytes]", self.signing_key.expose_secret().len()))
            .field("encryption_key", &"[REDACTED]")
            .field("pool", &self.pool)
            .field("http_port", &self.http_port)
            .field("ws_port", &self.ws_port)
            .field("cors_origins", &self.cors_origins)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("broadcast_bridge_timeout", &self.broadcast_bridge_timeout)
            .finish()
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingRequired(name.to_string()))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Accepts either raw 32-byte-when-utf8 strings or hex-encoded keys,
/// whichever the deployer finds easier to generate (`openssl rand -hex 32`
/// vs. a raw passphrase).
fn decode_key(s: &str) -> Vec<u8> {
    if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        (0..s.len())
            .step_by(2)
            .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    } else {
        s.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_key_accepts_hex() {
        let hex = "00".repeat(32);
        assert_eq!(decode_key(&hex), vec![0u8; 32]);
    }

    #[test]
    fn decode_key_accepts_raw_32_byte_string() {
        let raw = "a".repeat(32);
        assert_eq!(decode_key(&raw), raw.into_bytes());
    }
}
