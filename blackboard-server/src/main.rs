mod auth;
mod clock;
mod config;
mod crypto;
mod dispatch;
mod error;
#[macro_use]
mod macros;
mod notify;
mod rate_limit;
mod routes;
mod state;
mod tokens;

use config::Config;
use state::AppState;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load configuration");
        std::process::exit(1);
    });
    let http_port = config.http_port;

    let state = AppState::new(config)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to initialize application state");
            std::process::exit(1);
        });

    spawn_token_sweeper(state.clone());
    spawn_memory_sweeper(state.clone());

    let app = routes::router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], http_port));
    tracing::info!(%addr, "starting blackboard-server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(%addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        });

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
}

/// Periodic removal of expired protected-token rows (§4.2 `sweep()`).
fn spawn_token_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match state.tokens.sweep(chrono::Utc::now()).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "swept expired protected tokens");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "token sweep failed"),
            }
        }
    });
}

/// Periodic removal of expired memory rows (§4.5 "background sweep").
fn spawn_memory_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            match state.storage.sweep_expired_memory(chrono::Utc::now()).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "swept expired memory entries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "memory sweep failed"),
            }
        }
    });
}
