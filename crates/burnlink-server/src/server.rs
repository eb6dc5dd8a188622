use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    handlers::{create_secret, encryption_key, get_secret, health, verify_secret},
    store::Store,
    AppState,
};

/// Where the secret's plaintext is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecryptionMode {
    /// The server stores the client's ciphertext blob untouched and never
    /// sees a key.
    #[default]
    ClientSide,
    /// The client sends the key with the ciphertext; the server validates and
    /// decrypts before storing the plaintext.
    ServerSide,
}

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum wire length of `content` ($BURNLINK_MAX_SECRET_LENGTH).
    pub max_secret_length: usize,
    /// Maximum number of unread secrets held at once ($BURNLINK_MAX_UNREAD).
    pub max_unread: usize,
    /// Period of the expiry sweep ($BURNLINK_SWEEP_INTERVAL, e.g. `60s`, `5m`).
    pub sweep_interval: Duration,
    pub mode: DecryptionMode,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNLINK_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("BURNLINK_PORT").unwrap_or(8080),
            max_secret_length: env_parse("BURNLINK_MAX_SECRET_LENGTH").unwrap_or(10_000),
            max_unread: env_parse("BURNLINK_MAX_UNREAD").unwrap_or(1000),
            sweep_interval: std::env::var("BURNLINK_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| humantime::parse_duration(&v).ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            mode: match std::env::var("BURNLINK_SERVER_SIDE_DECRYPT") {
                Ok(v) if v != "false" && v != "0" => DecryptionMode::ServerSide,
                _ => DecryptionMode::ClientSide,
            },
            cors_origins: std::env::var("BURNLINK_CORS_ORIGINS").ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Routes for the secret API, without CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/encryption-key", get(encryption_key))
        .route("/secrets", post(create_secret))
        .route("/secrets/{id}", get(get_secret))
        .route("/secrets/{id}/verify", post(verify_secret))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    if cfg.max_unread == 0 {
        anyhow::bail!("max unread secrets must be at least 1");
    }
    if cfg.max_secret_length == 0 {
        anyhow::bail!("max secret length must be at least 1");
    }

    let store = Store::new(cfg.max_unread);
    let sweeper = store.spawn_sweep(cfg.sweep_interval);

    info!(
        max_unread = cfg.max_unread,
        max_secret_length = cfg.max_secret_length,
        sweep_interval = ?cfg.sweep_interval,
        mode = ?cfg.mode,
        "secret store ready"
    );
    if cfg.mode == DecryptionMode::ServerSide {
        warn!("server-side decryption enabled: plaintext and keys pass through this process");
    }

    let state = AppState {
        store,
        max_secret_length: cfg.max_secret_length,
        mode: cfg.mode,
    };

    let app = router(state).layer(build_cors(cfg.cors_origins.as_deref()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;
    info!(%addr, "burnlink server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    let swept = sweeper.stop().await;
    info!(swept, "server stopped; unread secrets discarded");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_client_side() {
        assert_eq!(DecryptionMode::default(), DecryptionMode::ClientSide);
    }

    #[tokio::test]
    async fn run_rejects_zero_capacity() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_secret_length: 100,
            max_unread: 0,
            sweep_interval: Duration::from_secs(60),
            mode: DecryptionMode::ClientSide,
            cors_origins: None,
        };
        assert!(run(cfg).await.is_err());
    }

    #[test]
    fn sweep_interval_reads_humantime_env() {
        std::env::set_var("BURNLINK_SWEEP_INTERVAL", "5m");
        let cfg = ServerConfig::default();
        std::env::remove_var("BURNLINK_SWEEP_INTERVAL");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));

        std::env::set_var("BURNLINK_SWEEP_INTERVAL", "whenever");
        let cfg = ServerConfig::default();
        std::env::remove_var("BURNLINK_SWEEP_INTERVAL");
        assert_eq!(cfg.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }
}
