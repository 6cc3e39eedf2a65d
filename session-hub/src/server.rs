//! WebSocket accept loop: binds an `axum` listener, upgrades `/ws`
//! connections, and hands each socket to [`router`]. `axum`'s `ws`
//! extractor stands in for a hand-rolled TCP accept loop.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use crate::error::HubError;
use crate::router::handle_socket;
use crate::state::HubHandle;

const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_BIND_PORT: u16 = 8081;
const DEFAULT_WS_PATH: &str = "/ws";
const DEFAULT_WEB_ORIGIN: &str = "http://localhost:3000";

/// Runtime configuration for the hub binary, read from environment
/// variables with sane defaults (`127.0.0.1`, `8081`, `/ws`). No config
/// file format is introduced — environment parameterization is enough.
pub struct HubConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub ws_path: String,
    pub web_origin: String,
}

impl HubConfig {
    pub fn from_env() -> Self {
        HubConfig {
            bind_host: std::env::var("SESSION_HUB_BIND_HOST").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string()),
            bind_port: std::env::var("SESSION_HUB_BIND_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BIND_PORT),
            ws_path: std::env::var("SESSION_HUB_WS_PATH").unwrap_or_else(|_| DEFAULT_WS_PATH.to_string()),
            web_origin: std::env::var("SESSION_HUB_WEB_ORIGIN").unwrap_or_else(|_| DEFAULT_WEB_ORIGIN.to_string()),
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr, HubError> {
        format!("{}:{}", self.bind_host, self.bind_port)
            .parse()
            .map_err(|source| HubError::InvalidBindAddress {
                host: self.bind_host.clone(),
                port: self.bind_port,
                source,
            })
    }
}

fn build_router(config: &HubConfig, hub: HubHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            config
                .web_origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_WEB_ORIGIN)),
        )
        .allow_methods([axum::http::Method::GET])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route(&config.ws_path, get(ws_upgrade))
        .with_state(hub)
        .layer(cors)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Binds and serves until the process is signaled to stop. Returns on
/// bind failure so `main` can surface a nonzero exit code.
pub async fn run(config: HubConfig) -> Result<(), HubError> {
    let hub = HubHandle::spawn();
    let addr = config.socket_addr()?;
    let app = build_router(&config, hub);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HubError::Bind { addr, source })?;
    tracing::info!(%addr, path = %config.ws_path, "session hub listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(HubError::Serve)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_falls_back_to_documented_defaults() {
        for key in [
            "SESSION_HUB_BIND_HOST",
            "SESSION_HUB_BIND_PORT",
            "SESSION_HUB_WS_PATH",
            "SESSION_HUB_WEB_ORIGIN",
        ] {
            std::env::remove_var(key);
        }
        let config = HubConfig::from_env();
        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.bind_port, 8081);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn invalid_bind_host_is_rejected() {
        let config = HubConfig {
            bind_host: "not an address".to_string(),
            bind_port: 8081,
            ws_path: "/ws".to_string(),
            web_origin: DEFAULT_WEB_ORIGIN.to_string(),
        };
        assert!(config.socket_addr().is_err());
    }
}
