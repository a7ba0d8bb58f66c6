//! HTTP control API
//!
//! A small authenticated API for other programs on the host: push a
//! notification through a configured channel, or add and remove processes
//! from the watch list at runtime.
//!
//! ## Endpoints
//!
//! - `GET /ping` - Liveness check, answers `pong`
//! - `POST /notify` - `{channel, message, severity?}`
//! - `POST /process/watch` - `{channel, pid, name?, severity?}`
//! - `POST /process/unwatch` - `{channel, pid}`
//!
//! Every route requires the shared secret in the `X-Api-Key` header.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{NotifyRequest, StatusResponse, UnwatchProcessRequest, WatchProcessRequest};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::engine::Shutdown;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Shared secret expected in the `X-Api-Key` header
    pub api_key: String,
}

impl From<&ServerConfig> for ApiConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            bind_addr: SocketAddr::new(server.address, server.port),
            api_key: server.api_key.clone(),
        }
    }
}

pub fn router(api_key: String, state: ApiState) -> Router {
    Router::new()
        .route("/ping", get(routes::health::ping))
        .route("/notify", post(routes::notify::notify))
        .route("/process/watch", post(routes::process::watch))
        .route("/process/unwatch", post(routes::process::unwatch))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            api_key,
            middleware::auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// Binds the listener, serves in a background task until `shutdown` fires
/// and returns the bound address.
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    shutdown: Shutdown,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(config.api_key, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await });
        if let Err(e) = server.await {
            error!("API server error: {}", e);
        }
        info!("API server stopped");
    });

    Ok(addr)
}
