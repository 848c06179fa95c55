//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use bnb4_core::{Converter, ConverterController, ConverterEnvironment};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Maximum number of RPC requests handled at once.
const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Application state shared across handlers.
pub struct AppState {
    /// Form, job supervision and settings
    pub controller: Arc<ConverterController>,
    /// Python environment the helper runs in
    pub environment: ConverterEnvironment,
    /// Signalled by the `shutdown` method
    pub shutdown: Notify,
}

impl AppState {
    pub fn new(converter: Converter) -> Self {
        Self {
            controller: converter.controller,
            environment: converter.environment,
            shutdown: Notify::new(),
        }
    }
}

/// Build the router serving `/health` and `/rpc`.
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(cors)
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0)
/// and the shared state.
pub async fn start_server(
    converter: Converter,
    host: &str,
    port: u16,
) -> anyhow::Result<(SocketAddr, Arc<AppState>)> {
    let state = Arc::new(AppState::new(converter));
    let app = router(state.clone());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnb4_core::ConverterBuilder;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let converter = ConverterBuilder::new(temp_dir.path().join("data"))
            .settings_path(temp_dir.path().join("gui_settings.json"))
            .build()
            .unwrap();

        let (addr, state) = start_server(converter, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
        assert!(!state.controller.is_running());
    }
}
