//! HTTP API Server
//!
//! Starts and manages the axum-based HTTP server.

use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tsp_core::{CredentialStore, Provisioner};

use crate::middleware::auth::auth_middleware;
use crate::routes::{public_routes, routes};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub store: Arc<dyn CredentialStore>,
    /// Required `X-API-Key` value; `None` disables the check
    pub api_key: Option<String>,
}

/// Build the full router with auth and tracing layers
pub fn router(state: AppState) -> Router {
    let protected = routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    Router::new()
        .merge(public_routes())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP API server, returning once `shutdown` is cancelled
pub async fn start_server(
    host: &str,
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if state.api_key.is_none() {
        warn!("API key not configured; the provisioning API is unauthenticated");
    }

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP API stopped");
    Ok(())
}
