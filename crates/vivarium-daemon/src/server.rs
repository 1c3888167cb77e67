//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::state::AppState;

/// Build the router for all API routes
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.daemon.max_body_bytes;

    Router::new()
        .route("/", get(api::homepage).post(api::collect))
        .route("/fw", get(api::firmware_list))
        .route("/fw/{name}", get(api::firmware))
        .route("/nodes", get(api::node_list))
        .route("/nodes/{id}", post(api::name_node))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run<F>(state: Arc<AppState>, bind: &str, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
