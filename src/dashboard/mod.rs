// Console HTTP surface
// Live WebSocket feed plus JSON endpoints over the pipeline

pub mod api;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::AppContext;

/// Build the application router
pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ws", get(websocket::handler))
        .route("/api/snapshot", get(api::snapshot))
        .route("/api/collect", post(api::collect))
        .route("/api/trends", get(api::trends))
        .route("/api/success-rates", get(api::success_rates))
        .route("/api/history/:name", get(api::history))
        .route("/api/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, context: Arc<AppContext>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Console listening on http://{}", addr);

    axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Console server stopped");
    Ok(())
}
