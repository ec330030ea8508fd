//! Optional HTTP health endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use yomiage_voice::SessionManager;

/// Health check handler.
///
/// Returns `200 OK` with the bot version, the number of connected voice
/// sessions and the auto-join flag.
async fn health(State(sessions): State<Arc<SessionManager>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions.active_sessions(),
        "autoJoin": sessions.auto_join(),
    }))
}

pub fn app(sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(sessions)
}

/// Serves [`app`] on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health endpoint listening");
    axum::serve(listener, app(sessions))
        .with_graceful_shutdown(shutdown)
        .await
}
