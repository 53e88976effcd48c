use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::connection;
use crate::hub::RelayHub;

#[derive(Serialize)]
struct HealthResponse {
    goroutines_or_tasks: usize,
    connections: usize,
}

async fn health_handler(State(hub): State<Arc<RelayHub>>) -> Json<HealthResponse> {
    let connections = hub.connection_count().await;
    Json(HealthResponse {
        // Two tasks (read + write) per open connection, plus the
        // sweep loop.
        goroutines_or_tasks: connections * 2 + 1,
        connections,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<RelayHub>>,
) -> Response {
    info!("websocket upgrade request received");
    ws.on_upgrade(move |socket| connection::handle_socket(hub, socket))
}

async fn not_found() -> impl IntoResponse {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

pub fn build_router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .fallback(not_found)
        .with_state(hub)
}
