//! WebSocket upgrade route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws - Upgrade to the snapshot protocol.
async fn ws_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(anonymous = auth.is_anonymous(), "WebSocket upgrade");
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.pool.clone(), state.conn_manager.clone())
    })
}
