//! WebSocket handler for live snapshots.
//!
//! Clients subscribe to a collection query; each subscription gets its full
//! result set immediately and again after every batch that touches it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use schoolsync_engine::SnapshotQuery;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::db;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// Registers the connection, forwards queued messages to the socket from a
/// separate task, and drops every subscription on disconnect.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    pool: PgPool,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                for reply in process_message(&text, &pool, &conn_manager, &conn_id).await {
                    conn_manager.send_to(&conn_id, reply);
                }
            }
            Ok(Message::Binary(_)) => {
                conn_manager.send_to(
                    &conn_id,
                    ServerMessage::error("binary frames are not supported", None),
                );
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::debug!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process one client message into the replies it produces, in order.
async fn process_message(
    text: &str,
    pool: &PgPool,
    conn_manager: &ConnectionManager,
    conn_id: &str,
) -> Vec<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return vec![ServerMessage::error(
                format!("Invalid message format: {}", e),
                None,
            )];
        }
    };

    match client_msg {
        ClientMessage::Subscribe {
            collection,
            filter,
            request_id,
        } => {
            let query = SnapshotQuery { collection, filter };
            let Some(subscription_id) = conn_manager.subscribe(conn_id, query.clone()) else {
                return vec![ServerMessage::error("connection closed", request_id)];
            };

            let documents =
                match db::list_documents(pool, collection, query.filter.as_ref()).await {
                    Ok(documents) => documents,
                    Err(e) => {
                        conn_manager.unsubscribe(conn_id, &subscription_id);
                        return vec![ServerMessage::error(e.to_string(), request_id)];
                    }
                };

            vec![
                ServerMessage::Subscribed {
                    subscription_id: subscription_id.clone(),
                    collection,
                    request_id,
                },
                ServerMessage::snapshot(subscription_id, collection, documents),
            ]
        }

        ClientMessage::Unsubscribe {
            subscription_id,
            request_id,
        } => {
            if conn_manager.unsubscribe(conn_id, &subscription_id) {
                vec![ServerMessage::Unsubscribed {
                    subscription_id,
                    request_id,
                }]
            } else {
                vec![ServerMessage::error(
                    format!("unknown subscription {}", subscription_id),
                    request_id,
                )]
            }
        }

        ClientMessage::Ping => vec![ServerMessage::Pong],
    }
}
