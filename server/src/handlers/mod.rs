//! Request handlers shared by the HTTP routes and the WebSocket endpoint.

mod batch;
mod documents;
mod websocket;

use std::collections::BTreeSet;

use schoolsync_engine::Collection;
use sqlx::PgPool;

use crate::db;
use crate::websocket::{ConnectionManager, ServerMessage};

pub use batch::*;
pub use documents::*;
pub use websocket::*;

/// Send fresh snapshots to every subscription on the touched collections.
///
/// Returns how many snapshots were delivered.
pub async fn publish_snapshots(
    pool: &PgPool,
    conn_manager: &ConnectionManager,
    touched: &BTreeSet<Collection>,
) -> usize {
    let mut sent = 0;

    for sub in conn_manager.subscriptions_for(touched) {
        let documents =
            match db::list_documents(pool, sub.query.collection, sub.query.filter.as_ref()).await {
                Ok(documents) => documents,
                Err(e) => {
                    tracing::warn!(subscription_id = %sub.id, "snapshot query failed: {}", e);
                    continue;
                }
            };

        let message = ServerMessage::snapshot(sub.id.clone(), sub.query.collection, documents);
        if conn_manager.send_to(&sub.conn_id, message) {
            sent += 1;
        }
    }

    if sent > 0 {
        tracing::debug!(sent, collections = ?touched, "snapshots published");
    }
    sent
}
