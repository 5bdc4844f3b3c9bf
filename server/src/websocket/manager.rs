//! WebSocket connection manager.
//!
//! Tracks active connections and their subscriptions so committed batches
//! can be fanned out as snapshots.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use schoolsync_engine::{Collection, SnapshotQuery};
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// A query followed by one connection.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub conn_id: String,
    pub query: SnapshotQuery,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// All subscriptions, keyed by subscription ID.
    subscriptions: DashMap<String, Subscription>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection and drop its subscriptions.
    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            self.subscriptions.retain(|_, sub| sub.conn_id != conn_id);
            tracing::info!(conn_id = %conn_id, "WebSocket connection unregistered");
        }
    }

    /// Add a subscription for a connection.
    ///
    /// Returns the subscription ID, or `None` if the connection is gone.
    pub fn subscribe(&self, conn_id: &str, query: SnapshotQuery) -> Option<String> {
        if !self.connections.contains_key(conn_id) {
            return None;
        }

        let sub_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            conn_id = %conn_id,
            subscription_id = %sub_id,
            collection = %query.collection,
            "subscription added"
        );
        self.subscriptions.insert(
            sub_id.clone(),
            Subscription {
                id: sub_id.clone(),
                conn_id: conn_id.to_string(),
                query,
            },
        );
        Some(sub_id)
    }

    /// Remove a subscription owned by `conn_id`.
    pub fn unsubscribe(&self, conn_id: &str, sub_id: &str) -> bool {
        self.subscriptions
            .remove_if(sub_id, |_, sub| sub.conn_id == conn_id)
            .is_some()
    }

    /// Subscriptions following any of the given collections.
    pub fn subscriptions_for(&self, collections: &BTreeSet<Collection>) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|entry| collections.contains(&entry.value().query.collection))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn subscription(&self, sub_id: &str) -> Option<Subscription> {
        self.subscriptions.get(sub_id).map(|entry| entry.value().clone())
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}
