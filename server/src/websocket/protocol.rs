//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded with a snake_case `type` tag and snake_case
//! field names. Document payloads inside keep their camelCase fields.

use schoolsync_engine::{Collection, FieldFilter, RemoteDocument};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow a collection, optionally filtered on one field.
    Subscribe {
        collection: Collection,
        #[serde(default)]
        filter: Option<FieldFilter>,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Stop following a subscription.
    Unsubscribe {
        subscription_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A subscription was registered; snapshots follow.
    Subscribed {
        subscription_id: String,
        collection: Collection,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Full current result set of a subscription.
    Snapshot {
        subscription_id: String,
        collection: Collection,
        documents: Vec<RemoteDocument>,
    },

    Unsubscribed {
        subscription_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Create a snapshot message.
    pub fn snapshot(
        subscription_id: impl Into<String>,
        collection: Collection,
        documents: Vec<RemoteDocument>,
    ) -> Self {
        ServerMessage::Snapshot {
            subscription_id: subscription_id.into(),
            collection,
            documents,
        }
    }
}
