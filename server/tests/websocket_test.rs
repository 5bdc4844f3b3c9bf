//! Unit tests for the WebSocket snapshot protocol.
//!
//! The server is a binary crate, so these tests mirror the wire enums locally
//! the way a client would declare them.

use schoolsync_engine::{Collection, FieldFilter, RemoteDocument, SnapshotQuery};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe {
        collection: Collection,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<FieldFilter>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Unsubscribe {
        subscription_id: String,
    },
    Ping,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Subscribed {
        subscription_id: String,
        collection: Collection,
        request_id: Option<String>,
    },
    Snapshot {
        subscription_id: String,
        collection: Collection,
        documents: Vec<RemoteDocument>,
    },
    Unsubscribed {
        subscription_id: String,
    },
    Pong,
    Error {
        message: String,
        request_id: Option<String>,
    },
}

#[cfg(test)]
mod websocket_protocol_tests {
    use super::*;

    #[test]
    fn test_subscribe_serialization() {
        let msg = ClientMessage::Subscribe {
            collection: Collection::Assessments,
            filter: Some(FieldFilter::school("sch-1")),
            request_id: Some("req-001".into()),
        };

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "subscribe",
                "collection": "assessments",
                "filter": {"field": "schoolId", "value": "sch-1"},
                "request_id": "req-001"
            })
        );
    }

    #[test]
    fn test_subscribe_matches_snapshot_query_shape() {
        let query = SnapshotQuery::for_school(Collection::Students, "sch-1");
        let msg = ClientMessage::Subscribe {
            collection: query.collection,
            filter: query.filter.clone(),
            request_id: None,
        };

        let mut value = serde_json::to_value(&msg).unwrap();
        value.as_object_mut().unwrap().remove("type");
        let parsed: SnapshotQuery = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, query);
    }

    #[test]
    fn test_unsubscribe_and_ping_serialization() {
        let unsubscribe = ClientMessage::Unsubscribe {
            subscription_id: "sub-1".into(),
        };
        assert_eq!(
            serde_json::to_string(&unsubscribe).unwrap(),
            r#"{"type":"unsubscribe","subscription_id":"sub-1"}"#
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn test_subscribed_deserialization() {
        let json = r#"{
            "type": "subscribed",
            "subscription_id": "sub-1",
            "collection": "classes",
            "request_id": "req-001"
        }"#;

        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::Subscribed {
                subscription_id,
                collection,
                request_id,
            } => {
                assert_eq!(subscription_id, "sub-1");
                assert_eq!(collection, Collection::Classes);
                assert_eq!(request_id.as_deref(), Some("req-001"));
            }
            other => panic!("Expected Subscribed message, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_deserialization() {
        let json = r#"{
            "type": "snapshot",
            "subscription_id": "sub-1",
            "collection": "students",
            "documents": [
                {
                    "collection": "students",
                    "id": "s1",
                    "data": {
                        "schoolId": "sch-1",
                        "firstName": "Ada",
                        "lastName": "Obi",
                        "lastUpdated": "2026-03-01T08:00:00.000Z",
                        "syncStatus": "synced"
                    }
                }
            ]
        }"#;

        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::Snapshot {
                subscription_id,
                collection,
                documents,
            } => {
                assert_eq!(subscription_id, "sub-1");
                assert_eq!(collection, Collection::Students);
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0].id, "s1");
                assert!(documents[0].last_updated().is_some());
                assert!(documents[0].to_document().is_ok());
            }
            other => panic!("Expected Snapshot message, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_snapshot_deserialization() {
        let json = r#"{"type": "snapshot", "subscription_id": "sub-2", "collection": "assessments", "documents": []}"#;
        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::Snapshot { documents, .. } => assert!(documents.is_empty()),
            other => panic!("Expected Snapshot message, got {other:?}"),
        }
    }

    #[test]
    fn test_pong_and_unsubscribed_deserialization() {
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type": "pong"}"#).unwrap(),
            ServerMessage::Pong
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(
                r#"{"type": "unsubscribed", "subscription_id": "sub-1"}"#
            )
            .unwrap(),
            ServerMessage::Unsubscribed { subscription_id } if subscription_id == "sub-1"
        ));
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{"type": "error", "message": "unknown subscription sub-9"}"#;
        match serde_json::from_str::<ServerMessage>(json).unwrap() {
            ServerMessage::Error {
                message,
                request_id,
            } => {
                assert!(message.contains("sub-9"));
                assert!(request_id.is_none());
            }
            other => panic!("Expected Error message, got {other:?}"),
        }
    }
}
