//! Mirror backed by the document store service.
//!
//! Writes and one-off reads go over HTTP; subscriptions hold a WebSocket
//! open and forward every `snapshot` message.

use super::{RemoteMirror, SnapshotStream};
use crate::error::{MirrorError, MirrorResult};
use futures_util::{SinkExt, StreamExt};
use schoolsync_engine::{
    Collection, CommitReceipt, FieldFilter, RemoteDocument, SnapshotQuery, WriteBatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
use tokio_tungstenite::connect_async;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages sent to the service over `/ws`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRequest {
    Subscribe {
        collection: Collection,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<FieldFilter>,
    },
}

/// Messages received from the service over `/ws`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Subscribed {
        subscription_id: String,
    },
    Snapshot {
        documents: Vec<RemoteDocument>,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Other,
}

/// Body of `GET /collections/{collection}`.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<RemoteDocument>,
}

/// Error body returned by the service.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// HTTP + WebSocket [`RemoteMirror`].
#[derive(Debug, Clone)]
pub struct HttpMirror {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    /// Open subscriptions watch this and close when it goes false.
    network: Arc<watch::Sender<bool>>,
}

impl HttpMirror {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> MirrorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, token, client))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        token: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token,
            client,
            network: Arc::new(watch::Sender::new(true)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying HTTP client, shared with the health probe.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// `/ws` URL on the same host.
    pub fn websocket_url(&self) -> String {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .map(|r| format!("wss://{r}"))
            .or_else(|| {
                self.base_url
                    .strip_prefix("http://")
                    .map(|r| format!("ws://{r}"))
            })
            .unwrap_or_else(|| self.base_url.clone());
        format!("{rest}/ws")
    }

    fn ensure_network(&self) -> MirrorResult<()> {
        if self.network_enabled() {
            Ok(())
        } else {
            Err(MirrorError::NetworkDisabled)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> MirrorResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => match body.details {
                Some(details) => format!("{}: {}", body.error, details),
                None => body.error,
            },
            Err(_) => text,
        };
        Err(MirrorError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl RemoteMirror for HttpMirror {
    async fn commit(&self, batch: WriteBatch) -> MirrorResult<CommitReceipt> {
        self.ensure_network()?;
        let url = format!("{}/batch", self.base_url);
        tracing::debug!(writes = batch.len(), url = %url, "committing batch");

        let response = self.authorize(self.client.post(&url)).json(&batch).send().await?;
        Self::read_json(response).await
    }

    async fn fetch(&self, query: &SnapshotQuery) -> MirrorResult<Vec<RemoteDocument>> {
        self.ensure_network()?;
        let url = format!("{}/collections/{}", self.base_url, query.collection);

        let mut request = self.authorize(self.client.get(&url));
        if let Some(filter) = &query.filter {
            request = request.query(&[("field", &filter.field), ("value", &filter.value)]);
        }

        let body: QueryResponse = Self::read_json(request.send().await?).await?;
        Ok(body.documents)
    }

    async fn subscribe(&self, query: SnapshotQuery) -> MirrorResult<SnapshotStream> {
        self.ensure_network()?;

        let mut request = self.websocket_url().as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| MirrorError::Protocol(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| MirrorError::Transport("websocket connect timed out".into()))??;
        let (mut write, mut read) = ws.split();

        let subscribe = WireRequest::Subscribe {
            collection: query.collection,
            filter: query.filter.clone(),
        };
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut network = self.network.subscribe();
        let collection = query.collection;

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = tx.closed() => break,
                    _ = network.wait_for(|enabled| !*enabled) => {
                        tracing::debug!(%collection, "network disabled, closing subscription");
                        break;
                    }
                    frame = read.next() => frame,
                };

                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<WireEvent>(&text) {
                        Ok(WireEvent::Snapshot { documents }) => {
                            if tx.send(documents).is_err() {
                                break;
                            }
                        }
                        Ok(WireEvent::Subscribed { subscription_id }) => {
                            tracing::debug!(%collection, %subscription_id, "subscribed");
                        }
                        Ok(WireEvent::Error { message }) => {
                            tracing::warn!(%collection, error = %message, "subscription error");
                        }
                        Ok(WireEvent::Other) => {}
                        Err(e) => {
                            tracing::warn!(%collection, error = %e, "unreadable message");
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(%collection, "subscription closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%collection, error = %e, "subscription transport error");
                        break;
                    }
                }
            }

            let _ = write.close().await;
        });

        Ok(rx)
    }

    fn set_network_enabled(&self, enabled: bool) {
        self.network.send_replace(enabled);
    }

    fn network_enabled(&self) -> bool {
        *self.network.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_follows_scheme() {
        let mirror = HttpMirror::with_client("http://localhost:3000/", None, reqwest::Client::new());
        assert_eq!(mirror.base_url(), "http://localhost:3000");
        assert_eq!(mirror.websocket_url(), "ws://localhost:3000/ws");

        let mirror = HttpMirror::with_client("https://sync.example.org", None, reqwest::Client::new());
        assert_eq!(mirror.websocket_url(), "wss://sync.example.org/ws");
    }

    #[test]
    fn subscribe_frame_shape() {
        let frame = WireRequest::Subscribe {
            collection: Collection::Students,
            filter: Some(FieldFilter::school("sch-1")),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["collection"], "students");
        assert_eq!(json["filter"]["field"], "schoolId");
    }

    #[test]
    fn snapshot_event_parses() {
        let json = r#"{
            "type": "snapshot",
            "subscription_id": "sub-1",
            "documents": [
                {"collection": "students", "id": "s1", "data": {"schoolId": "sch-1"}}
            ]
        }"#;
        match serde_json::from_str::<WireEvent>(json).unwrap() {
            WireEvent::Snapshot { documents } => assert_eq!(documents[0].id, "s1"),
            other => panic!("unexpected {other:?}"),
        }

        let unknown: WireEvent = serde_json::from_str(r#"{"type":"unsubscribed"}"#).unwrap();
        assert!(matches!(unknown, WireEvent::Other));
    }

    #[tokio::test]
    async fn disabled_network_never_connects() {
        let mirror = HttpMirror::with_client("http://127.0.0.1:9", None, reqwest::Client::new());
        mirror.set_network_enabled(false);
        assert!(matches!(
            mirror.commit(WriteBatch::new()).await,
            Err(MirrorError::NetworkDisabled)
        ));
        assert!(matches!(
            mirror
                .subscribe(SnapshotQuery::collection(Collection::Students))
                .await,
            Err(MirrorError::NetworkDisabled)
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let mirror = HttpMirror::with_client("http://127.0.0.1:9", None, reqwest::Client::new());
        let err = mirror.commit(WriteBatch::new()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Transport(_)));
    }

    #[tokio::test]
    async fn disabling_the_network_closes_an_idle_subscription() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Read the subscribe frame, then stay silent until the client leaves.
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
        });

        let mirror =
            HttpMirror::with_client(format!("http://{addr}"), None, reqwest::Client::new());
        let mut rx = mirror
            .subscribe(SnapshotQuery::collection(Collection::Students))
            .await
            .unwrap();

        mirror.set_network_enabled(false);
        assert!(!mirror.network_enabled());
        let closed = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(closed.is_none());
        timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    }
}
