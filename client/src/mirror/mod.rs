//! Remote mirror clients.
//!
//! A mirror applies batched writes to the remote document store and streams
//! full result sets for a collection query. Implementations:
//!
//! - [`MemoryMirror`]: an in-process document store with fault injection and
//!   a commit log.
//! - [`HttpMirror`]: the document store service over HTTP and WebSocket.

mod http;
mod memory;

pub use http::HttpMirror;
pub use memory::MemoryMirror;

use crate::error::MirrorResult;
use schoolsync_engine::{CommitReceipt, RemoteDocument, SnapshotQuery, WriteBatch};
use tokio::sync::mpsc;

/// Stream of full result sets for one query. Each delivery replaces the
/// previous one.
pub type SnapshotStream = mpsc::UnboundedReceiver<Vec<RemoteDocument>>;

/// Access to the remote document store.
#[trait_variant::make(Send)]
pub trait RemoteMirror: Send + Sync {
    /// Apply every write or none of them.
    async fn commit(&self, batch: WriteBatch) -> MirrorResult<CommitReceipt>;

    /// Current result set for a query.
    async fn fetch(&self, query: &SnapshotQuery) -> MirrorResult<Vec<RemoteDocument>>;

    /// Live result sets for a query, starting with the current one.
    ///
    /// The stream ends when the connection is lost; callers resubscribe.
    async fn subscribe(&self, query: SnapshotQuery) -> MirrorResult<SnapshotStream>;

    /// While disabled every call fails with `NetworkDisabled` without
    /// touching the network.
    fn set_network_enabled(&self, enabled: bool);

    fn network_enabled(&self) -> bool;
}
