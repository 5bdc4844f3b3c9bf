//! WebSocket support for live snapshots.
//!
//! Clients subscribe to a collection (optionally filtered on one field) and
//! receive the full result set on subscribe and after every committed batch
//! that touches the collection.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
