//! Sync status reported to the UI. Derived, never stored.

use crate::{time, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    /// Pending operations, whether they will be retried or dropped
    pub queue_length: usize,
    /// ISO-8601 time of the last successful flush
    pub last_sync: Option<String>,
    pub sync_in_progress: bool,
}

impl SyncStatus {
    pub fn new(
        is_online: bool,
        queue_length: usize,
        last_sync: Option<Timestamp>,
        sync_in_progress: bool,
    ) -> Self {
        Self {
            is_online,
            queue_length,
            last_sync: last_sync.map(time::to_iso8601),
            sync_in_progress,
        }
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.queue_length == 0 && !self.sync_in_progress
    }
}
