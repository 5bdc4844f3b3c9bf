//! Persisted client state and its key-value layout.
//!
//! Three JSON blobs live under fixed keys. There is no format version: a
//! shape change means clearing local storage. A blob that fails to decode
//! is treated as empty and reported, so one corrupt key never blocks start-up.

use crate::{error::Result, time, Error, OfflineCache, SyncQueue, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key holding the serialized queue.
pub const SYNC_QUEUE_KEY: &str = "sync_queue";

/// Key holding the serialized offline cache.
pub const OFFLINE_DATA_KEY: &str = "offline_data";

/// Key holding the ISO-8601 time of the last successful flush.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Every key the client writes.
pub const ALL_KEYS: [&str; 3] = [SYNC_QUEUE_KEY, OFFLINE_DATA_KEY, LAST_SYNC_KEY];

/// Queue, cache and last-sync time as loaded from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub queue: SyncQueue,
    pub cache: OfflineCache,
    pub last_sync: Option<Timestamp>,
}

/// A key whose blob could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptKey {
    pub key: &'static str,
    pub error: Error,
}

impl PersistedState {
    /// Decode raw blobs. Missing keys are empty; corrupt keys are empty and
    /// listed in the second return value.
    pub fn decode(
        queue: Option<&str>,
        cache: Option<&str>,
        last_sync: Option<&str>,
    ) -> (Self, Vec<CorruptKey>) {
        let mut state = Self::default();
        let mut corrupt = Vec::new();

        if let Some(raw) = queue {
            match SyncQueue::from_json(raw) {
                Ok(q) => state.queue = q,
                Err(error) => corrupt.push(CorruptKey {
                    key: SYNC_QUEUE_KEY,
                    error,
                }),
            }
        }

        if let Some(raw) = cache {
            match OfflineCache::from_json(raw) {
                Ok(c) => state.cache = c,
                Err(error) => corrupt.push(CorruptKey {
                    key: OFFLINE_DATA_KEY,
                    error,
                }),
            }
        }

        if let Some(raw) = last_sync {
            match decode_last_sync(raw) {
                Ok(ts) => state.last_sync = Some(ts),
                Err(error) => corrupt.push(CorruptKey {
                    key: LAST_SYNC_KEY,
                    error,
                }),
            }
        }

        (state, corrupt)
    }

    pub fn encode_queue(&self) -> Result<String> {
        self.queue.to_json()
    }

    pub fn encode_cache(&self) -> Result<String> {
        self.cache.to_json()
    }
}

/// Stored as a JSON string so the blob is valid JSON like the others.
pub fn encode_last_sync(ts: Timestamp) -> String {
    Value::String(time::to_iso8601(ts)).to_string()
}

pub fn decode_last_sync(raw: &str) -> Result<Timestamp> {
    let iso: String =
        serde_json::from_str(raw).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
    time::parse_iso8601(&iso)
}

/// Summary of persisted state for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    pub queue_length: usize,
    pub cached_documents: usize,
    pub last_sync: Option<String>,
}

impl From<&PersistedState> for StateMetadata {
    fn from(state: &PersistedState) -> Self {
        Self {
            queue_length: state.queue.len(),
            cached_documents: state.cache.len(),
            last_sync: state.last_sync.map(time::to_iso8601),
        }
    }
}
