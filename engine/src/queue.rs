//! The sync queue: mutations not yet confirmed by the remote store.
//!
//! The queue is a plain FIFO list. There is no deduplication, so three edits
//! to one document produce three entries that are replayed in order. A flush
//! works on a copy of the queue, so entries added while a commit is in
//! flight are never skipped.

use crate::{
    error::Result, Collection, DocumentId, Error, Operation, OperationId, QueuedOperation,
    Timestamp,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Retry ceiling used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Largest number of writes in one remote commit.
pub const MAX_BATCH_SIZE: usize = 500;

/// Why an entry left the queue without being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Failed local validation; retrying cannot help.
    Rejected(String),
    /// Exceeded the retry ceiling.
    RetriesExhausted { attempts: u32 },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Rejected(reason) => write!(f, "rejected: {reason}"),
            DropReason::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} failed attempts")
            }
        }
    }
}

/// Callback invoked for every dropped entry.
pub type ExhaustedHook = Arc<dyn Fn(&QueuedOperation, &DropReason) + Send + Sync>;

/// How many times to retry and what to do when giving up.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    on_exhausted: Option<ExhaustedHook>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            on_exhausted: None,
        }
    }

    /// Register a callback for dropped entries.
    pub fn on_exhausted<F>(mut self, hook: F) -> Self
    where
        F: Fn(&QueuedOperation, &DropReason) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(hook));
        self
    }

    /// Invoke the callback, if any.
    pub fn notify(&self, entry: &QueuedOperation, reason: &DropReason) {
        if let Some(hook) = &self.on_exhausted {
            hook(entry, reason);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

/// What one flush attempt will send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushPlan {
    /// Valid entries, in queue order, at most the batch cap.
    pub batch: Vec<QueuedOperation>,
    /// Entries that failed validation, with the reason.
    pub rejected: Vec<(QueuedOperation, String)>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty() && self.rejected.is_empty()
    }

    pub fn batch_ids(&self) -> Vec<OperationId> {
        self.batch.iter().map(|e| e.id.clone()).collect()
    }

    pub fn rejected_ids(&self) -> Vec<OperationId> {
        self.rejected.iter().map(|(e, _)| e.id.clone()).collect()
    }
}

/// FIFO list of pending operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncQueue {
    entries: Vec<QueuedOperation>,
    next_seq: u64,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted entries.
    pub fn from_entries(entries: Vec<QueuedOperation>) -> Self {
        let next_seq = entries.len() as u64;
        Self { entries, next_seq }
    }

    /// Append an operation and return its queue id.
    pub fn enqueue(&mut self, operation: Operation, now: Timestamp) -> OperationId {
        let id = self.next_id(now);
        self.entries.push(QueuedOperation::new(id.clone(), operation, now));
        id
    }

    fn next_id(&mut self, now: Timestamp) -> OperationId {
        loop {
            let id = format!("op_{}_{}", now, self.next_seq);
            self.next_seq += 1;
            if !self.entries.iter().any(|e| e.id == id) {
                return id;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QueuedOperation] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&QueuedOperation> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Whether any queued operation targets this document.
    pub fn touches(&self, collection: Collection, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.collection() == collection && e.document_id() == id)
    }

    /// Every document with at least one queued operation.
    pub fn pending_documents(&self) -> HashSet<(Collection, DocumentId)> {
        self.entries
            .iter()
            .map(|e| (e.collection(), e.document_id().clone()))
            .collect()
    }

    /// Snapshot the queue and split it into a batch and rejects.
    ///
    /// Nothing is removed here; the caller reports the outcome through
    /// [`SyncQueue::acknowledge`] or [`SyncQueue::record_failure`].
    pub fn plan_flush(&self, max_batch: usize) -> FlushPlan {
        self.plan_flush_excluding(max_batch, &HashSet::new())
    }

    /// Like [`SyncQueue::plan_flush`], but leaves out every entry for a
    /// document in `held`. Those documents have a write in flight elsewhere
    /// and their later entries must wait for it.
    pub fn plan_flush_excluding(
        &self,
        max_batch: usize,
        held: &HashSet<(Collection, DocumentId)>,
    ) -> FlushPlan {
        let mut plan = FlushPlan::default();

        for entry in self.entries.iter().cloned() {
            if held.contains(&(entry.collection(), entry.document_id().clone())) {
                continue;
            }
            if let Err(e) = entry.operation.validate() {
                plan.rejected.push((entry, e.to_string()));
                continue;
            }
            if plan.batch.len() >= max_batch {
                break;
            }
            plan.batch.push(entry);
        }

        plan
    }

    /// Remove entries confirmed by the remote store.
    ///
    /// Returns how many were removed.
    pub fn acknowledge(&mut self, ids: &[OperationId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        before - self.entries.len()
    }

    /// Remove entries that failed validation.
    pub fn reject(&mut self, rejected: &[(QueuedOperation, String)]) -> Vec<(QueuedOperation, DropReason)> {
        let mut dropped = Vec::with_capacity(rejected.len());
        for (entry, reason) in rejected {
            if let Some(pos) = self.entries.iter().position(|e| e.id == entry.id) {
                let removed = self.entries.remove(pos);
                dropped.push((removed, DropReason::Rejected(reason.clone())));
            }
        }
        dropped
    }

    /// Count a failed attempt for each id.
    ///
    /// Entries whose retry count now exceeds the ceiling are removed and
    /// returned.
    pub fn record_failure(
        &mut self,
        ids: &[OperationId],
        max_retries: u32,
    ) -> Vec<(QueuedOperation, DropReason)> {
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());

        for mut entry in std::mem::take(&mut self.entries) {
            if ids.contains(&entry.id) {
                entry.retry_count = entry.retry_count.saturating_add(1);
                if entry.retry_count > max_retries {
                    let attempts = entry.retry_count;
                    dropped.push((entry, DropReason::RetriesExhausted { attempts }));
                    continue;
                }
            }
            kept.push(entry);
        }

        self.entries = kept;
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize the entry list.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.entries).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<QueuedOperation> =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        Ok(Self::from_entries(entries))
    }
}
