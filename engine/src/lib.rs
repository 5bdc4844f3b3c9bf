//! # SchoolSync Engine
//!
//! The IO-free core of an offline-first mirror for school records.
//!
//! Local writes to students, classes and assessments are applied to an
//! offline cache straight away and recorded in a FIFO sync queue. When the
//! remote document store is reachable the queue is flushed as one batched,
//! all-or-nothing commit. Remote snapshots are merged back into the cache
//! with a last-writer-wins rule.
//!
//! This crate holds the types and the decisions; the async runtime, storage
//! backends and network clients live in `schoolsync-client`.
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! [`Document`] is a tagged variant per collection ([`Student`],
//! [`ClassRoom`], [`Assessment`]). [`Patch`] is the matching partial update.
//!
//! ### Operations
//!
//! Every local mutation is an [`Operation`]: create, update or delete. Queued
//! operations carry an id, the time they were queued and a retry count.
//!
//! ### Sync queue
//!
//! [`SyncQueue`] plans a flush from a copy of its entries, capped at
//! [`MAX_BATCH_SIZE`], then takes the outcome: acknowledged entries leave,
//! failed entries count a retry and are dropped past the [`RetryPolicy`]
//! ceiling.
//!
//! ### Reconciliation
//!
//! [`Reconciler`] merges a full remote result set into the [`OfflineCache`].
//!
//! ## Quick Start
//!
//! ```rust
//! use schoolsync_engine::{
//!     Document, Operation, OfflineCache, Student, SyncQueue, WriteBatch, MAX_BATCH_SIZE,
//! };
//!
//! let mut cache = OfflineCache::new();
//! let mut queue = SyncQueue::new();
//!
//! // 1. A local write lands in the cache and the queue
//! let op = Operation::create(Document::Student(Student::new("s1", "sch-1", "Ada", "Obi")));
//! cache.apply_local(&op, 1_767_225_600_000).unwrap();
//! queue.enqueue(op, 1_767_225_600_000);
//!
//! // 2. Later, plan a flush and build the remote batch
//! let plan = queue.plan_flush(MAX_BATCH_SIZE);
//! let batch = WriteBatch::from_queued(&plan.batch, "2026-01-01T00:00:00.000Z");
//! assert_eq!(batch.len(), 1);
//!
//! // 3. Once the commit succeeds, drop the entries
//! queue.acknowledge(&plan.batch_ids());
//! assert!(queue.is_empty());
//! ```

pub mod cache;
pub mod entity;
pub mod error;
pub mod grading;
pub mod operation;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod snapshot;
pub mod status;
pub mod time;

// Re-export main types at crate root
pub use cache::{CachedCollection, CachedDocument, OfflineCache, Origin};
pub use entity::{
    Assessment, AssessmentPatch, ClassRoom, ClassRoomPatch, Collection, Document, Patch, Student,
    StudentPatch,
};
pub use error::Error;
pub use grading::{Grade, GradeSummary, Scores};
pub use operation::{CreateOp, DeleteOp, OpKind, Operation, OperationId, QueuedOperation, UpdateOp};
pub use queue::{
    DropReason, ExhaustedHook, FlushPlan, RetryPolicy, SyncQueue, DEFAULT_MAX_RETRIES,
    MAX_BATCH_SIZE,
};
pub use reconcile::{ReconcileResult, Reconciler};
pub use remote::{
    BatchWrite, CommitReceipt, FieldFilter, RemoteDocument, SnapshotQuery, WriteBatch,
};
pub use snapshot::{
    CorruptKey, PersistedState, StateMetadata, LAST_SYNC_KEY, OFFLINE_DATA_KEY, SYNC_QUEUE_KEY,
};
pub use status::SyncStatus;

/// Type aliases for clarity
pub type DocumentId = String;
pub type Timestamp = u64;
