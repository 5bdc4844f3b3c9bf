//! The sync coordinator.
//!
//! Owns the persisted queue and cache, decides between writing through and
//! queuing, flushes the queue in batches and merges remote snapshots back
//! into the cache. Constructed once and shared behind an `Arc`.
//!
//! Locks are never held across a remote call: a flush plans from a copy of
//! the queue, commits without the lock, then takes the lock again to record
//! the outcome. Local writes made in between are kept.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::mirror::RemoteMirror;
use crate::network::{NetworkObserver, NetworkState};
use crate::storage::LocalStore;
use schoolsync_engine::snapshot::{encode_last_sync, LAST_SYNC_KEY, OFFLINE_DATA_KEY, SYNC_QUEUE_KEY};
use schoolsync_engine::{
    time, Assessment, AssessmentPatch, BatchWrite, ClassRoom, ClassRoomPatch, Collection,
    Document, DocumentId, Operation, OperationId, Patch, PersistedState, Reconciler,
    RemoteDocument, RetryPolicy, SnapshotQuery, Student, StudentPatch, SyncStatus, WriteBatch,
    MAX_BATCH_SIZE,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Tunables for a coordinator.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub policy: RetryPolicy,
    /// Writes per flush, at most [`MAX_BATCH_SIZE`]
    pub max_batch: usize,
    /// Period of the background flush
    pub sync_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_batch: MAX_BATCH_SIZE,
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config.max_retries),
            max_batch: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            sync_interval: config.sync_interval,
        }
    }
}

/// What happened to a local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written through to the remote store.
    Synced,
    /// Waiting in the sync queue.
    Queued { id: OperationId },
}

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
    Empty,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    Committed {
        committed: usize,
        /// Entries dropped as invalid while planning
        dropped: usize,
        remaining: usize,
    },
    Failed {
        attempted: usize,
        /// Entries dropped after exhausting their retries
        dropped: usize,
        error: String,
    },
}

/// Clears the reentrancy flag when a flush ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type DocKey = (Collection, DocumentId);

/// Marks a document as being written through; later writes to it queue.
struct WriteThrough<'a> {
    set: &'a std::sync::Mutex<HashSet<DocKey>>,
    key: DocKey,
}

impl<'a> WriteThrough<'a> {
    fn claim(set: &'a std::sync::Mutex<HashSet<DocKey>>, key: DocKey) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        if guard.insert(key.clone()) {
            Some(Self { set, key })
        } else {
            None
        }
    }
}

impl Drop for WriteThrough<'_> {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.key);
    }
}

/// Coordinates local storage, the sync queue and the remote mirror.
pub struct SyncCoordinator<S, M> {
    store: S,
    mirror: M,
    network: NetworkObserver,
    state: Mutex<PersistedState>,
    flushing: AtomicBool,
    writing_through: std::sync::Mutex<HashSet<DocKey>>,
    policy: RetryPolicy,
    max_batch: usize,
    sync_interval: Duration,
}

impl<S: LocalStore, M: RemoteMirror> SyncCoordinator<S, M> {
    /// Load persisted state and build a coordinator.
    ///
    /// Unreadable keys are logged and start empty.
    pub async fn open(
        store: S,
        mirror: M,
        network: NetworkObserver,
        options: SyncOptions,
    ) -> Result<Self> {
        let queue = store.get(SYNC_QUEUE_KEY).await?;
        let cache = store.get(OFFLINE_DATA_KEY).await?;
        let last_sync = store.get(LAST_SYNC_KEY).await?;

        let (state, corrupt) =
            PersistedState::decode(queue.as_deref(), cache.as_deref(), last_sync.as_deref());
        for key in &corrupt {
            tracing::warn!(key = key.key, error = %key.error, "discarding unreadable local state");
        }
        tracing::info!(
            queued = state.queue.len(),
            cached = state.cache.len(),
            "sync state loaded"
        );

        mirror.set_network_enabled(network.is_online());

        Ok(Self {
            store,
            mirror,
            network,
            state: Mutex::new(state),
            flushing: AtomicBool::new(false),
            writing_through: std::sync::Mutex::new(HashSet::new()),
            policy: options.policy,
            max_batch: options.max_batch.clamp(1, MAX_BATCH_SIZE),
            sync_interval: options.sync_interval,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn network(&self) -> &NetworkObserver {
        &self.network
    }

    fn remote_available(&self) -> bool {
        self.network.is_online() && self.mirror.network_enabled()
    }

    // ---- Writes ----

    pub async fn save_student(&self, student: Student) -> Result<WriteOutcome> {
        self.write(Operation::create(Document::Student(student))).await
    }

    pub async fn update_student(
        &self,
        id: impl Into<DocumentId>,
        patch: StudentPatch,
    ) -> Result<WriteOutcome> {
        self.write(Operation::update(id, Patch::Student(patch))).await
    }

    pub async fn delete_student(&self, id: impl Into<DocumentId>) -> Result<WriteOutcome> {
        self.write(Operation::delete(Collection::Students, id)).await
    }

    pub async fn save_class(&self, class: ClassRoom) -> Result<WriteOutcome> {
        self.write(Operation::create(Document::ClassRoom(class))).await
    }

    pub async fn update_class(
        &self,
        id: impl Into<DocumentId>,
        patch: ClassRoomPatch,
    ) -> Result<WriteOutcome> {
        self.write(Operation::update(id, Patch::ClassRoom(patch))).await
    }

    pub async fn delete_class(&self, id: impl Into<DocumentId>) -> Result<WriteOutcome> {
        self.write(Operation::delete(Collection::Classes, id)).await
    }

    /// Scores are range-checked before anything is written.
    pub async fn save_assessment(&self, assessment: Assessment) -> Result<WriteOutcome> {
        self.write(Operation::create(Document::Assessment(assessment))).await
    }

    pub async fn update_assessment(
        &self,
        id: impl Into<DocumentId>,
        patch: AssessmentPatch,
    ) -> Result<WriteOutcome> {
        self.write(Operation::update(id, Patch::Assessment(patch))).await
    }

    pub async fn delete_assessment(&self, id: impl Into<DocumentId>) -> Result<WriteOutcome> {
        self.write(Operation::delete(Collection::Assessments, id)).await
    }

    /// Apply a mutation locally, queue it, and write it through when it is
    /// the only pending edit of its document.
    ///
    /// Only validation errors reach the caller. A failed write-through keeps
    /// its place in the queue and reports `Queued`.
    pub async fn write(&self, operation: Operation) -> Result<WriteOutcome> {
        operation.validate()?;
        let now = time::now_millis();
        let key = (operation.collection(), operation.document_id().clone());

        let (id, claim) = {
            let mut state = self.state.lock().await;
            state.cache.apply_local(&operation, now)?;
            self.persist_cache(&state).await;

            // Earlier queued edits to this document must land first.
            let first_for_document = !state.queue.touches(key.0, &key.1);
            let id = state.queue.enqueue(operation.clone(), now);
            self.persist_queue(&state).await;

            let claim = if first_for_document && self.remote_available() {
                WriteThrough::claim(&self.writing_through, key.clone())
            } else {
                None
            };
            (id, claim)
        };

        let Some(claim) = claim else {
            tracing::debug!(op_id = %id, path = %operation.path(), "operation queued");
            return Ok(WriteOutcome::Queued { id });
        };

        let mut batch = WriteBatch::new();
        batch.push(BatchWrite::from_operation(&operation, &time::to_iso8601(now)));

        let outcome = match self.mirror.commit(batch).await {
            Ok(_) => {
                let mut state = self.state.lock().await;
                state.queue.acknowledge(std::slice::from_ref(&id));
                if !state.queue.touches(key.0, &key.1) {
                    state.cache.mark_synced(key.0, &key.1);
                }
                self.persist_queue(&state).await;
                self.persist_cache(&state).await;
                tracing::debug!(path = %operation.path(), "written through");
                WriteOutcome::Synced
            }
            Err(e) => {
                tracing::warn!(op_id = %id, path = %operation.path(), error = %e, "write-through failed, left queued");
                WriteOutcome::Queued { id }
            }
        };

        // Released only once the queue reflects the outcome, so a flush
        // cannot pick the entry up while its write is still in flight.
        drop(claim);
        Ok(outcome)
    }

    // ---- Flush ----

    /// Send queued operations as one batch.
    ///
    /// No-op while offline, while another flush runs, or when the queue is
    /// empty.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.remote_available() {
            return FlushOutcome::Skipped(SkipReason::Offline);
        }
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            return FlushOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        let started = time::now_millis();

        let (plan, dropped_invalid) = {
            let mut state = self.state.lock().await;
            let held = self
                .writing_through
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone();
            let plan = state.queue.plan_flush_excluding(self.max_batch, &held);
            let dropped = state.queue.reject(&plan.rejected);
            for (entry, reason) in &dropped {
                tracing::warn!(op_id = %entry.id, path = %entry.operation.path(), reason = %reason, "dropping queued operation");
                self.policy.notify(entry, reason);
            }
            if !dropped.is_empty() {
                self.persist_queue(&state).await;
            }
            (plan, dropped.len())
        };

        if plan.batch.is_empty() {
            return FlushOutcome::Skipped(SkipReason::Empty);
        }

        let ids = plan.batch_ids();
        let batch = WriteBatch::from_queued(&plan.batch, &time::to_iso8601(started));
        tracing::info!(writes = batch.len(), "flushing sync queue");

        match self.mirror.commit(batch).await {
            Ok(receipt) => {
                let mut state = self.state.lock().await;
                let committed = state.queue.acknowledge(&ids);
                for entry in &plan.batch {
                    let (collection, id) = (entry.collection(), entry.document_id());
                    if !state.queue.touches(collection, id) {
                        state.cache.mark_synced(collection, id);
                    }
                }
                state.last_sync = Some(time::now_millis().max(started));

                self.persist_queue(&state).await;
                self.persist_cache(&state).await;
                self.persist_last_sync(&state).await;

                tracing::info!(
                    committed,
                    committed_at = %receipt.committed_at,
                    remaining = state.queue.len(),
                    "sync queue flushed"
                );
                FlushOutcome::Committed {
                    committed,
                    dropped: dropped_invalid,
                    remaining: state.queue.len(),
                }
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                let dropped = state.queue.record_failure(&ids, self.policy.max_retries);
                for (entry, reason) in &dropped {
                    tracing::warn!(op_id = %entry.id, path = %entry.operation.path(), reason = %reason, "dropping queued operation");
                    self.policy.notify(entry, reason);
                }
                self.persist_queue(&state).await;

                tracing::warn!(attempted = ids.len(), error = %e, "flush failed, will retry");
                FlushOutcome::Failed {
                    attempted: ids.len(),
                    dropped: dropped.len() + dropped_invalid,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Flush now, regardless of the timer.
    pub async fn force_sync(&self) -> FlushOutcome {
        self.flush().await
    }

    // ---- Reads ----

    pub async fn sync_status(&self) -> SyncStatus {
        let state = self.state.lock().await;
        SyncStatus::new(
            self.network.is_online(),
            state.queue.len(),
            state.last_sync,
            self.flushing.load(Ordering::Acquire),
        )
    }

    /// Cached documents of a collection, optionally for one school.
    pub async fn documents(&self, collection: Collection, school_id: Option<&str>) -> Vec<Document> {
        let state = self.state.lock().await;
        state
            .cache
            .query(collection, school_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        let state = self.state.lock().await;
        state.cache.get(collection, id).map(|c| c.document.clone())
    }

    /// Merge a remote result set and return the cached view of the query.
    pub async fn apply_snapshot(
        &self,
        query: &SnapshotQuery,
        snapshot: &[RemoteDocument],
    ) -> Vec<Document> {
        let mut state = self.state.lock().await;
        let pending = state.queue.pending_documents();
        let result =
            Reconciler::new(&mut state.cache, &pending).apply_snapshot(query, snapshot, time::now_millis());

        for (id, reason) in &result.skipped {
            tracing::warn!(collection = %query.collection, id = %id, reason = %reason, "skipping unreadable remote document");
        }
        if result.changed() {
            tracing::debug!(
                collection = %query.collection,
                applied = result.applied.len(),
                removed = result.removed.len(),
                kept_local = result.kept_local.len(),
                "snapshot merged"
            );
            self.persist_cache(&state).await;
        }

        state
            .cache
            .matching(query)
            .into_iter()
            .map(|c| c.document.clone())
            .collect()
    }

    // ---- Persistence ----
    // Storage failures are logged; the in-memory state stays authoritative
    // until the next successful write.

    async fn persist_queue(&self, state: &PersistedState) {
        match state.encode_queue() {
            Ok(json) => {
                if let Err(e) = self.store.set(SYNC_QUEUE_KEY, &json).await {
                    tracing::error!(key = SYNC_QUEUE_KEY, error = %e, "failed to persist");
                }
            }
            Err(e) => tracing::error!(key = SYNC_QUEUE_KEY, error = %e, "failed to encode"),
        }
    }

    async fn persist_cache(&self, state: &PersistedState) {
        match state.encode_cache() {
            Ok(json) => {
                if let Err(e) = self.store.set(OFFLINE_DATA_KEY, &json).await {
                    tracing::error!(key = OFFLINE_DATA_KEY, error = %e, "failed to persist");
                }
            }
            Err(e) => tracing::error!(key = OFFLINE_DATA_KEY, error = %e, "failed to encode"),
        }
    }

    async fn persist_last_sync(&self, state: &PersistedState) {
        if let Some(ts) = state.last_sync {
            if let Err(e) = self.store.set(LAST_SYNC_KEY, &encode_last_sync(ts)).await {
                tracing::error!(key = LAST_SYNC_KEY, error = %e, "failed to persist");
            }
        }
    }
}

impl<S, M> SyncCoordinator<S, M>
where
    S: LocalStore + 'static,
    M: RemoteMirror + 'static,
{
    /// Follow a query. `on_change` gets the cached result set right away and
    /// again after every remote change, each time as a full replacement.
    ///
    /// The subscription reconnects after the network comes back or the
    /// stream drops. It ends when the handle is dropped.
    pub async fn subscribe<F>(self: &Arc<Self>, query: SnapshotQuery, on_change: F) -> SubscriptionHandle
    where
        F: Fn(Vec<Document>) + Send + Sync + 'static,
    {
        let cached = {
            let state = self.state.lock().await;
            state
                .cache
                .matching(&query)
                .into_iter()
                .map(|c| c.document.clone())
                .collect()
        };
        on_change(cached);

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut network = this.network.subscribe();
            loop {
                if this.remote_available() {
                    match this.mirror.subscribe(query.clone()).await {
                        Ok(mut stream) => {
                            while let Some(snapshot) = stream.recv().await {
                                let documents = this.apply_snapshot(&query, &snapshot).await;
                                on_change(documents);
                            }
                            tracing::debug!(collection = %query.collection, "snapshot stream ended");
                        }
                        Err(e) => {
                            tracing::warn!(collection = %query.collection, error = %e, "subscribe failed");
                        }
                    }
                }

                tokio::select! {
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(this.sync_interval) => {}
                }
            }
        });

        SubscriptionHandle { task }
    }

    /// Spawn the periodic flush and the network watcher.
    pub fn start(self: &Arc<Self>) -> CoordinatorTasks {
        let this = Arc::clone(self);
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcome = this.flush().await;
                tracing::debug!(?outcome, "periodic flush");
            }
        });

        // Read before spawning so a change made before the watcher first runs
        // still counts as a change.
        let mut rx = self.network.subscribe();
        let initial = *rx.borrow_and_update();
        self.mirror.set_network_enabled(initial.is_online());

        let this = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                match state {
                    NetworkState::Online => {
                        this.mirror.set_network_enabled(true);
                        let outcome = this.flush().await;
                        tracing::info!(?outcome, "flushed after reconnect");
                    }
                    NetworkState::Offline => this.mirror.set_network_enabled(false),
                }
            }
        });

        CoordinatorTasks {
            handles: vec![timer, watcher],
        }
    }
}

/// A live subscription. Dropping it stops the updates.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop the subscription now.
    pub fn cancel(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Background tasks of a started coordinator. Dropping it stops them.
#[derive(Debug, Default)]
pub struct CoordinatorTasks {
    handles: Vec<JoinHandle<()>>,
}

impl CoordinatorTasks {
    /// Tie another task, such as a health probe, to this lifetime.
    pub fn attach(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Abort every task.
    pub fn shutdown(self) {}
}

impl Drop for CoordinatorTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
