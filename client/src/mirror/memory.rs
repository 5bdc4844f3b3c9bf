//! In-process document store.
//!
//! Behaves like the remote service: batches apply all-or-nothing, writes
//! carry their stamps, and subscribers get the full result set after every
//! commit touching their collection. Tests drive it through fault injection
//! and read back the commit log.

use super::{RemoteMirror, SnapshotStream};
use crate::error::{MirrorError, MirrorResult};
use schoolsync_engine::{
    time, BatchWrite, Collection, CommitReceipt, DocumentId, RemoteDocument, SnapshotQuery,
    WriteBatch, MAX_BATCH_SIZE,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

type Documents = BTreeMap<(Collection, DocumentId), Map<String, Value>>;

struct Subscriber {
    query: SnapshotQuery,
    tx: mpsc::UnboundedSender<Vec<RemoteDocument>>,
}

#[derive(Default)]
struct Inner {
    documents: Mutex<Documents>,
    commits: Mutex<Vec<WriteBatch>>,
    subscribers: Mutex<Vec<Subscriber>>,
    network: AtomicBool,
    fail_next: AtomicU32,
    fail_always: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory [`RemoteMirror`]. Clones share the same store.
#[derive(Clone)]
pub struct MemoryMirror {
    inner: Arc<Inner>,
}

/// Recover the data from a poisoned lock; every critical section here
/// leaves the map consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decrements the in-flight counter when a commit ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryMirror {
    pub fn new() -> Self {
        let inner = Inner::default();
        inner.network.store(true, Ordering::SeqCst);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Fail the next `n` commits with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every commit until switched off.
    pub fn fail_always(&self, enabled: bool) {
        self.inner.fail_always.store(enabled, Ordering::SeqCst);
    }

    /// Hold each commit for `delay` before applying it.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.commit_delay) = delay;
    }

    /// Every successful batch, in commit order.
    pub fn commits(&self) -> Vec<WriteBatch> {
        lock(&self.inner.commits).clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.inner.commits).len()
    }

    /// Highest number of commits observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Map<String, Value>> {
        lock(&self.inner.documents)
            .get(&(collection, id.to_string()))
            .cloned()
    }

    pub fn document_count(&self) -> usize {
        lock(&self.inner.documents).len()
    }

    /// Write a document as another client would, notifying subscribers.
    pub fn put_remote(&self, doc: RemoteDocument) {
        let collection = doc.collection;
        lock(&self.inner.documents).insert((doc.collection, doc.id), doc.data);
        self.notify(&BTreeSet::from([collection]));
    }

    /// Remove a document as another client would, notifying subscribers.
    pub fn delete_remote(&self, collection: Collection, id: &str) {
        lock(&self.inner.documents).remove(&(collection, id.to_string()));
        self.notify(&BTreeSet::from([collection]));
    }

    fn ensure_network(&self) -> MirrorResult<()> {
        if self.network_enabled() {
            Ok(())
        } else {
            Err(MirrorError::NetworkDisabled)
        }
    }

    fn injected_failure(&self) -> bool {
        if self.inner.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn snapshot(&self, query: &SnapshotQuery) -> Vec<RemoteDocument> {
        let docs = lock(&self.inner.documents);
        docs.iter()
            .filter(|((collection, _), _)| *collection == query.collection)
            .map(|((collection, id), data)| RemoteDocument::new(*collection, id.clone(), data.clone()))
            .filter(|doc| query.matches(doc))
            .collect()
    }

    fn notify(&self, touched: &BTreeSet<Collection>) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|sub| {
            if !touched.contains(&sub.query.collection) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(self.snapshot(&sub.query)).is_ok()
        });
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one write to a scratch copy of the store.
fn apply_write(docs: &mut Documents, write: &BatchWrite) -> MirrorResult<()> {
    write.validate()?;
    match write {
        BatchWrite::Set {
            collection,
            id,
            data,
            merge,
        } => {
            let entry = docs.entry((*collection, id.clone())).or_default();
            if !*merge {
                entry.clear();
            }
            entry.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        BatchWrite::Patch {
            collection,
            id,
            fields,
        } => {
            let entry = docs.get_mut(&(*collection, id.clone())).ok_or_else(|| {
                MirrorError::Rejected {
                    status: 404,
                    message: format!("no document at {}", write.path()),
                }
            })?;
            entry.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        BatchWrite::Delete { collection, id } => {
            docs.remove(&(*collection, id.clone()));
        }
    }
    Ok(())
}

impl RemoteMirror for MemoryMirror {
    async fn commit(&self, batch: WriteBatch) -> MirrorResult<CommitReceipt> {
        self.ensure_network()?;
        let _in_flight = InFlight::enter(&self.inner.in_flight, &self.inner.max_in_flight);

        let delay = *lock(&self.inner.commit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.injected_failure() {
            return Err(MirrorError::Transport("injected failure".into()));
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(MirrorError::Rejected {
                status: 400,
                message: format!("batch of {} exceeds {}", batch.len(), MAX_BATCH_SIZE),
            });
        }

        {
            let mut docs = lock(&self.inner.documents);
            let mut scratch = docs.clone();
            for write in &batch.writes {
                apply_write(&mut scratch, write)?;
            }
            *docs = scratch;
        }

        let touched = batch.collections();
        let receipt = CommitReceipt {
            committed: batch.len(),
            committed_at: time::to_iso8601(time::now_millis()),
        };
        lock(&self.inner.commits).push(batch);
        self.notify(&touched);

        Ok(receipt)
    }

    async fn fetch(&self, query: &SnapshotQuery) -> MirrorResult<Vec<RemoteDocument>> {
        self.ensure_network()?;
        Ok(self.snapshot(query))
    }

    async fn subscribe(&self, query: SnapshotQuery) -> MirrorResult<SnapshotStream> {
        self.ensure_network()?;
        let (tx, rx) = mpsc::unbounded_channel();
        // Initial result set goes out before any later commit can notify.
        let mut subscribers = lock(&self.inner.subscribers);
        let _ = tx.send(self.snapshot(&query));
        subscribers.push(Subscriber { query, tx });
        Ok(rx)
    }

    fn set_network_enabled(&self, enabled: bool) {
        self.inner.network.store(enabled, Ordering::SeqCst);
    }

    fn network_enabled(&self) -> bool {
        self.inner.network.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schoolsync_engine::{Document, Operation, Student};
    use serde_json::json;

    const STAMP: &str = "2026-01-01T00:00:00.000Z";

    fn create(id: &str, school: &str) -> BatchWrite {
        let op = Operation::create(Document::Student(Student::new(id, school, "Ada", "Obi")));
        BatchWrite::from_operation(&op, STAMP)
    }

    fn batch(writes: Vec<BatchWrite>) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for write in writes {
            batch.push(write);
        }
        batch
    }

    #[tokio::test]
    async fn commit_stamps_and_stores() {
        let mirror = MemoryMirror::new();
        let receipt = mirror.commit(batch(vec![create("s1", "sch-1")])).await.unwrap();
        assert_eq!(receipt.committed, 1);

        let doc = mirror.document(Collection::Students, "s1").unwrap();
        assert_eq!(doc["syncStatus"], json!("synced"));
        assert_eq!(doc["lastUpdated"], json!(STAMP));
        assert_eq!(mirror.commit_count(), 1);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let mirror = MemoryMirror::new();
        let missing = BatchWrite::Patch {
            collection: Collection::Students,
            id: "ghost".into(),
            fields: Map::new(),
        };

        let err = mirror
            .commit(batch(vec![create("s1", "sch-1"), missing]))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Rejected { status: 404, .. }));
        assert_eq!(mirror.document_count(), 0);
        assert_eq!(mirror.commit_count(), 0);
    }

    #[tokio::test]
    async fn merge_set_keeps_unrelated_fields() {
        let mirror = MemoryMirror::new();
        let mut extra = Map::new();
        extra.insert("nickname".into(), json!("Ade"));
        mirror.put_remote(RemoteDocument::new(Collection::Students, "s1", extra));

        mirror.commit(batch(vec![create("s1", "sch-1")])).await.unwrap();
        let doc = mirror.document(Collection::Students, "s1").unwrap();
        assert_eq!(doc["nickname"], json!("Ade"));
        assert_eq!(doc["firstName"], json!("Ada"));
    }

    #[tokio::test]
    async fn disabled_network_fails_fast() {
        let mirror = MemoryMirror::new();
        mirror.set_network_enabled(false);
        assert!(matches!(
            mirror.commit(WriteBatch::new()).await,
            Err(MirrorError::NetworkDisabled)
        ));
        assert!(matches!(
            mirror.fetch(&SnapshotQuery::collection(Collection::Students)).await,
            Err(MirrorError::NetworkDisabled)
        ));
    }

    #[tokio::test]
    async fn fail_next_counts_down() {
        let mirror = MemoryMirror::new();
        mirror.fail_next(2);
        assert!(mirror.commit(batch(vec![create("s1", "sch-1")])).await.is_err());
        assert!(mirror.commit(batch(vec![create("s1", "sch-1")])).await.is_err());
        assert!(mirror.commit(batch(vec![create("s1", "sch-1")])).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_get_filtered_full_sets() {
        let mirror = MemoryMirror::new();
        let mut rx = mirror
            .subscribe(SnapshotQuery::for_school(Collection::Students, "sch-1"))
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        mirror
            .commit(batch(vec![create("s1", "sch-1"), create("s2", "sch-2")]))
            .await
            .unwrap();
        let set = rx.recv().await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "s1");

        mirror.delete_remote(Collection::Students, "s1");
        assert!(rx.recv().await.unwrap().is_empty());
    }
}
