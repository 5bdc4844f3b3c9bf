//! Reconciliation of remote snapshots with the offline cache.
//!
//! Remote snapshots are full result sets, never diffs. Merging one into the
//! cache follows a last-writer-wins rule keyed on `lastUpdated`.
//!
//! # Rules
//!
//! 1. A document with a queued local operation keeps its local value; the
//!    queue will overwrite the remote copy on the next flush.
//! 2. Otherwise the remote value replaces the cached one, unless the cached
//!    value is strictly newer.
//! 3. Remote-origin documents in the query's scope that are missing from the
//!    snapshot were deleted remotely and are removed.

use crate::{
    cache::{CachedDocument, Origin},
    Collection, DocumentId, OfflineCache, RemoteDocument, SnapshotQuery, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Outcome of merging one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Remote values written into the cache
    pub applied: Vec<DocumentId>,
    /// Documents where the local value won
    pub kept_local: Vec<DocumentId>,
    /// Documents removed because the snapshot no longer has them
    pub removed: Vec<DocumentId>,
    /// Remote documents that could not be decoded, with the reason
    pub skipped: Vec<(DocumentId, String)>,
}

impl ReconcileResult {
    /// Whether the cache changed.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty() || !self.removed.is_empty()
    }
}

/// Merges remote snapshots into an [`OfflineCache`].
pub struct Reconciler<'a> {
    cache: &'a mut OfflineCache,
    pending: &'a HashSet<(Collection, DocumentId)>,
}

impl<'a> Reconciler<'a> {
    /// `pending` is the set of documents with queued operations.
    pub fn new(cache: &'a mut OfflineCache, pending: &'a HashSet<(Collection, DocumentId)>) -> Self {
        Self { cache, pending }
    }

    fn is_pending(&self, collection: Collection, id: &str) -> bool {
        self.pending.contains(&(collection, id.to_string()))
    }

    /// Merge a full result set for `query`.
    ///
    /// `now` stamps remote documents that carry no `lastUpdated`.
    pub fn apply_snapshot(
        &mut self,
        query: &SnapshotQuery,
        snapshot: &[RemoteDocument],
        now: Timestamp,
    ) -> ReconcileResult {
        let mut result = ReconcileResult::default();
        let mut seen = BTreeSet::new();

        for remote in snapshot.iter().filter(|d| query.matches(d)) {
            seen.insert(remote.id.clone());
            self.merge_one(remote, now, &mut result);
        }

        // Anything the snapshot dropped, except unconfirmed local writes.
        let stale: Vec<DocumentId> = self
            .cache
            .matching(query)
            .into_iter()
            .filter(|c| c.origin == Origin::Remote)
            .map(|c| c.document.id().clone())
            .filter(|id| !seen.contains(id) && !self.is_pending(query.collection, id))
            .collect();

        let collection = self.cache.collection_mut(query.collection);
        for id in stale {
            if collection.remove(&id).is_some() {
                result.removed.push(id);
            }
        }

        result
    }

    fn merge_one(&mut self, remote: &RemoteDocument, now: Timestamp, result: &mut ReconcileResult) {
        if self.is_pending(remote.collection, &remote.id) {
            result.kept_local.push(remote.id.clone());
            return;
        }

        let remote_ts = remote.last_updated();
        if let (Some(cached), Some(ts)) = (self.cache.get(remote.collection, &remote.id), remote_ts) {
            if cached.last_updated > ts {
                result.kept_local.push(remote.id.clone());
                return;
            }
        }

        let document = match remote.to_document() {
            Ok(doc) => doc,
            Err(e) => {
                result.skipped.push((remote.id.clone(), e.to_string()));
                return;
            }
        };

        let cached = CachedDocument::remote(document, remote_ts.unwrap_or(now));
        if self.cache.get(remote.collection, &remote.id) != Some(&cached) {
            self.cache.collection_mut(remote.collection).insert(cached);
            result.applied.push(remote.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Student;
    use crate::{time, Document, Operation};
    use serde_json::{json, Map, Value};

    const T1: Timestamp = 1_767_225_600_000;
    const T2: Timestamp = T1 + 60_000;

    fn remote_student(id: &str, first_name: &str, ts: Timestamp) -> RemoteDocument {
        let data: Map<String, Value> = json!({
            "schoolId": "sch-1",
            "firstName": first_name,
            "lastName": "Obi",
            "lastUpdated": time::to_iso8601(ts),
            "syncStatus": "synced",
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        RemoteDocument::new(Collection::Students, id, data)
    }

    fn local_student(cache: &mut OfflineCache, id: &str, first_name: &str, ts: Timestamp) {
        let doc = Document::Student(Student::new(id, "sch-1", first_name, "Obi"));
        cache.apply_local(&Operation::create(doc), ts).unwrap();
    }

    fn first_name(cache: &OfflineCache, id: &str) -> String {
        match &cache.get(Collection::Students, id).unwrap().document {
            Document::Student(s) => s.first_name.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_fills_empty_cache() {
        let mut cache = OfflineCache::new();
        let pending = HashSet::new();
        let query = SnapshotQuery::for_school(Collection::Students, "sch-1");

        let result = Reconciler::new(&mut cache, &pending).apply_snapshot(
            &query,
            &[remote_student("s1", "Ada", T1), remote_student("s2", "Bola", T1)],
            T2,
        );

        assert_eq!(result.applied.len(), 2);
        assert!(result.changed());
        let cached = cache.get(Collection::Students, "s1").unwrap();
        assert_eq!(cached.origin, Origin::Remote);
        assert_eq!(cached.last_updated, T1);
    }

    #[test]
    fn pending_local_value_wins() {
        let mut cache = OfflineCache::new();
        local_student(&mut cache, "s1", "Local", T1);
        let pending = HashSet::from([(Collection::Students, "s1".to_string())]);

        let result = Reconciler::new(&mut cache, &pending).apply_snapshot(
            &SnapshotQuery::collection(Collection::Students),
            &[remote_student("s1", "Remote", T2)],
            T2,
        );

        assert_eq!(result.kept_local, vec!["s1".to_string()]);
        assert_eq!(first_name(&cache, "s1"), "Local");
    }

    #[test]
    fn newer_remote_replaces_cached() {
        let mut cache = OfflineCache::new();
        local_student(&mut cache, "s1", "Old", T1);
        let pending = HashSet::new();

        Reconciler::new(&mut cache, &pending).apply_snapshot(
            &SnapshotQuery::collection(Collection::Students),
            &[remote_student("s1", "New", T2)],
            T2,
        );
        assert_eq!(first_name(&cache, "s1"), "New");
    }

    #[test]
    fn strictly_newer_cache_is_kept() {
        let mut cache = OfflineCache::new();
        local_student(&mut cache, "s1", "Newer", T2);
        let pending = HashSet::new();

        let result = Reconciler::new(&mut cache, &pending).apply_snapshot(
            &SnapshotQuery::collection(Collection::Students),
            &[remote_student("s1", "Older", T1)],
            T2,
        );
        assert_eq!(result.kept_local.len(), 1);
        assert_eq!(first_name(&cache, "s1"), "Newer");
    }

    #[test]
    fn missing_remote_documents_are_removed() {
        let mut cache = OfflineCache::new();
        let pending = HashSet::new();
        let query = SnapshotQuery::collection(Collection::Students);
        let mut reconciler = Reconciler::new(&mut cache, &pending);
        reconciler.apply_snapshot(
            &query,
            &[remote_student("s1", "Ada", T1), remote_student("s2", "Bola", T1)],
            T1,
        );

        let result = reconciler.apply_snapshot(&query, &[remote_student("s1", "Ada", T1)], T2);
        assert_eq!(result.removed, vec!["s2".to_string()]);
        assert!(result.applied.is_empty());
        assert!(cache.get(Collection::Students, "s2").is_none());
    }

    #[test]
    fn unconfirmed_local_documents_survive_removal() {
        let mut cache = OfflineCache::new();
        local_student(&mut cache, "s9", "Offline", T1);
        let pending = HashSet::new();

        let result = Reconciler::new(&mut cache, &pending).apply_snapshot(
            &SnapshotQuery::collection(Collection::Students),
            &[],
            T2,
        );
        assert!(result.removed.is_empty());
        assert!(cache.get(Collection::Students, "s9").is_some());
    }

    #[test]
    fn removal_respects_query_scope() {
        let mut cache = OfflineCache::new();
        let pending = HashSet::new();
        let mut other = remote_student("s5", "Other", T1);
        other
            .data
            .insert("schoolId".into(), Value::String("sch-2".into()));

        let mut reconciler = Reconciler::new(&mut cache, &pending);
        reconciler.apply_snapshot(&SnapshotQuery::collection(Collection::Students), &[other], T1);

        let result = reconciler.apply_snapshot(
            &SnapshotQuery::for_school(Collection::Students, "sch-1"),
            &[],
            T2,
        );
        assert!(result.removed.is_empty());
        assert!(cache.get(Collection::Students, "s5").is_some());
    }

    #[test]
    fn undecodable_remote_document_is_skipped() {
        let mut cache = OfflineCache::new();
        let pending = HashSet::new();
        let broken = RemoteDocument::new(Collection::Students, "s1", Map::new());

        let result = Reconciler::new(&mut cache, &pending).apply_snapshot(
            &SnapshotQuery::collection(Collection::Students),
            &[broken],
            T1,
        );
        assert_eq!(result.skipped.len(), 1);
        assert!(cache.is_empty());
    }
}
