//! Offline cache - the local copy of every document the client knows about.
//!
//! Local mutations land here immediately, before the remote store has seen
//! them. Remote snapshots are merged in by [`crate::reconcile`].

use crate::{
    error::Result, Collection, Document, DocumentId, Error, Operation, SnapshotQuery, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where the cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written on this device and not yet confirmed remotely
    Local,
    /// Received from, or confirmed by, the remote store
    Remote,
}

/// A cached document with its write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedDocument {
    pub document: Document,
    /// Milliseconds since epoch
    pub last_updated: Timestamp,
    pub origin: Origin,
}

impl CachedDocument {
    pub fn local(document: Document, last_updated: Timestamp) -> Self {
        Self {
            document,
            last_updated,
            origin: Origin::Local,
        }
    }

    pub fn remote(document: Document, last_updated: Timestamp) -> Self {
        Self {
            document,
            last_updated,
            origin: Origin::Remote,
        }
    }
}

/// Documents of one collection, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachedCollection {
    documents: BTreeMap<DocumentId, CachedDocument>,
}

impl CachedCollection {
    pub fn get(&self, id: &str) -> Option<&CachedDocument> {
        self.documents.get(id)
    }

    pub fn insert(&mut self, cached: CachedDocument) {
        self.documents.insert(cached.document.id().clone(), cached);
    }

    pub fn remove(&mut self, id: &str) -> Option<CachedDocument> {
        self.documents.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedDocument> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// The offline record store, persisted under `offline_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfflineCache {
    collections: BTreeMap<Collection, CachedCollection>,
}

impl OfflineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, collection: Collection) -> Option<&CachedCollection> {
        self.collections.get(&collection)
    }

    pub fn collection_mut(&mut self, collection: Collection) -> &mut CachedCollection {
        self.collections.entry(collection).or_default()
    }

    pub fn get(&self, collection: Collection, id: &str) -> Option<&CachedDocument> {
        self.collections.get(&collection)?.get(id)
    }

    /// Apply a local mutation.
    ///
    /// Returns `false` when an update targets a document that is not cached;
    /// the mutation is still worth queueing since the remote may have it.
    pub fn apply_local(&mut self, operation: &Operation, now: Timestamp) -> Result<bool> {
        operation.validate()?;

        match operation {
            Operation::Create(op) => {
                self.collection_mut(op.document.collection())
                    .insert(CachedDocument::local(op.document.clone(), now));
                Ok(true)
            }
            Operation::Update(op) => {
                let collection = self.collection_mut(op.patch.collection());
                let Some(cached) = collection.documents.get_mut(&op.id) else {
                    return Ok(false);
                };
                cached.document.apply_patch(&op.patch)?;
                cached.last_updated = now;
                cached.origin = Origin::Local;
                Ok(true)
            }
            Operation::Delete(op) => Ok(self.collection_mut(op.collection).remove(&op.id).is_some()),
        }
    }

    /// Mark a document as confirmed by the remote store.
    pub fn mark_synced(&mut self, collection: Collection, id: &str) -> bool {
        match self
            .collections
            .get_mut(&collection)
            .and_then(|c| c.documents.get_mut(id))
        {
            Some(cached) => {
                cached.origin = Origin::Remote;
                true
            }
            None => false,
        }
    }

    /// Documents of a collection, optionally limited to one school.
    pub fn query(&self, collection: Collection, school_id: Option<&str>) -> Vec<&Document> {
        let Some(docs) = self.collections.get(&collection) else {
            return Vec::new();
        };
        docs.iter()
            .map(|c| &c.document)
            .filter(|d| school_id.map_or(true, |s| d.school_id() == s))
            .collect()
    }

    /// Documents matching a subscription query.
    pub fn matching(&self, query: &SnapshotQuery) -> Vec<&CachedDocument> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };
        docs.iter()
            .filter(|c| {
                query
                    .filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&c.document.to_fields()))
            })
            .collect()
    }

    /// Total cached documents.
    pub fn len(&self) -> usize {
        self.collections.values().map(CachedCollection::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}
