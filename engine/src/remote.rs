//! Wire shapes shared with the remote document store.
//!
//! Documents live at `{collection}/{documentId}`. Every write stamps
//! `lastUpdated` (ISO-8601) and `syncStatus: "synced"`.

use crate::{
    entity::validate_document_id, error::Result, time, Collection, Document, DocumentId,
    Operation, QueuedOperation, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Field holding the ISO-8601 write time.
pub const LAST_UPDATED_FIELD: &str = "lastUpdated";

/// Field holding the mirror status marker.
pub const SYNC_STATUS_FIELD: &str = "syncStatus";

/// Value written to [`SYNC_STATUS_FIELD`].
pub const SYNCED: &str = "synced";

/// Add the mirror stamps to a field map.
pub fn stamp(fields: &mut Map<String, Value>, last_updated: &str) {
    fields.insert(
        LAST_UPDATED_FIELD.to_string(),
        Value::String(last_updated.to_string()),
    );
    fields.insert(
        SYNC_STATUS_FIELD.to_string(),
        Value::String(SYNCED.to_string()),
    );
}

/// One write inside a batch commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchWrite {
    /// Set the document, merging into any existing fields when `merge` is set.
    Set {
        collection: Collection,
        id: DocumentId,
        data: Map<String, Value>,
        #[serde(default)]
        merge: bool,
    },
    /// Update fields of an existing document.
    Patch {
        collection: Collection,
        id: DocumentId,
        fields: Map<String, Value>,
    },
    /// Remove the document.
    Delete {
        collection: Collection,
        id: DocumentId,
    },
}

impl BatchWrite {
    /// Translate a queued operation: CREATE is set-with-merge, UPDATE is a
    /// partial patch, DELETE removes.
    pub fn from_operation(operation: &Operation, last_updated: &str) -> Self {
        match operation {
            Operation::Create(op) => {
                let mut data = op.document.to_fields();
                stamp(&mut data, last_updated);
                BatchWrite::Set {
                    collection: op.document.collection(),
                    id: op.document.id().clone(),
                    data,
                    merge: true,
                }
            }
            Operation::Update(op) => {
                let mut fields = op.patch.to_fields();
                stamp(&mut fields, last_updated);
                BatchWrite::Patch {
                    collection: op.patch.collection(),
                    id: op.id.clone(),
                    fields,
                }
            }
            Operation::Delete(op) => BatchWrite::Delete {
                collection: op.collection,
                id: op.id.clone(),
            },
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            BatchWrite::Set { collection, .. }
            | BatchWrite::Patch { collection, .. }
            | BatchWrite::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> &DocumentId {
        match self {
            BatchWrite::Set { id, .. } | BatchWrite::Patch { id, .. } | BatchWrite::Delete { id, .. } => {
                id
            }
        }
    }

    pub fn path(&self) -> String {
        self.collection().path(self.id())
    }

    pub fn validate(&self) -> Result<()> {
        validate_document_id(self.id())
    }
}

/// An ordered, all-or-nothing group of writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from queue entries, preserving their order.
    pub fn from_queued(entries: &[QueuedOperation], last_updated: &str) -> Self {
        Self {
            writes: entries
                .iter()
                .map(|e| BatchWrite::from_operation(&e.operation, last_updated))
                .collect(),
        }
    }

    pub fn push(&mut self, write: BatchWrite) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Collections touched by this batch.
    pub fn collections(&self) -> BTreeSet<Collection> {
        self.writes.iter().map(BatchWrite::collection).collect()
    }
}

/// Acknowledgement of a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub committed: usize,
    pub committed_at: String,
}

/// A document as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub collection: Collection,
    pub id: DocumentId,
    pub data: Map<String, Value>,
}

impl RemoteDocument {
    pub fn new(collection: Collection, id: impl Into<DocumentId>, data: Map<String, Value>) -> Self {
        Self {
            collection,
            id: id.into(),
            data,
        }
    }

    /// Parsed `lastUpdated` stamp, if present and well formed.
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.data
            .get(LAST_UPDATED_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| time::parse_iso8601(s).ok())
    }

    pub fn to_document(&self) -> Result<Document> {
        Document::from_fields(self.collection, &self.id, &self.data)
    }
}

/// Equality filter on one top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Filter by parent school.
    pub fn school(school_id: impl Into<String>) -> Self {
        Self::new("schoolId", school_id)
    }

    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        data.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

/// A collection subscription, optionally filtered by a parent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub collection: Collection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FieldFilter>,
}

impl SnapshotQuery {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            filter: None,
        }
    }

    pub fn for_school(collection: Collection, school_id: impl Into<String>) -> Self {
        Self {
            collection,
            filter: Some(FieldFilter::school(school_id)),
        }
    }

    pub fn matches(&self, doc: &RemoteDocument) -> bool {
        doc.collection == self.collection
            && self.filter.as_ref().map_or(true, |f| f.matches(&doc.data))
    }
}
