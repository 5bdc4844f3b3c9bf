//! Operation types for expressing local mutations.
//!
//! Every local write is expressed as an operation so it can be queued while
//! offline and replayed against the remote store later.

use crate::{
    entity::validate_document_id, error::Result, Collection, Document, DocumentId, Patch,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// Unique identifier for a queued operation.
pub type OperationId = String;

/// The three mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// Create (or overwrite) a whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    pub document: Document,
}

/// Merge a partial patch into an existing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
    pub id: DocumentId,
    pub patch: Patch,
}

/// Remove a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOp {
    pub collection: Collection,
    pub id: DocumentId,
}

/// A local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Operation {
    Create(CreateOp),
    Update(UpdateOp),
    Delete(DeleteOp),
}

impl Operation {
    pub fn create(document: Document) -> Self {
        Operation::Create(CreateOp { document })
    }

    pub fn update(id: impl Into<DocumentId>, patch: Patch) -> Self {
        Operation::Update(UpdateOp {
            id: id.into(),
            patch,
        })
    }

    pub fn delete(collection: Collection, id: impl Into<DocumentId>) -> Self {
        Operation::Delete(DeleteOp {
            collection,
            id: id.into(),
        })
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Create(_) => OpKind::Create,
            Operation::Update(_) => OpKind::Update,
            Operation::Delete(_) => OpKind::Delete,
        }
    }

    /// Get the collection this operation targets.
    pub fn collection(&self) -> Collection {
        match self {
            Operation::Create(op) => op.document.collection(),
            Operation::Update(op) => op.patch.collection(),
            Operation::Delete(op) => op.collection,
        }
    }

    /// Get the document ID this operation targets.
    pub fn document_id(&self) -> &DocumentId {
        match self {
            Operation::Create(op) => op.document.id(),
            Operation::Update(op) => &op.id,
            Operation::Delete(op) => &op.id,
        }
    }

    /// Remote path, `{collection}/{documentId}`.
    pub fn path(&self) -> String {
        self.collection().path(self.document_id())
    }

    /// Checks that do not need the remote store.
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Create(op) => op.document.validate(),
            Operation::Update(op) => {
                validate_document_id(&op.id)?;
                op.patch.validate()
            }
            Operation::Delete(op) => validate_document_id(&op.id),
        }
    }
}

/// An operation waiting in the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: OperationId,
    pub operation: Operation,
    /// When it was queued (milliseconds since epoch)
    pub enqueued_at: Timestamp,
    /// Failed remote attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedOperation {
    pub fn new(id: impl Into<OperationId>, operation: Operation, enqueued_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            operation,
            enqueued_at,
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.operation.kind()
    }

    pub fn collection(&self) -> Collection {
        self.operation.collection()
    }

    pub fn document_id(&self) -> &DocumentId {
        self.operation.document_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Student, StudentPatch};

    fn student(id: &str) -> Document {
        Document::Student(Student::new(id, "sch-1", "Ada", "Obi"))
    }

    #[test]
    fn operation_accessors() {
        let create = Operation::create(student("s1"));
        assert_eq!(create.kind(), OpKind::Create);
        assert_eq!(create.collection(), Collection::Students);
        assert_eq!(create.document_id(), "s1");
        assert_eq!(create.path(), "students/s1");

        let update = Operation::update("s1", Patch::Student(StudentPatch::default()));
        assert_eq!(update.kind(), OpKind::Update);
        assert_eq!(update.collection(), Collection::Students);

        let delete = Operation::delete(Collection::Classes, "c9");
        assert_eq!(delete.kind(), OpKind::Delete);
        assert_eq!(delete.path(), "classes/c9");
    }

    #[test]
    fn validate_rejects_bad_ids() {
        assert!(Operation::create(student("s1")).validate().is_ok());
        assert!(Operation::create(student("")).validate().is_err());
        assert!(Operation::delete(Collection::Students, "x/y")
            .validate()
            .is_err());
    }

    #[test]
    fn serialization_create() {
        let op = Operation::create(student("s1"));
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"CREATE\""));
        assert!(json.contains("\"collection\":\"students\""));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn serialization_delete() {
        let op = Operation::delete(Collection::Assessments, "a1");
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"DELETE\""));

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn queued_operation_defaults_retry_count() {
        let json = r#"{
            "id": "op_1",
            "operation": {"type": "DELETE", "collection": "students", "id": "s1"},
            "enqueuedAt": 1000
        }"#;
        let queued: QueuedOperation = serde_json::from_str(json).unwrap();
        assert_eq!(queued.retry_count, 0);
        assert_eq!(queued.kind(), OpKind::Delete);
        assert_eq!(queued.document_id(), "s1");
    }
}
