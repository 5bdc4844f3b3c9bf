//! Error types for the SchoolSync engine.

use crate::Collection;
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Validation errors
    #[error("invalid document id: {0:?}")]
    InvalidDocumentId(String),

    #[error("score '{field}' out of range: {value} (allowed 0..={max})")]
    ScoreOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("collection mismatch: expected {expected}, got {actual}")]
    CollectionMismatch {
        expected: Collection,
        actual: Collection,
    },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid document data: {0}")]
    InvalidDocument(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
