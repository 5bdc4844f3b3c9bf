//! Error types for the sync client.

use thiserror::Error;

/// Errors from a local key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Result type for local storage.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors from the remote mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Network calls are switched off while offline.
    #[error("remote network is disabled")]
    NetworkDisabled,

    #[error("request failed: {0}")]
    Transport(String),

    /// The remote store refused the request.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("engine error: {0}")]
    Engine(#[from] schoolsync_engine::Error),
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        MirrorError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MirrorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MirrorError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Protocol(err.to_string())
    }
}

/// Result type for mirror calls.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;

/// Errors surfaced by the coordinator.
///
/// Remote failures never appear here; they are absorbed by the queue.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The mutation itself is invalid, e.g. a score out of range.
    #[error("invalid mutation: {0}")]
    Invalid(#[from] schoolsync_engine::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Result type for coordinator calls.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MirrorError::Rejected {
            status: 400,
            message: "batch too large".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote rejected request (400): batch too large"
        );

        let err: SyncError = schoolsync_engine::Error::InvalidDocumentId("a/b".into()).into();
        assert!(err.to_string().starts_with("invalid mutation"));
    }

    #[test]
    fn layer_results_carry_their_own_error() {
        fn read(key: &str) -> StorageResult<String> {
            Err(StorageError::InvalidKey(key.into()))
        }
        fn commit() -> MirrorResult<u8> {
            Err(MirrorError::NetworkDisabled)
        }
        fn sync() -> Result<u8> {
            read("../x")?;
            Ok(commit()?)
        }

        assert!(matches!(read("a"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(commit(), Err(MirrorError::NetworkDisabled)));
        assert!(matches!(sync(), Err(SyncError::Storage(_))));
    }
}
