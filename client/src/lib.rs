//! # SchoolSync Client
//!
//! Async runtime pieces around `schoolsync-engine`: durable local storage,
//! the remote mirror clients, a network-state observer and the
//! [`SyncCoordinator`] that ties them together.
//!
//! ```no_run
//! use schoolsync_client::{connect, ClientConfig, Student};
//!
//! # async fn run() -> schoolsync_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let (sync, _tasks) = connect(&config).await?;
//!
//! sync.save_student(Student::new("s1", "sch-1", "Ada", "Obi")).await?;
//! println!("{:?}", sync.sync_status().await);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod mirror;
pub mod network;
pub mod storage;

pub use config::{ClientConfig, ConfigError};
pub use coordinator::{
    CoordinatorTasks, FlushOutcome, SkipReason, SubscriptionHandle, SyncCoordinator, SyncOptions,
    WriteOutcome,
};
pub use error::{MirrorError, Result, StorageError, SyncError};
pub use mirror::{HttpMirror, MemoryMirror, RemoteMirror, SnapshotStream};
pub use network::{NetworkObserver, NetworkState};
pub use storage::{FileStore, LocalStore, MemoryStore};

// Entity types callers need alongside the coordinator.
pub use schoolsync_engine::{
    Assessment, AssessmentPatch, ClassRoom, ClassRoomPatch, Collection, Document, Scores,
    SnapshotQuery, Student, StudentPatch, SyncStatus,
};

use std::sync::Arc;

/// Coordinator wired to the document store service.
pub type RemoteSync = SyncCoordinator<FileStore, HttpMirror>;

/// Open local state, point at the service and start the background tasks.
///
/// Starts offline; a health probe against the service flips the network
/// state, and the first `Online` transition flushes the queue.
pub async fn connect(config: &ClientConfig) -> Result<(Arc<RemoteSync>, CoordinatorTasks)> {
    let store = FileStore::open(&config.data_dir).await?;
    let mirror = HttpMirror::new(&config.remote_url, config.auth_token.clone())?;
    let network = NetworkObserver::new(NetworkState::Offline);

    let coordinator = Arc::new(
        SyncCoordinator::open(store, mirror, network, SyncOptions::from_config(config)).await?,
    );
    let mut tasks = coordinator.start();

    let probe = coordinator.network().spawn_health_probe(
        coordinator.mirror().http_client().clone(),
        coordinator.mirror().base_url(),
        config.sync_interval.min(std::time::Duration::from_secs(10)),
    );
    tasks.attach(probe);

    tracing::info!(remote = %config.remote_url, data_dir = %config.data_dir.display(), "sync client started");
    Ok((coordinator, tasks))
}
