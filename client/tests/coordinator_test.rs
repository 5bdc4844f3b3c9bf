//! Integration tests for persistence, subscriptions and network transitions.

use schoolsync_client::{
    ClassRoom, Collection, Document, FileStore, LocalStore, MemoryMirror, MemoryStore,
    NetworkObserver, NetworkState, RemoteMirror, SnapshotQuery, Student, SyncCoordinator,
    SyncOptions, WriteOutcome,
};
use schoolsync_engine::{time, RemoteDocument, LAST_SYNC_KEY, OFFLINE_DATA_KEY, SYNC_QUEUE_KEY};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn student(id: &str) -> Student {
    Student::new(id, "sch-1", "Ada", "Obi")
}

fn remote_student(id: &str, school: &str, first_name: &str) -> RemoteDocument {
    let data = json!({
        "schoolId": school,
        "firstName": first_name,
        "lastName": "Obi",
        "lastUpdated": time::to_iso8601(time::now_millis()),
        "syncStatus": "synced",
    });
    let data: Map<String, Value> = data.as_object().cloned().unwrap();
    RemoteDocument::new(Collection::Students, id, data)
}

/// Poll until `check` holds or a second passes.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn queue_and_cache_survive_a_restart() {
    let dir = TempDir::new().unwrap();

    {
        let store = FileStore::open(dir.path()).await.unwrap();
        let coordinator = SyncCoordinator::open(
            store,
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Offline),
            SyncOptions::default(),
        )
        .await
        .unwrap();
        coordinator.save_student(student("s1")).await.unwrap();
        coordinator
            .save_class(ClassRoom::new("c1", "sch-1", "JSS 1A", "JSS1"))
            .await
            .unwrap();
    }

    let store = FileStore::open(dir.path()).await.unwrap();
    let coordinator = SyncCoordinator::open(
        store,
        MemoryMirror::new(),
        NetworkObserver::new(NetworkState::Offline),
        SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(coordinator.sync_status().await.queue_length, 2);
    assert!(coordinator.document(Collection::Students, "s1").await.is_some());
    assert_eq!(coordinator.documents(Collection::Classes, Some("sch-1")).await.len(), 1);
}

#[tokio::test]
async fn corrupt_local_state_loads_empty() {
    let store = MemoryStore::new();
    store.set(SYNC_QUEUE_KEY, "not json").await.unwrap();
    store.set(OFFLINE_DATA_KEY, "{\"students\":").await.unwrap();
    store.set(LAST_SYNC_KEY, "\"yesterday\"").await.unwrap();

    let coordinator = SyncCoordinator::open(
        store,
        MemoryMirror::new(),
        NetworkObserver::new(NetworkState::Offline),
        SyncOptions::default(),
    )
    .await
    .unwrap();

    let status = coordinator.sync_status().await;
    assert_eq!(status.queue_length, 0);
    assert!(status.last_sync.is_none());
    assert!(coordinator.documents(Collection::Students, None).await.is_empty());

    // The next write replaces the unreadable blob.
    coordinator.save_student(student("s1")).await.unwrap();
    let raw = coordinator.store().get(SYNC_QUEUE_KEY).await.unwrap().unwrap();
    assert!(raw.starts_with('['));
}

// =============================================================================
// Write-through
// =============================================================================

#[tokio::test]
async fn online_writes_skip_the_queue() {
    let coordinator = SyncCoordinator::open(
        MemoryStore::new(),
        MemoryMirror::new(),
        NetworkObserver::new(NetworkState::Online),
        SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        coordinator.save_student(student("s1")).await.unwrap(),
        WriteOutcome::Synced
    );
    assert_eq!(
        coordinator.delete_student("s1").await.unwrap(),
        WriteOutcome::Synced
    );
    assert_eq!(coordinator.sync_status().await.queue_length, 0);
    assert!(coordinator.mirror().document(Collection::Students, "s1").is_none());
    assert!(coordinator.document(Collection::Students, "s1").await.is_none());
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn subscription_delivers_cached_then_remote_sets() {
    let coordinator = Arc::new(
        SyncCoordinator::open(
            MemoryStore::new(),
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Online),
            SyncOptions::default(),
        )
        .await
        .unwrap(),
    );
    coordinator.mirror().put_remote(remote_student("s9", "sch-1", "Chidi"));
    coordinator.mirror().put_remote(remote_student("x1", "sch-2", "Other"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = coordinator
        .subscribe(
            SnapshotQuery::for_school(Collection::Students, "sch-1"),
            move |docs: Vec<Document>| {
                let _ = tx.send(docs);
            },
        )
        .await;

    // Cached view first: nothing yet.
    assert!(rx.recv().await.unwrap().is_empty());

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id(), "s9");
    assert!(coordinator.document(Collection::Students, "s9").await.is_some());

    coordinator.mirror().put_remote(remote_student("s10", "sch-1", "Ngozi"));
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.len(), 2);

    coordinator.mirror().delete_remote(Collection::Students, "s9");
    let third = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third.len(), 1);
    assert!(coordinator.document(Collection::Students, "s9").await.is_none());
}

#[tokio::test]
async fn pending_local_edit_wins_over_snapshot() {
    let coordinator = Arc::new(
        SyncCoordinator::open(
            MemoryStore::new(),
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Offline),
            SyncOptions::default(),
        )
        .await
        .unwrap(),
    );
    coordinator.save_student(student("s1")).await.unwrap();

    let query = SnapshotQuery::collection(Collection::Students);
    let merged = coordinator
        .apply_snapshot(&query, &[remote_student("s1", "sch-1", "Remote")])
        .await;
    assert_eq!(merged.len(), 1);
    match &merged[0] {
        Document::Student(s) => assert_eq!(s.first_name, "Ada"),
        other => panic!("unexpected {other:?}"),
    }

    // An empty snapshot does not remove an unconfirmed local write either.
    let merged = coordinator.apply_snapshot(&query, &[]).await;
    assert_eq!(merged.len(), 1);
}

// =============================================================================
// Network transitions
// =============================================================================

#[tokio::test]
async fn reconnect_flushes_the_queue() {
    let coordinator = Arc::new(
        SyncCoordinator::open(
            MemoryStore::new(),
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Offline),
            SyncOptions::default(),
        )
        .await
        .unwrap(),
    );
    let _tasks = coordinator.start();

    coordinator.save_student(student("s1")).await.unwrap();
    coordinator.save_student(student("s2")).await.unwrap();
    assert_eq!(coordinator.sync_status().await.queue_length, 2);

    coordinator.network().set_online();
    let drained = eventually(|| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.sync_status().await.queue_length == 0 }
    })
    .await;
    assert!(drained);
    assert_eq!(coordinator.mirror().commit_count(), 1);
    assert!(coordinator.mirror().network_enabled());

    coordinator.network().set_offline();
    let disabled = eventually(|| {
        let coordinator = Arc::clone(&coordinator);
        async move { !coordinator.mirror().network_enabled() }
    })
    .await;
    assert!(disabled);
}

#[tokio::test]
async fn going_online_right_after_start_still_flushes() {
    let coordinator = Arc::new(
        SyncCoordinator::open(
            MemoryStore::new(),
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Offline),
            SyncOptions::default(),
        )
        .await
        .unwrap(),
    );
    coordinator.save_student(student("s1")).await.unwrap();
    assert!(!coordinator.mirror().network_enabled());

    // No await between the two calls, so the watcher has not run yet.
    let _tasks = coordinator.start();
    coordinator.network().set_online();

    let drained = eventually(|| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.sync_status().await.queue_length == 0 }
    })
    .await;
    assert!(drained);
    assert!(coordinator.mirror().document(Collection::Students, "s1").is_some());
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_periodically() {
    let options = SyncOptions {
        sync_interval: Duration::from_secs(30),
        ..SyncOptions::default()
    };
    let coordinator = Arc::new(
        SyncCoordinator::open(
            MemoryStore::new(),
            MemoryMirror::new(),
            NetworkObserver::new(NetworkState::Online),
            options,
        )
        .await
        .unwrap(),
    );
    coordinator.mirror().fail_next(1);
    coordinator.save_student(student("s1")).await.unwrap();
    assert_eq!(coordinator.sync_status().await.queue_length, 1);

    let _tasks = coordinator.start();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(coordinator.sync_status().await.queue_length, 0);
}
