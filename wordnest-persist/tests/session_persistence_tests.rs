// End-to-end session persistence tests
mod test_helper;

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use test_helper::{
    RecordingNetwork, SwitchableFastStore, SwitchableIndexedStore, create_test_service,
    manual_config,
};
use tokio::sync::mpsc;
use wordnest_persist::persistence::{CURRENT_SESSION_KEY, Collection};
use wordnest_persist::{
    FastStore, FileFastStore, IndexedStore, JournalIndexedStore, LifecycleEvent,
    MemoryFastStore, MemoryIndexedStore, PersistenceBackends, Priority, SessionData,
    SessionPersistenceService, Visibility,
};

fn memory_service() -> (SessionPersistenceService, Arc<MemoryFastStore>, Arc<MemoryIndexedStore>) {
    let fast = Arc::new(MemoryFastStore::new(5 * 1024 * 1024));
    let indexed = Arc::new(MemoryIndexedStore::new());
    let service = create_test_service(fast.clone(), indexed.clone(), None);
    (service, fast, indexed)
}

fn word_list(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("word-{:04}", i % 50)).collect()
}

#[tokio::test]
async fn test_large_snapshot_round_trip() {
    // A large, repetitive snapshot is stored compressed and restored intact
    let (service, fast, _) = memory_service();

    let snapshot = SessionData::new()
        .with("activeTab", "words")
        .with("learnedWords", json!(word_list(400)))
        .with("progress", json!({"level": 3, "stars": 42, "streak": [1, 1, 0, 1]}));

    service.queue_save(snapshot.clone(), Priority::High);
    let report = service.force_sync().await;
    assert_eq!(report.committed, 1);

    let raw = fast.get(&format!("session_{}", CURRENT_SESSION_KEY)).unwrap().unwrap();
    let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored["compressed"], json!(true));

    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.fields, snapshot.fields);
    assert!(restored.last_saved.is_some());

    println!("✅ Large snapshot stored compressed ({} bytes) and restored", raw.len());
}

#[tokio::test]
async fn test_force_sync_twice_is_idempotent() {
    let (service, _, indexed) = memory_service();

    service.queue_save(SessionData::new().with("activeTab", "quiz"), Priority::Medium);
    let first = service.force_sync().await;
    let after_first = service.load_latest_session().await.unwrap();

    let second = service.force_sync().await;
    assert_eq!(first.committed, 1);
    assert_eq!(second.attempted(), 0);
    assert_eq!(service.load_latest_session().await.unwrap(), after_first);
    assert_eq!(indexed.count(Collection::Sessions).await.unwrap(), 1);
}

#[tokio::test]
async fn test_priority_order_is_observable() {
    let network = Arc::new(RecordingNetwork::default());
    let service = create_test_service(
        Arc::new(MemoryFastStore::new(1024 * 1024)),
        Arc::new(MemoryIndexedStore::new()),
        Some(network.clone()),
    );

    service.queue_save(SessionData::new().with("label", "low"), Priority::Low);
    service.queue_save(SessionData::new().with("label", "high"), Priority::High);
    service.queue_save(SessionData::new().with("label", "medium"), Priority::Medium);

    service.force_sync().await;
    assert_eq!(network.field_values("label"), vec!["high", "medium", "low"]);
}

#[tokio::test]
async fn test_retry_ceiling_with_every_tier_down() {
    // Fast and indexed stores both fail: 1 attempt + 3 retries, then dropped
    let fast = Arc::new(SwitchableFastStore::new(true));
    let service = create_test_service(
        fast.clone(),
        Arc::new(SwitchableIndexedStore::failing()),
        None,
    );

    service.queue_save(SessionData::new().with("activeTab", "games"), Priority::High);

    let mut dropped = 0;
    for _ in 0..4 {
        dropped += service.process_queue().await.dropped;
    }

    assert_eq!(dropped, 1);
    assert_eq!(fast.set_calls.load(Ordering::SeqCst), 4);
    assert_eq!(service.get_queue_status().length, 0);

    // Nothing left to attempt
    assert_eq!(service.process_queue().await.attempted(), 0);
    assert_eq!(fast.set_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_recovery_after_transient_failure() {
    let fast = Arc::new(SwitchableFastStore::new(true));
    let indexed = Arc::new(SwitchableIndexedStore::failing());
    let service = create_test_service(fast.clone(), indexed.clone(), None);

    service.queue_save(SessionData::new().with("score", 7), Priority::Medium);
    assert_eq!(service.process_queue().await.requeued, 1);
    assert_eq!(service.get_queue_status().pending_retries, 1);

    fast.failing.store(false, Ordering::SeqCst);
    indexed.failing.store(false, Ordering::SeqCst);

    assert_eq!(service.process_queue().await.committed, 1);
    assert_eq!(
        service.load_latest_session().await.unwrap().get("score"),
        Some(&json!(7))
    );
}

#[tokio::test]
async fn test_expired_entry_is_absent_and_removed() {
    let (service, fast, _) = memory_service();
    let storage = service.storage();

    storage
        .set_item(
            "flash",
            &json!({"hint": "apple"}),
            wordnest_persist::SetOptions::default().expires_in(Duration::from_millis(10)),
        )
        .unwrap();
    assert!(storage.get_item::<serde_json::Value>("flash").is_some());

    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(storage.get_item::<serde_json::Value>("flash").is_none());
    assert!(fast.get("session_flash").unwrap().is_none());
}

#[tokio::test]
async fn test_corrupted_fast_store_entry_falls_back_to_indexed() {
    let (service, fast, _) = memory_service();

    service.queue_save(SessionData::new().with("activeTab", "words"), Priority::High);
    service.force_sync().await;

    let key = format!("session_{}", CURRENT_SESSION_KEY);
    fast.set(&key, "{\"value\": \"trunc").unwrap();

    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.get("activeTab"), Some(&json!("words")));
    assert!(fast.get(&key).unwrap().is_none());
}

#[tokio::test]
async fn test_legacy_unwrapped_snapshot_is_readable() {
    let (service, fast, _) = memory_service();

    fast.set(
        &format!("session_{}", CURRENT_SESSION_KEY),
        r#"{"activeTab":"quiz","lastSaved":1700000000000}"#,
    )
    .unwrap();

    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.get("activeTab"), Some(&json!("quiz")));
    assert_eq!(restored.last_saved, Some(1_700_000_000_000));
}

#[tokio::test]
async fn test_offline_save_survives_restart() {
    // Offline with the fast store down: the save lands in the backup journal
    let dir = tempfile::tempdir().unwrap();
    let journal_dir = dir.path().join("indexed");
    let network = Arc::new(RecordingNetwork::default());

    {
        let indexed = Arc::new(JournalIndexedStore::open(&journal_dir).await.unwrap());
        let service = create_test_service(
            Arc::new(SwitchableFastStore::new(true)),
            indexed,
            Some(network.clone()),
        );

        service.handle_lifecycle_event(LifecycleEvent::Offline).await;
        service.queue_save(
            SessionData::new().with("activeTab", "games").with("stars", 5),
            Priority::High,
        );
        let report = service.shutdown().await;
        assert_eq!(report.committed, 1);
    }
    assert!(network.pushed.lock().is_empty());

    let indexed = Arc::new(JournalIndexedStore::open(&journal_dir).await.unwrap());
    assert_eq!(indexed.count(Collection::Backups).await.unwrap(), 1);

    let service = create_test_service(
        Arc::new(MemoryFastStore::new(1024 * 1024)),
        indexed,
        None,
    );
    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.get("activeTab"), Some(&json!("games")));
    assert_eq!(restored.get("stars"), Some(&json!(5)));

    println!("✅ Offline save restored from backup journal after restart");
}

async fn open_file_service(dir: &Path) -> SessionPersistenceService {
    let backends = PersistenceBackends {
        fast: Arc::new(FileFastStore::open(dir.join("fast_store.json"), 1024 * 1024).unwrap()),
        indexed: Arc::new(JournalIndexedStore::open(dir.join("indexed")).await.unwrap()),
        network: None,
        estimator: None,
    };
    SessionPersistenceService::new(manual_config(), backends)
}

#[tokio::test]
async fn test_file_backed_stores_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let service = open_file_service(dir.path()).await;
        service.queue_save(SessionData::new().with("activeTab", "words"), Priority::Medium);
        service.queue_save(SessionData::new().with("score", 11), Priority::Low);
        service.shutdown().await;
    }

    let service = open_file_service(dir.path()).await;
    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.get("activeTab"), Some(&json!("words")));
    assert_eq!(restored.get("score"), Some(&json!(11)));

    service.clear_all_sessions().await.unwrap();
    drop(service);

    let service = open_file_service(dir.path()).await;
    assert!(service.load_latest_session().await.is_none());
}

#[tokio::test]
async fn test_offline_save_restores_from_file_store() {
    // Offline with a healthy fast store: the snapshot is read back from disk
    let dir = tempfile::tempdir().unwrap();

    {
        let service = open_file_service(dir.path()).await;
        service.handle_lifecycle_event(LifecycleEvent::Offline).await;
        assert!(!service.is_online());

        service.queue_save(SessionData::new().with("activeTab", "quiz"), Priority::High);
        assert_eq!(service.force_sync().await.committed, 1);

        let stored: SessionData = service.storage().get_item(CURRENT_SESSION_KEY).unwrap();
        assert_eq!(stored.get("activeTab"), Some(&json!("quiz")));
    }

    let on_disk = FileFastStore::open(dir.path().join("fast_store.json"), 1024 * 1024).unwrap();
    assert!(on_disk.get("session_current").unwrap().is_some());
    drop(on_disk);

    let service = open_file_service(dir.path()).await;
    let restored = service.load_latest_session().await.unwrap();
    assert_eq!(restored.get("activeTab"), Some(&json!("quiz")));
    assert!(restored.is_recent(Duration::from_secs(60)));

    println!("✅ Offline save restored from the fast-store file after restart");
}

#[tokio::test(start_paused = true)]
async fn test_debounce_collapses_rapid_saves() {
    let mut config = manual_config();
    config.queue.debounce = Duration::from_millis(1000);
    let network = Arc::new(RecordingNetwork::default());
    let service = SessionPersistenceService::new(
        config,
        PersistenceBackends {
            network: Some(network.clone()),
            ..PersistenceBackends::in_memory(1024 * 1024)
        },
    );

    for tab in ["words", "quiz", "games", "words"] {
        service.queue_save(SessionData::new().with("activeTab", tab), Priority::Medium);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(network.pushed.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(service.get_queue_status().length, 0);
    assert_eq!(network.pushed.lock().len(), 4);
    assert_eq!(
        service.load_latest_session().await.unwrap().get("activeTab"),
        Some(&json!("words"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_tick_flushes_without_events() {
    let mut config = manual_config();
    config.queue.background_interval = Duration::from_secs(30);
    let service = SessionPersistenceService::new(config, PersistenceBackends::in_memory(1024 * 1024));
    service.start();

    service.queue_save(SessionData::new().with("score", 1), Priority::Low);
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(service.get_queue_status().length, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(service.get_queue_status().length, 0);

    // Hidden pages stop ticking
    service
        .handle_lifecycle_event(LifecycleEvent::VisibilityChange(Visibility::Hidden))
        .await;
    service.queue_save(SessionData::new().with("score", 2), Priority::Low);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(service.get_queue_status().length, 1);

    service
        .handle_lifecycle_event(LifecycleEvent::VisibilityChange(Visibility::Visible))
        .await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(service.get_queue_status().length, 0);

    service.shutdown().await;
}

/// Yield to the lifecycle listener until `done` holds
async fn settle(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("lifecycle event was not handled");
}

#[tokio::test]
async fn test_lifecycle_channel_drives_service() {
    let network = Arc::new(RecordingNetwork::default());
    let service = create_test_service(
        Arc::new(MemoryFastStore::new(1024 * 1024)),
        Arc::new(MemoryIndexedStore::new()),
        Some(network.clone()),
    );
    let (tx, rx) = mpsc::channel(16);
    let listener = service.attach_lifecycle(rx);

    tx.send(LifecycleEvent::Offline).await.unwrap();
    settle(|| !service.is_online()).await;

    service.queue_save(SessionData::new().with("activeTab", "quiz"), Priority::High);
    tx.send(LifecycleEvent::PageHide).await.unwrap();
    settle(|| service.get_queue_status().length == 0).await;

    service.queue_save(SessionData::new().with("activeTab", "words"), Priority::High);
    tx.send(LifecycleEvent::Online).await.unwrap();
    drop(tx);
    listener.await.unwrap();

    assert!(service.is_online());
    assert_eq!(service.get_queue_status().length, 0);
    // Only the save processed after reconnecting reached the network
    assert_eq!(network.field_values("activeTab"), vec!["words"]);
}
