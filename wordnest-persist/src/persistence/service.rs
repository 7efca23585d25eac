use super::indexed::{IndexedStore, MemoryIndexedStore};
use super::network::NetworkSync;
use super::queue::SaveQueue;
use super::types::{
    BatchReport, Collection, IndexedRecord, QueueConfig, QueueStatus, QueuedSave, RecordKind,
    SaveId,
};
use crate::core::{
    FastStore, MemoryFastStore, PersistError, Priority, QuotaConfig, QuotaMonitor, QuotaSnapshot,
    Result, SessionData, SetOptions, StorageConfig, StorageEstimator, StorageManager, now_millis,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Key of the merged session snapshot inside the session namespace
pub const CURRENT_SESSION_KEY: &str = "current";

/// Storage tiers and hooks the service writes through
pub struct PersistenceBackends {
    pub fast: Arc<dyn FastStore>,
    pub indexed: Arc<dyn IndexedStore>,
    pub network: Option<Arc<dyn NetworkSync>>,
    pub estimator: Option<Arc<dyn StorageEstimator>>,
}

impl PersistenceBackends {
    /// Memory-only tiers, no network hook
    pub fn in_memory(capacity_bytes: usize) -> Self {
        Self {
            fast: Arc::new(MemoryFastStore::new(capacity_bytes)),
            indexed: Arc::new(MemoryIndexedStore::new()),
            network: None,
            estimator: None,
        }
    }
}

/// Records kept per indexed collection once pruning kicks in
pub const DEFAULT_RETAINED_RECORDS: usize = 20;

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub quota: QuotaConfig,
    /// Attempt the network tier when online
    pub network_enabled: bool,
    /// Newest records kept per indexed collection. A collection is pruned
    /// back to this size once it holds twice as many.
    pub retained_records: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            quota: QuotaConfig::default(),
            network_enabled: false,
            retained_records: DEFAULT_RETAINED_RECORDS,
        }
    }
}

#[derive(Default)]
struct Timers {
    debounce: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    background: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        for handle in [
            self.debounce.take(),
            self.retry.take(),
            self.background.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    config: ServiceConfig,
    storage: StorageManager,
    quota: QuotaMonitor,
    indexed: Arc<dyn IndexedStore>,
    network: Option<Arc<dyn NetworkSync>>,
    queue: Mutex<SaveQueue>,
    /// Held for the duration of a processing pass
    processing: tokio::sync::Mutex<()>,
    timers: Mutex<Timers>,
    online: AtomicBool,
    started: AtomicBool,
}

/// Write-behind session persistence.
///
/// Saves are queued by priority, debounced, and written fast store first,
/// then mirrored to the indexed store and pushed to the network hook. One
/// instance is created at startup and shared by cloning; `shutdown` performs
/// the final flush.
///
/// Timers are tokio tasks, so the service must be used inside a runtime.
#[derive(Clone)]
pub struct SessionPersistenceService {
    inner: Arc<Inner>,
}

impl SessionPersistenceService {
    pub fn new(config: ServiceConfig, backends: PersistenceBackends) -> Self {
        info!(
            "Initializing session persistence: debounce={}ms, batch_size={}, max_retries={}, network={}",
            config.queue.debounce.as_millis(),
            config.queue.batch_size,
            config.queue.max_retries,
            config.network_enabled && backends.network.is_some()
        );

        let storage = StorageManager::new(backends.fast.clone(), config.storage.clone());
        let quota = QuotaMonitor::new(backends.fast, backends.estimator, config.quota.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                storage,
                quota,
                indexed: backends.indexed,
                network: backends.network,
                queue: Mutex::new(SaveQueue::new()),
                processing: tokio::sync::Mutex::new(()),
                timers: Mutex::new(Timers::default()),
                online: AtomicBool::new(true),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.inner.storage
    }

    pub fn quota(&self) -> &QuotaMonitor {
        &self.inner.quota
    }

    pub async fn check_quota(&self) -> Result<QuotaSnapshot> {
        self.inner.quota.check_quota().await
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!("Connectivity changed: online={}", online);
        }
    }

    /// Start the periodic background tick
    pub fn start(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
        self.resume_background();
        info!(
            "Background flush every {}ms",
            self.inner.config.queue.background_interval.as_millis()
        );
    }

    /// Queue a partial snapshot for saving; never blocks on I/O
    pub fn queue_save(&self, data: SessionData, priority: Priority) -> SaveId {
        let save = QueuedSave::new(data, priority);
        let id = save.id.clone();

        self.inner.queue.lock().push(save);
        self.schedule_debounce();

        id
    }

    /// Process one batch unless a pass is already in flight
    pub async fn process_queue(&self) -> BatchReport {
        let Ok(_guard) = self.inner.processing.try_lock() else {
            debug!("Queue already processing, skipping");
            return BatchReport {
                skipped: true,
                ..Default::default()
            };
        };

        self.run_batch().await
    }

    /// Caller must hold the processing lock
    async fn run_batch(&self) -> BatchReport {
        let queue_config = &self.inner.config.queue;
        let batch = self.inner.queue.lock().drain_batch(queue_config.batch_size);
        let mut report = BatchReport::default();
        if batch.is_empty() {
            return report;
        }

        debug!("Processing batch of {} saves", batch.len());
        let mut failed = Vec::new();

        for mut save in batch {
            match self.execute_save(&save).await {
                Ok(()) => report.committed += 1,
                Err(e) if save.retries < queue_config.max_retries => {
                    save.mark_retry();
                    warn!(
                        "Save {} failed (retry {}/{}): {}",
                        save.id, save.retries, queue_config.max_retries, e
                    );
                    failed.push(save);
                    report.requeued += 1;
                }
                Err(e) => {
                    error!(
                        "Dropping save {} after {} retries: {}",
                        save.id, save.retries, e
                    );
                    report.dropped += 1;
                }
            }
        }

        let has_retries = {
            let mut queue = self.inner.queue.lock();
            // TODO: front requeue can starve newer saves behind one that keeps failing
            queue.requeue_front(failed);
            queue.has_retries()
        };
        if has_retries {
            self.schedule_retry();
        }

        report
    }

    /// Write one save through the storage tiers
    pub async fn execute_save(&self, save: &QueuedSave) -> Result<()> {
        let storage = &self.inner.storage;

        let mut snapshot: SessionData = storage.get_item(CURRENT_SESSION_KEY).unwrap_or_default();
        snapshot.merge(&save.data);
        snapshot.touch(now_millis());

        self.relieve_quota_pressure().await;

        let write = || {
            storage.set_item(
                CURRENT_SESSION_KEY,
                &snapshot,
                SetOptions::with_priority(save.priority),
            )
        };
        let primary = match write() {
            Err(e) if e.is_quota_exceeded() => {
                warn!("Fast store full for save {}, sweeping before retry: {}", save.id, e);
                match self.inner.quota.sweep() {
                    Ok(report) if report.removed() > 0 => write(),
                    Ok(_) => Err(e),
                    Err(sweep_err) => {
                        warn!("Quota sweep failed for save {}: {}", save.id, sweep_err);
                        Err(e)
                    }
                }
            }
            other => other,
        };

        match primary {
            Ok(()) => {
                debug!("Save {} written to fast store", save.id);
                let record = self.indexed_record(save, &snapshot, RecordKind::Session);
                match self.inner.indexed.put(Collection::Sessions, record).await {
                    Ok(()) => self.enforce_retention(Collection::Sessions).await,
                    Err(e) => warn!("Indexed mirror failed for save {}: {}", save.id, e),
                }
            }
            Err(primary_err) => {
                warn!(
                    "Fast store write failed for save {}, falling back to indexed store: {}",
                    save.id, primary_err
                );
                let record = self.indexed_record(save, &snapshot, RecordKind::Backup);
                self.inner
                    .indexed
                    .put(Collection::Backups, record)
                    .await
                    .map_err(|fallback_err| PersistError::SaveFailed {
                        id: save.id.clone(),
                        reason: format!(
                            "fast store: {}; indexed store: {}",
                            primary_err, fallback_err
                        ),
                    })?;
                self.enforce_retention(Collection::Backups).await;
            }
        }

        self.sync_to_network(save, &snapshot).await;
        Ok(())
    }

    /// Sweep stale entries before a write when usage is past the warning level
    async fn relieve_quota_pressure(&self) {
        if let Err(e) = self.inner.quota.cleanup_if_needed().await {
            warn!("Quota cleanup before save failed: {}", e);
        }
    }

    /// Prune a collection back to `retained_records` once it has doubled
    async fn enforce_retention(&self, collection: Collection) {
        let keep = self.inner.config.retained_records;
        let count = match self.inner.indexed.count(collection).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count {} records: {}", collection.name(), e);
                return;
            }
        };
        if count <= keep.saturating_mul(2) {
            return;
        }
        match self.inner.indexed.prune(collection, keep).await {
            Ok(dropped) => debug!(
                "Pruned {} old {} records, {} kept",
                dropped,
                collection.name(),
                keep
            ),
            Err(e) => warn!("Failed to prune {}: {}", collection.name(), e),
        }
    }

    fn indexed_record(&self, save: &QueuedSave, snapshot: &SessionData, kind: RecordKind) -> IndexedRecord {
        IndexedRecord {
            id: save.id.clone(),
            data: snapshot.clone(),
            timestamp: snapshot.last_saved.unwrap_or(save.timestamp),
            kind,
        }
    }

    async fn sync_to_network(&self, save: &QueuedSave, snapshot: &SessionData) {
        if !self.inner.config.network_enabled || !self.is_online() {
            debug!("Network sync skipped for save {}", save.id);
            return;
        }
        let Some(network) = &self.inner.network else {
            return;
        };
        if let Err(e) = network.sync(snapshot).await {
            warn!("Network sync failed for save {}: {}", save.id, e);
        }
    }

    /// Flush now, bypassing the debounce window
    pub async fn force_sync(&self) -> BatchReport {
        if let Some(handle) = self.inner.timers.lock().debounce.take() {
            handle.abort();
        }
        debug!("Force sync ({} queued)", self.inner.queue.lock().len());
        self.process_queue().await
    }

    /// Restore the newest snapshot: fast store first, then the indexed store
    pub async fn load_latest_session(&self) -> Option<SessionData> {
        if let Some(session) = self.inner.storage.get_item::<SessionData>(CURRENT_SESSION_KEY) {
            return Some(session);
        }

        let mut latest: Option<IndexedRecord> = None;
        for collection in Collection::ALL {
            match self.inner.indexed.latest(collection).await {
                Ok(Some(record)) => {
                    if latest.as_ref().is_none_or(|l| record.timestamp > l.timestamp) {
                        latest = Some(record);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read {} from indexed store: {}", collection.name(), e),
            }
        }

        if let Some(record) = &latest {
            info!(
                "Restored session from indexed store ({}, save {})",
                record.kind_name(),
                record.id
            );
        }
        latest.map(|record| record.data)
    }

    /// Whether a restored snapshot is fresh enough to offer for restore
    pub fn is_session_recent(&self, session: &SessionData, max_age: Duration) -> bool {
        session.is_recent(max_age)
    }

    /// Drop queued saves and every stored session ("start fresh")
    pub async fn clear_all_sessions(&self) -> Result<()> {
        // Wait out an in-flight batch so nothing lands after the wipe
        let _guard = self.inner.processing.lock().await;

        let dropped = self.inner.queue.lock().clear();
        {
            let mut timers = self.inner.timers.lock();
            for handle in [timers.debounce.take(), timers.retry.take()].into_iter().flatten() {
                handle.abort();
            }
        }

        let removed = self.inner.storage.clear()?;
        for collection in Collection::ALL {
            self.inner.indexed.clear(collection).await?;
        }

        info!(
            "Cleared all sessions: {} queued saves dropped, {} fast-store keys removed",
            dropped, removed
        );
        Ok(())
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        let queue = self.inner.queue.lock();
        QueueStatus {
            length: queue.len(),
            is_processing: self.is_processing(),
            pending_retries: queue.pending_retries(),
            entries: queue.summaries(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.try_lock().is_err()
    }

    /// Stop timers and flush everything that can still be written
    pub async fn shutdown(&self) -> BatchReport {
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.timers.lock().abort_all();

        let _guard = self.inner.processing.lock().await;
        let mut total = BatchReport::default();
        loop {
            let report = self.run_batch().await;
            total.absorb(report);
            if report.committed == 0 || self.inner.queue.lock().is_empty() {
                break;
            }
        }
        // Retries scheduled by the final passes have nowhere left to run
        self.inner.timers.lock().abort_all();

        info!(
            "Session persistence shut down: committed={}, requeued={}, dropped={}, left={}",
            total.committed,
            total.requeued,
            total.dropped,
            self.inner.queue.lock().len()
        );
        total
    }

    fn spawn_process(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            service.process_queue().await;
        });
    }

    fn schedule_debounce(&self) {
        let service = self.clone();
        let delay = self.inner.config.queue.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached, so cancelling this timer never interrupts a batch
            service.spawn_process();
        });

        if let Some(previous) = self.inner.timers.lock().debounce.replace(handle) {
            previous.abort();
        }
    }

    fn schedule_retry(&self) {
        let service = self.clone();
        let delay = self.inner.config.queue.retry_delay;
        debug!("Scheduling retry pass in {}ms", delay.as_millis());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            service.spawn_process();
        });

        if let Some(previous) = self.inner.timers.lock().retry.replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn resume_background(&self) {
        if !self.inner.started.load(Ordering::SeqCst) {
            return;
        }

        let mut timers = self.inner.timers.lock();
        if timers.background.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let service = self.clone();
        let period = self
            .inner
            .config
            .queue
            .background_interval
            .max(Duration::from_millis(1));
        timers.background = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                service.background_tick().await;
            }
        }));
        debug!("Background tick resumed");
    }

    pub(crate) fn suspend_background(&self) {
        if let Some(handle) = self.inner.timers.lock().background.take() {
            handle.abort();
            debug!("Background tick suspended");
        }
    }

    async fn background_tick(&self) {
        if !self.inner.queue.lock().is_empty() {
            self.spawn_process();
        }

        match self.inner.quota.cleanup_if_needed().await {
            Ok(report) if report.removed() > 0 => {
                debug!("Background quota cleanup removed {} entries", report.removed())
            }
            Ok(_) => {}
            Err(e) => warn!("Background quota check failed: {}", e),
        }
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.inner.queue.lock().is_empty()
    }
}

impl IndexedRecord {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            RecordKind::Session => "session",
            RecordKind::Backup => "backup",
        }
    }
}

impl BatchReport {
    fn absorb(&mut self, other: BatchReport) {
        self.committed += other.committed;
        self.requeued += other.requeued;
        self.dropped += other.dropped;
    }
}
