//! Test helper utilities: store doubles and service builders
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use wordnest_persist::core::Result;
use wordnest_persist::persistence::{Collection, IndexedRecord};
use wordnest_persist::{
    FastStore, IndexedStore, MemoryFastStore, MemoryIndexedStore, NetworkSync, PersistError,
    PersistenceBackends, ServiceConfig, SessionData, SessionPersistenceService,
};

/// Fast store that can be switched into a failing mode
pub struct SwitchableFastStore {
    pub inner: MemoryFastStore,
    pub failing: AtomicBool,
    pub set_calls: AtomicUsize,
}

impl SwitchableFastStore {
    pub fn new(failing: bool) -> Self {
        Self {
            inner: MemoryFastStore::new(1024 * 1024),
            failing: AtomicBool::new(failing),
            set_calls: AtomicUsize::new(0),
        }
    }
}

impl FastStore for SwitchableFastStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Storage("storage disabled".to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }
}

/// Indexed store that can be switched into a failing mode
#[derive(Default)]
pub struct SwitchableIndexedStore {
    pub inner: MemoryIndexedStore,
    pub failing: AtomicBool,
}

impl SwitchableIndexedStore {
    pub fn failing() -> Self {
        Self {
            inner: MemoryIndexedStore::new(),
            failing: AtomicBool::new(true),
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::IndexedStore("database closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexedStore for SwitchableIndexedStore {
    async fn put(&self, collection: Collection, record: IndexedRecord) -> Result<()> {
        self.check()?;
        self.inner.put(collection, record).await
    }

    async fn latest(&self, collection: Collection) -> Result<Option<IndexedRecord>> {
        self.check()?;
        self.inner.latest(collection).await
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        self.inner.clear(collection).await
    }

    async fn prune(&self, collection: Collection, keep: usize) -> Result<usize> {
        self.check()?;
        self.inner.prune(collection, keep).await
    }
}

/// Network hook that records every pushed snapshot
#[derive(Default)]
pub struct RecordingNetwork {
    pub pushed: Mutex<Vec<SessionData>>,
}

impl RecordingNetwork {
    /// Values of `field` in push order
    pub fn field_values(&self, field: &str) -> Vec<String> {
        self.pushed
            .lock()
            .iter()
            .filter_map(|d| d.get(field).and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl NetworkSync for RecordingNetwork {
    async fn sync(&self, data: &SessionData) -> Result<()> {
        self.pushed.lock().push(data.clone());
        Ok(())
    }
}

/// Config with timers long enough that tests drive processing explicitly
pub fn manual_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.queue.debounce = Duration::from_secs(3600);
    config.queue.retry_delay = Duration::from_secs(3600);
    config.queue.background_interval = Duration::from_secs(3600);
    config.network_enabled = true;
    config
}

/// Service over the given tiers with no estimator
pub fn create_test_service(
    fast: Arc<dyn FastStore>,
    indexed: Arc<dyn IndexedStore>,
    network: Option<Arc<dyn NetworkSync>>,
) -> SessionPersistenceService {
    SessionPersistenceService::new(
        manual_config(),
        PersistenceBackends {
            fast,
            indexed,
            network,
            estimator: None,
        },
    )
}
