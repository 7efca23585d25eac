pub mod compression;
pub mod config;
pub mod core;
pub mod persistence;

// Re-export commonly used types
pub use compression::{CompressionConfig, Compressor};
pub use config::PersistConfig;
pub use core::{
    CleanupReport, FastStore, FileFastStore, MemoryFastStore, PersistError, Priority,
    QuotaConfig, QuotaMonitor, QuotaSnapshot, SessionData, SetOptions, StorageConfig,
    StorageEstimate, StorageEstimator, StorageManager, StorageStats,
};
pub use persistence::{
    BatchReport, IndexedStore, JournalIndexedStore, LifecycleEvent, MemoryIndexedStore,
    NetworkSync, PersistenceBackends, QueueConfig, QueueStatus, ServiceConfig,
    SessionPersistenceService, SimulatedNetworkSync, Visibility,
};
