pub mod error;
pub mod fast_store;
pub mod file_store;
pub mod quota;
pub mod storage_manager;
pub mod types;

pub use error::{PersistError, Result};
pub use fast_store::{FastStore, MemoryFastStore};
pub use file_store::FileFastStore;
pub use quota::{QuotaConfig, QuotaMonitor, StorageEstimate, StorageEstimator};
pub use storage_manager::{
    CACHE_PREFIX, PROGRESS_PREFIX, SESSION_PREFIX, SETTINGS_PREFIX, SetOptions, StorageConfig,
    StorageManager,
};
pub use types::{
    CleanupReport, Priority, QuotaSnapshot, SessionData, StorageStats, StoredEntry, StoredRecord,
    now_millis,
};
