pub mod indexed;
pub mod journal;
pub mod lifecycle;
pub mod network;
pub mod queue;
pub mod service;
pub mod types;

pub use indexed::{IndexedStore, MemoryIndexedStore};
pub use journal::JournalIndexedStore;
pub use lifecycle::{LifecycleEvent, Visibility};
pub use network::{NetworkSync, SimulatedNetworkSync};
pub use queue::SaveQueue;
pub use service::{
    CURRENT_SESSION_KEY, DEFAULT_RETAINED_RECORDS, PersistenceBackends, ServiceConfig,
    SessionPersistenceService,
};
pub use types::{
    BatchReport, Collection, IndexedRecord, QueueConfig, QueueStatus, QueuedSave,
    QueuedSaveSummary, RecordKind, SaveId,
};
