use crate::core::{Priority, SessionData, now_millis};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Save identifier type
pub type SaveId = String;

/// A pending save waiting in the write-behind queue
#[derive(Debug, Clone, Serialize)]
pub struct QueuedSave {
    /// Unique save identifier
    pub id: SaveId,
    /// Partial session fields to merge
    pub data: SessionData,
    /// Enqueue time, refreshed on every retry (epoch ms)
    pub timestamp: i64,
    /// Number of failed attempts so far
    pub retries: u32,
    pub priority: Priority,
}

impl QueuedSave {
    /// Create a new queued save
    pub fn new(data: SessionData, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            timestamp: now_millis(),
            retries: 0,
            priority,
        }
    }

    /// Record a failed attempt
    pub fn mark_retry(&mut self) {
        self.retries += 1;
        self.timestamp = now_millis();
    }
}

/// Write-behind queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Quiet period before a queued save is flushed
    pub debounce: Duration,
    /// Maximum saves drained per processing pass
    pub batch_size: usize,
    /// Failed attempts allowed before a save is dropped
    pub max_retries: u32,
    /// Delay before re-processing saves that failed
    pub retry_delay: Duration,
    /// Period of the background flush tick
    pub background_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            batch_size: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            background_interval: Duration::from_secs(30),
        }
    }
}

/// Indexed-store collections
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Mirrors of successful fast-store writes
    Sessions,
    /// Writes that could not reach the fast store
    Backups,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Sessions, Collection::Backups];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Backups => "backups",
        }
    }
}

/// Indexed record discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Session,
    Backup,
}

/// A session snapshot held by the indexed store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Id of the save that produced this record
    pub id: SaveId,
    pub data: SessionData,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: RecordKind,
}

/// Outcome of one queue processing pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Another pass was already in flight; nothing was done
    pub skipped: bool,
    pub committed: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.committed + self.requeued + self.dropped
    }
}

/// Summary of a queued save for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct QueuedSaveSummary {
    pub id: SaveId,
    pub priority: Priority,
    pub retries: u32,
    pub timestamp: i64,
}

/// Queue status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub is_processing: bool,
    /// Saves waiting after at least one failed attempt
    pub pending_retries: usize,
    pub entries: Vec<QueuedSaveSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queued_save_retry() {
        let mut save = QueuedSave::new(SessionData::new().with("activeTab", "quiz"), Priority::High);
        assert_eq!(save.retries, 0);
        assert!(!save.id.is_empty());

        let first = save.timestamp;
        save.mark_retry();
        assert_eq!(save.retries, 1);
        assert!(save.timestamp >= first);
    }

    #[test]
    fn test_unique_ids() {
        let a = QueuedSave::new(SessionData::new(), Priority::Low);
        let b = QueuedSave::new(SessionData::new(), Priority::Low);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_indexed_record_shape() {
        let record = IndexedRecord {
            id: "abc".to_string(),
            data: SessionData::new().with("score", 4),
            timestamp: 10,
            kind: RecordKind::Backup,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": "abc", "data": {"score": 4}, "timestamp": 10, "type": "backup"})
        );
    }
}
