use super::error::{PersistError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Save / eviction priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank (lower drains first)
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(PersistError::InvalidData(format!(
                "Unknown priority: {}",
                other
            ))),
        }
    }
}

/// Fast-store wire format for a single entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Raw JSON or compressed token
    pub value: String,
    pub compressed: bool,
    /// Write time (epoch ms)
    pub timestamp: i64,
    /// Expiration time (epoch ms)
    pub expires: Option<i64>,
    pub priority: Priority,
    /// Byte length of the uncompressed JSON
    pub size: usize,
}

impl StoredRecord {
    /// Check if the record has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires.is_some_and(|expires| now >= expires)
    }

    /// Age of the record relative to `now`
    pub fn age_at(&self, now: i64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.timestamp).max(0) as u64)
    }
}

/// A raw fast-store value resolved at read time.
///
/// Values written before records were wrapped are kept readable as `Legacy`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StoredEntry {
    Wrapped(StoredRecord),
    Legacy(Value),
}

impl StoredEntry {
    /// Parse a raw stored string
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write timestamp, wrapped or embedded in a legacy object
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Wrapped(record) => Some(record.timestamp),
            Self::Legacy(value) => value
                .get("timestamp")
                .or_else(|| value.get("lastSaved"))
                .and_then(Value::as_i64),
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Self::Wrapped(record) => record.priority,
            Self::Legacy(_) => Priority::Low,
        }
    }
}

/// Per-namespace storage statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    /// Number of entries under the namespace
    pub item_count: usize,
    /// Bytes at rest (keys + stored values)
    pub total_size: usize,
    /// Bytes before compression
    pub original_size: usize,
    pub compressed_items: usize,
    /// original / stored payload bytes (1.0 when nothing is compressed)
    pub compression_ratio: f64,
}

/// Outcome of a cleanup or eviction sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired: usize,
    pub stale: usize,
    pub corrupted: usize,
    pub evicted: usize,
    pub bytes_freed: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.stale + self.corrupted + self.evicted
    }
}

/// Point-in-time view of fast-store capacity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub available: u64,
    /// used / available, 0.0 ..= 1.0+
    pub percentage: f64,
    pub warning: bool,
    pub error: bool,
}

/// A learner's session snapshot.
///
/// Only `lastSaved` is interpreted here; every other field belongs to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(rename = "lastSaved", default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<i64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlay `partial` onto this snapshot, field by field
    pub fn merge(&mut self, partial: &SessionData) {
        for (key, value) in &partial.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        if let Some(saved) = partial.last_saved {
            self.touch(saved);
        }
    }

    /// Advance `lastSaved`, never moving it backwards
    pub fn touch(&mut self, at: i64) {
        self.last_saved = Some(self.last_saved.map_or(at, |prev| prev.max(at)));
    }

    /// Whether the snapshot was saved within `max_age`, for restore prompts
    pub fn is_recent(&self, max_age: Duration) -> bool {
        self.last_saved
            .is_some_and(|saved| now_millis().saturating_sub(saved) <= max_age.as_millis() as i64)
    }
}

impl TryFrom<Value> for SessionData {
    type Error = PersistError;

    fn try_from(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PersistError::InvalidData(
                "Session data must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}
