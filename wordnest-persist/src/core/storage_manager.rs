use super::error::Result;
use super::fast_store::FastStore;
use super::types::{
    CleanupReport, Priority, StorageStats, StoredEntry, StoredRecord, now_millis,
};
use crate::compression::{CompressionConfig, Compressor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Well-known fast-store namespaces
pub const SESSION_PREFIX: &str = "session_";
pub const CACHE_PREFIX: &str = "cache_";
pub const SETTINGS_PREFIX: &str = "settings_";
pub const PROGRESS_PREFIX: &str = "progress_";

/// Configuration for one storage namespace
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub key_prefix: String,
    pub compression: CompressionConfig,
    /// Low-priority entries older than this are removed by `cleanup`
    pub max_age: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: SESSION_PREFIX.to_string(),
            compression: CompressionConfig::default(),
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Per-write options for `StorageManager::set_item`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Force compression on or off; `None` applies the size threshold
    pub compress: Option<bool>,
    /// Time to live from the moment of the write
    pub expires: Option<Duration>,
    pub priority: Priority,
}

impl SetOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires = Some(ttl);
        self
    }
}

/// Namespaced wrapper over the fast store.
///
/// Adds compression, per-entry expiration and priority-aware eviction.
/// Every read re-validates what is at rest, since other writers share the
/// store.
#[derive(Clone)]
pub struct StorageManager {
    store: Arc<dyn FastStore>,
    compressor: Compressor,
    prefix: String,
    max_age: Duration,
}

impl StorageManager {
    pub fn new(store: Arc<dyn FastStore>, config: StorageConfig) -> Self {
        Self {
            store,
            compressor: Compressor::new(config.compression),
            prefix: config.key_prefix,
            max_age: config.max_age,
        }
    }

    /// Manager for `prefix` with default compression settings
    pub fn with_prefix(store: Arc<dyn FastStore>, prefix: &str) -> Self {
        Self::new(
            store,
            StorageConfig {
                key_prefix: prefix.to_string(),
                ..Default::default()
            },
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Serialize and store `value` under `key`.
    ///
    /// A full store triggers one eviction sweep and one retry; a second
    /// failure is returned to the caller.
    pub fn set_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let size = json.len();

        let (value, compressed) = match options.compress {
            Some(true) => (self.compressor.compress(&json), true),
            Some(false) => (json, false),
            None if self.compressor.should_compress(size) => {
                let token = self.compressor.compress(&json);
                // Short or high-entropy payloads can grow under the coder
                if token.len() < size {
                    (token, true)
                } else {
                    (json, false)
                }
            }
            None => (json, false),
        };

        let now = now_millis();
        let record = StoredRecord {
            value,
            compressed,
            timestamp: now,
            expires: options.expires.map(|ttl| {
                now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
            }),
            priority: options.priority,
            size,
        };
        let raw = serde_json::to_string(&record)?;
        let full_key = self.full_key(key);

        debug!(
            "SET key={}, size={}, stored={}, compressed={}",
            full_key,
            size,
            raw.len(),
            compressed
        );

        match self.store.set(&full_key, &raw) {
            Err(e) if e.is_quota_exceeded() => {
                warn!("Fast store full writing {}, evicting: {}", full_key, e);
                let report = self.evict(full_key.len() + raw.len())?;
                info!(
                    "Evicted {} entries ({} bytes) to make room for {}",
                    report.removed(),
                    report.bytes_freed,
                    full_key
                );
                self.store.set(&full_key, &raw)
            }
            other => other,
        }
    }

    /// Read and deserialize `key`.
    ///
    /// Expired and unreadable entries are deleted and reported as absent.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let raw = match self.store.get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", full_key, e);
                return None;
            }
        };

        match self.decode(&raw) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!("Key expired: {}", full_key);
                self.discard(&full_key);
                None
            }
            Err(e) => {
                warn!("Removing corrupted entry {}: {}", full_key, e);
                self.discard(&full_key);
                None
            }
        }
    }

    /// `Ok(None)` means the entry has expired
    fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<Option<T>> {
        match StoredEntry::parse(raw)? {
            StoredEntry::Legacy(value) => Ok(Some(serde_json::from_value(value)?)),
            StoredEntry::Wrapped(record) => {
                if record.is_expired() {
                    return Ok(None);
                }
                let payload = if record.compressed {
                    self.compressor.decompress(&record.value)
                } else {
                    record.value
                };
                Ok(Some(serde_json::from_str(&payload)?))
            }
        }
    }

    fn discard(&self, full_key: &str) {
        if let Err(e) = self.store.remove(full_key) {
            warn!("Failed to remove {}: {}", full_key, e);
        }
    }

    pub fn remove_item(&self, key: &str) -> Result<bool> {
        self.store.remove(&self.full_key(key))
    }

    /// Remove every key in this namespace
    pub fn clear(&self) -> Result<usize> {
        let keys = self.store.keys_with_prefix(&self.prefix)?;
        let count = self.store.remove_many(&keys)?;
        debug!("Cleared {} keys under {}", count, self.prefix);
        Ok(count)
    }

    /// Keys in this namespace, without the prefix
    pub fn get_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix(&self.prefix)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Entries in this namespace with their size at rest; `None` when unparseable
    fn scan(&self) -> Result<Vec<(String, usize, Option<StoredEntry>)>> {
        let mut entries = Vec::new();
        for key in self.store.keys_with_prefix(&self.prefix)? {
            if let Some(raw) = self.store.get(&key)? {
                let size = key.len() + raw.len();
                let parsed = StoredEntry::parse(&raw).ok();
                entries.push((key, size, parsed));
            }
        }
        Ok(entries)
    }

    /// Drop expired, corrupted and aged-out low-priority entries
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let now = now_millis();
        let max_age_ms = self.max_age.as_millis() as i64;
        let mut report = CleanupReport::default();
        let mut doomed = Vec::new();

        for (key, size, parsed) in self.scan()? {
            match parsed {
                None => report.corrupted += 1,
                Some(StoredEntry::Wrapped(record)) if record.is_expired_at(now) => {
                    report.expired += 1
                }
                Some(entry)
                    if entry.priority() == Priority::Low
                        && entry
                            .timestamp()
                            .is_some_and(|ts| now.saturating_sub(ts) > max_age_ms) =>
                {
                    report.stale += 1
                }
                Some(_) => continue,
            }

            doomed.push(key);
            report.bytes_freed += size;
        }
        self.store.remove_many(&doomed)?;

        if report.removed() > 0 {
            info!(
                "Cleanup of {} removed {} entries ({} bytes)",
                self.prefix,
                report.removed(),
                report.bytes_freed
            );
        }
        Ok(report)
    }

    /// Free at least `needed` bytes: expired and corrupted entries first, then
    /// low- and medium-priority entries oldest first. High-priority entries
    /// are never evicted.
    pub fn evict(&self, needed: usize) -> Result<CleanupReport> {
        let now = now_millis();
        let mut report = CleanupReport::default();
        let mut candidates = Vec::new();
        let mut doomed = Vec::new();

        for (key, size, parsed) in self.scan()? {
            match parsed {
                None => {
                    doomed.push(key);
                    report.corrupted += 1;
                    report.bytes_freed += size;
                }
                Some(StoredEntry::Wrapped(record)) if record.is_expired_at(now) => {
                    doomed.push(key);
                    report.expired += 1;
                    report.bytes_freed += size;
                }
                Some(entry) if entry.priority() != Priority::High => {
                    let timestamp = entry.timestamp().unwrap_or(0);
                    candidates.push((entry.priority(), timestamp, key, size));
                }
                Some(_) => {}
            }
        }

        // Low before medium, oldest first within a priority
        candidates.sort_by(|a, b| {
            b.0.rank()
                .cmp(&a.0.rank())
                .then_with(|| a.1.cmp(&b.1))
        });

        for (priority, _, key, size) in candidates {
            if report.bytes_freed >= needed {
                break;
            }
            debug!("Evicting {:?} priority entry: {}", priority, key);
            doomed.push(key);
            report.evicted += 1;
            report.bytes_freed += size;
        }
        self.store.remove_many(&doomed)?;

        Ok(report)
    }

    /// Item count, sizes and compression ratio for this namespace
    pub fn get_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        let mut stored_payload = 0usize;

        for (_, size, parsed) in self.scan()? {
            stats.item_count += 1;
            stats.total_size += size;
            match parsed {
                Some(StoredEntry::Wrapped(record)) => {
                    stats.original_size += record.size;
                    stored_payload += record.value.len();
                    if record.compressed {
                        stats.compressed_items += 1;
                    }
                }
                _ => {
                    stats.original_size += size;
                    stored_payload += size;
                }
            }
        }

        stats.compression_ratio = self
            .compressor
            .compression_ratio(stats.original_size, stored_payload);
        Ok(stats)
    }
}
