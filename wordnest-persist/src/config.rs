use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::CompressionConfig;
use crate::core::{QuotaConfig, StorageConfig};
use crate::persistence::{DEFAULT_RETAINED_RECORDS, QueueConfig, ServiceConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub storage: StorageSection,
    pub queue: QueueSection,
    pub quota: QuotaSection,
    pub sync: SyncSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding the fast-store file and indexed journals
    pub data_dir: PathBuf,
    pub capacity_bytes: usize,
    pub compression_enabled: bool,
    pub compression_threshold: usize,
    pub session_prefix: String,
    /// Newest records kept per indexed collection
    pub retained_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub debounce_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub background_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub max_age_secs: u64,
    pub cleanup_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub network_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            capacity_bytes: 5 * 1024 * 1024,
            compression_enabled: true,
            compression_threshold: 1024,
            session_prefix: "session_".to_string(),
            retained_records: DEFAULT_RETAINED_RECORDS,
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            batch_size: 5,
            max_retries: 3,
            retry_delay_ms: 5000,
            background_interval_ms: 30_000,
        }
    }
}

impl Default for QuotaSection {
    fn default() -> Self {
        Self {
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            max_age_secs: 7 * 24 * 60 * 60,
            cleanup_prefixes: vec!["session_".to_string(), "cache_".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl PersistConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PersistConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be at least 1");
        }
        if self.storage.retained_records == 0 {
            anyhow::bail!("storage.retained_records must be at least 1");
        }
        if self.queue.background_interval_ms == 0 {
            anyhow::bail!("queue.background_interval_ms must be positive");
        }
        let quota = &self.quota;
        if !(0.0..=1.0).contains(&quota.warning_threshold)
            || !(0.0..=1.0).contains(&quota.critical_threshold)
            || quota.warning_threshold > quota.critical_threshold
        {
            anyhow::bail!(
                "quota thresholds must satisfy 0 <= warning ({}) <= critical ({}) <= 1",
                quota.warning_threshold,
                quota.critical_threshold
            );
        }
        Ok(())
    }

    /// Convert to StorageConfig for the session namespace
    pub fn to_storage_config(&self) -> StorageConfig {
        StorageConfig {
            key_prefix: self.storage.session_prefix.clone(),
            compression: CompressionConfig {
                enabled: self.storage.compression_enabled,
                min_payload_size: self.storage.compression_threshold,
            },
            max_age: Duration::from_secs(self.quota.max_age_secs),
        }
    }

    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            debounce: Duration::from_millis(self.queue.debounce_ms),
            batch_size: self.queue.batch_size,
            max_retries: self.queue.max_retries,
            retry_delay: Duration::from_millis(self.queue.retry_delay_ms),
            background_interval: Duration::from_millis(self.queue.background_interval_ms),
        }
    }

    pub fn to_quota_config(&self) -> QuotaConfig {
        QuotaConfig {
            capacity_bytes: self.storage.capacity_bytes,
            warning_threshold: self.quota.warning_threshold,
            critical_threshold: self.quota.critical_threshold,
            max_age: Duration::from_secs(self.quota.max_age_secs),
            cleanup_prefixes: self.quota.cleanup_prefixes.clone(),
        }
    }

    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            storage: self.to_storage_config(),
            queue: self.to_queue_config(),
            quota: self.to_quota_config(),
            network_enabled: self.sync.network_enabled,
            retained_records: self.storage.retained_records,
        }
    }

    /// Path of the fast-store file
    pub fn fast_store_path(&self) -> PathBuf {
        self.storage.data_dir.join("fast_store.json")
    }

    /// Directory of the indexed-store journals
    pub fn journal_dir(&self) -> PathBuf {
        self.storage.data_dir.join("indexed")
    }
}
