//! Quota Monitoring
//!
//! Estimates how much of the fast store's capacity is in use and sweeps old
//! or corrupted entries once usage crosses the warning threshold.

use super::error::Result;
use super::fast_store::FastStore;
use super::types::{CleanupReport, QuotaSnapshot, StoredEntry, now_millis};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Usage figures reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// Platform storage-estimate capability
#[async_trait]
pub trait StorageEstimator: Send + Sync {
    async fn estimate(&self) -> Result<StorageEstimate>;
}

/// Quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Assumed fast-store ceiling when no estimator is available
    pub capacity_bytes: usize,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    /// Entries older than this are swept under pressure
    pub max_age: Duration,
    /// Key prefixes the sweep is allowed to touch
    pub cleanup_prefixes: Vec<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 5 * 1024 * 1024,
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_prefixes: vec!["session_".to_string(), "cache_".to_string()],
        }
    }
}

/// Fast-store quota monitor
pub struct QuotaMonitor {
    store: Arc<dyn FastStore>,
    estimator: Option<Arc<dyn StorageEstimator>>,
    config: QuotaConfig,
}

impl QuotaMonitor {
    /// Create a new quota monitor
    pub fn new(
        store: Arc<dyn FastStore>,
        estimator: Option<Arc<dyn StorageEstimator>>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            store,
            estimator,
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Compute a fresh quota snapshot
    pub async fn check_quota(&self) -> Result<QuotaSnapshot> {
        if let Some(estimator) = &self.estimator {
            match estimator.estimate().await {
                Ok(estimate) => return Ok(self.snapshot(estimate.usage, estimate.quota)),
                Err(e) => warn!("Storage estimate unavailable, measuring store: {}", e),
            }
        }

        let used = self.store.used_bytes()? as u64;
        Ok(self.snapshot(used, self.config.capacity_bytes as u64))
    }

    fn snapshot(&self, used: u64, available: u64) -> QuotaSnapshot {
        let percentage = if available == 0 {
            1.0
        } else {
            used as f64 / available as f64
        };

        QuotaSnapshot {
            used,
            available,
            percentage,
            warning: percentage > self.config.warning_threshold,
            error: percentage > self.config.critical_threshold,
        }
    }

    /// Sweep stale entries if usage is above the warning threshold
    pub async fn cleanup_if_needed(&self) -> Result<CleanupReport> {
        let quota = self.check_quota().await?;
        if !quota.warning {
            debug!("Quota at {:.1}%, no cleanup needed", quota.percentage * 100.0);
            return Ok(CleanupReport::default());
        }

        if quota.error {
            error!(
                "Fast store critically full: {}/{} bytes ({:.1}%)",
                quota.used,
                quota.available,
                quota.percentage * 100.0
            );
        } else {
            warn!(
                "Fast store above warning threshold: {:.1}%",
                quota.percentage * 100.0
            );
        }

        let report = self.sweep()?;
        info!(
            "Quota cleanup removed {} entries ({} bytes): stale={}, expired={}, corrupted={}",
            report.removed(),
            report.bytes_freed,
            report.stale,
            report.expired,
            report.corrupted
        );
        Ok(report)
    }

    /// Remove expired, stale and unparseable entries under the cleanup prefixes
    pub fn sweep(&self) -> Result<CleanupReport> {
        let now = now_millis();
        let max_age_ms = self.config.max_age.as_millis() as i64;
        let mut report = CleanupReport::default();
        let mut doomed = Vec::new();

        for prefix in &self.config.cleanup_prefixes {
            for key in self.store.keys_with_prefix(prefix)? {
                let Some(raw) = self.store.get(&key)? else {
                    continue;
                };

                let freed = key.len() + raw.len();
                match StoredEntry::parse(&raw) {
                    Err(_) => {
                        debug!("Removing corrupted entry: {}", key);
                        doomed.push(key);
                        report.corrupted += 1;
                        report.bytes_freed += freed;
                    }
                    Ok(StoredEntry::Wrapped(record)) if record.is_expired_at(now) => {
                        doomed.push(key);
                        report.expired += 1;
                        report.bytes_freed += freed;
                    }
                    Ok(entry) => {
                        let stale = entry
                            .timestamp()
                            .is_some_and(|ts| now.saturating_sub(ts) > max_age_ms);
                        if stale {
                            debug!("Removing stale entry: {}", key);
                            doomed.push(key);
                            report.stale += 1;
                            report.bytes_freed += freed;
                        }
                    }
                }
            }
        }

        self.store.remove_many(&doomed)?;
        Ok(report)
    }
}
