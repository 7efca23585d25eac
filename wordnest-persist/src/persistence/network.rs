use crate::core::{Result, SessionData};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Best-effort remote sync hook.
///
/// Failures are logged by the caller and never fail a save.
#[async_trait]
pub trait NetworkSync: Send + Sync {
    async fn sync(&self, data: &SessionData) -> Result<()>;
}

/// Stand-in transport that only logs what it would push
#[derive(Debug, Default)]
pub struct SimulatedNetworkSync {
    pushes: AtomicU64,
}

impl SimulatedNetworkSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots "pushed" so far
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NetworkSync for SimulatedNetworkSync {
    async fn sync(&self, data: &SessionData) -> Result<()> {
        let count = self.pushes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Simulated network sync #{}: {} fields, lastSaved={:?}",
            count,
            data.fields.len(),
            data.last_saved
        );
        Ok(())
    }
}
