use super::types::{QueuedSave, QueuedSaveSummary};
use std::collections::VecDeque;
use tracing::debug;

/// Priority-ordered write-behind queue.
///
/// Re-sorted on every insertion (high > medium > low); the sort is stable so
/// equal priorities keep insertion order.
#[derive(Debug, Default)]
pub struct SaveQueue {
    entries: VecDeque<QueuedSave>,
}

impl SaveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a save and restore priority order
    pub fn push(&mut self, save: QueuedSave) {
        debug!(
            "Queueing save {} (priority={:?}, depth={})",
            save.id,
            save.priority,
            self.entries.len() + 1
        );
        self.entries.push_back(save);
        self.entries
            .make_contiguous()
            .sort_by_key(|s| s.priority.rank());
    }

    /// Put failed saves back at the head, keeping their relative order
    pub fn requeue_front(&mut self, saves: Vec<QueuedSave>) {
        for save in saves.into_iter().rev() {
            debug!("Requeuing save {} (retry {})", save.id, save.retries);
            self.entries.push_front(save);
        }
    }

    /// Take up to `max` saves from the head
    pub fn drain_batch(&mut self, max: usize) -> Vec<QueuedSave> {
        let count = max.min(self.entries.len());
        self.entries.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any waiting save has already failed at least once
    pub fn has_retries(&self) -> bool {
        self.entries.iter().any(|s| s.retries > 0)
    }

    pub fn pending_retries(&self) -> usize {
        self.entries.iter().filter(|s| s.retries > 0).count()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn summaries(&self) -> Vec<QueuedSaveSummary> {
        self.entries
            .iter()
            .map(|s| QueuedSaveSummary {
                id: s.id.clone(),
                priority: s.priority,
                retries: s.retries,
                timestamp: s.timestamp,
            })
            .collect()
    }
}
