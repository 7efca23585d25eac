use super::error::{PersistError, Result};
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Synchronous, size-limited key-value store (the fast tier).
///
/// Writes that would exceed capacity fail with `PersistError::QuotaExceeded`.
pub trait FastStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Remove several keys in one pass, returning how many existed.
    ///
    /// Durable stores override this to commit once for the whole batch.
    fn remove_many(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Bytes at rest (key + value lengths)
    fn used_bytes(&self) -> Result<usize> {
        let mut total = 0;
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                total += key.len() + value.len();
            }
        }
        Ok(total)
    }
}

#[derive(Default)]
struct MemoryState {
    data: Trie<String, String>,
    used_bytes: usize,
}

/// In-memory fast store backed by a radix trie
#[derive(Clone)]
pub struct MemoryFastStore {
    state: Arc<RwLock<MemoryState>>,
    capacity_bytes: usize,
}

impl MemoryFastStore {
    /// Create a store that holds at most `capacity_bytes` of keys and values
    pub fn new(capacity_bytes: usize) -> Self {
        info!("Initializing fast store with capacity={} bytes", capacity_bytes);

        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            capacity_bytes,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Snapshot of every entry, used by file persistence
    pub(crate) fn entries(&self) -> Vec<(String, String)> {
        let state = self.state.read();
        state
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl FastStore for MemoryFastStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read();
        Ok(state.data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.write();

        let entry_size = key.len() + value.len();
        let previous = state.data.get(key).map_or(0, |old| key.len() + old.len());
        let base = state.used_bytes - previous;

        if base + entry_size > self.capacity_bytes {
            warn!(
                "Fast store full: {}/{} bytes, rejecting {} byte write for key={}",
                state.used_bytes, self.capacity_bytes, entry_size, key
            );
            return Err(PersistError::QuotaExceeded {
                needed: entry_size,
                available: self.capacity_bytes.saturating_sub(base),
            });
        }

        debug!("SET key={}, size={}", key, entry_size);
        state.data.insert(key.to_string(), value.to_string());
        state.used_bytes = base + entry_size;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write();
        match state.data.remove(key) {
            Some(old) => {
                state.used_bytes = state.used_bytes.saturating_sub(key.len() + old.len());
                debug!("REMOVE key={}", key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state.data.keys().cloned().collect())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        // Subtries may hold siblings sharing a compressed node, so filter again
        Ok(state
            .data
            .get_raw_descendant(prefix)
            .map(|subtrie| {
                subtrie
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn used_bytes(&self) -> Result<usize> {
        Ok(self.state.read().used_bytes)
    }
}
