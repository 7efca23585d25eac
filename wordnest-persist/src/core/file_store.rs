//! File-backed fast store
//!
//! Keeps the working set in a `MemoryFastStore` and rewrites a JSON snapshot
//! of every entry after each mutation, so stored sessions survive a restart.

use super::error::Result;
use super::fast_store::{FastStore, MemoryFastStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub struct FileFastStore {
    memory: MemoryFastStore,
    path: PathBuf,
    write_lock: Mutex<()>,
    snapshots_written: AtomicU64,
}

impl FileFastStore {
    /// Open or create the snapshot file at `path`
    pub fn open<P: AsRef<Path>>(path: P, capacity_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let memory = MemoryFastStore::new(capacity_bytes);
        let entries = Self::load_entries(&path)?;
        let count = entries.len();
        for (key, value) in entries {
            if let Err(e) = memory.set(&key, &value) {
                warn!("Dropping key={} while loading {:?}: {}", key, path, e);
            }
        }

        info!("Fast store opened at {:?} with {} entries", path, count);

        Ok(Self {
            memory,
            path,
            write_lock: Mutex::new(()),
            snapshots_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshot rewrites since open
    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written.load(Ordering::Relaxed)
    }

    fn load_entries(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(path)?;
        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Fast store snapshot {:?} unreadable, starting empty: {}", path, e);
                Ok(BTreeMap::new())
            }
        }
    }

    /// Rewrite the snapshot via a synced temp file + rename
    fn persist(&self) -> Result<()> {
        let entries: BTreeMap<String, String> = self.memory.entries().into_iter().collect();
        let json = serde_json::to_vec(&entries)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Self::sync_parent(&self.path);

        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
        debug!("Fast store snapshot written: {} entries", entries.len());
        Ok(())
    }

    /// Flush the directory entry of a rename; not supported on every platform
    fn sync_parent(path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!("Directory sync of {:?} skipped: {}", parent, e);
        }
    }
}

impl FastStore for FileFastStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.memory.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let previous = self.memory.get(key)?;
        self.memory.set(key, value)?;

        if let Err(e) = self.persist() {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => self.memory.set(key, &old)?,
                None => {
                    self.memory.remove(key)?;
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let removed = self.memory.remove(key)?;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn remove_many(&self, keys: &[String]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let removed = self.memory.remove_many(keys)?;
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.memory.keys()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.memory.keys_with_prefix(prefix)
    }

    fn used_bytes(&self) -> Result<usize> {
        self.memory.used_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast_store.json");

        {
            let store = FileFastStore::open(&path, 4096).unwrap();
            store.set("session_current", "{\"activeTab\":\"quiz\"}").unwrap();
            store.set("cache_words", "[]").unwrap();
            assert!(store.remove("cache_words").unwrap());
        }

        let reopened = FileFastStore::open(&path, 4096).unwrap();
        assert_eq!(
            reopened.get("session_current").unwrap(),
            Some("{\"activeTab\":\"quiz\"}".to_string())
        );
        assert_eq!(reopened.get("cache_words").unwrap(), None);
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast_store.json");
        fs::write(&path, "{{{ not json").unwrap();

        let store = FileFastStore::open(&path, 4096).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_replaced_without_leftover_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast_store.json");
        let store = FileFastStore::open(&path, 4096).unwrap();

        store.set("session_current", "{\"activeTab\":\"words\"}").unwrap();
        store.set("session_current", "{\"activeTab\":\"quiz\"}").unwrap();

        assert!(!path.with_extension("tmp").exists());
        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["session_current"], "{\"activeTab\":\"quiz\"}");
        assert_eq!(store.snapshots_written(), 2);
    }

    #[test]
    fn test_remove_many_rewrites_snapshot_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast_store.json");
        let store = FileFastStore::open(&path, 64 * 1024).unwrap();

        for i in 0..20 {
            store.set(&format!("cache_{}", i), "stale").unwrap();
        }
        store.set("session_current", "{}").unwrap();
        let before = store.snapshots_written();

        let keys = store.keys_with_prefix("cache_").unwrap();
        assert_eq!(store.remove_many(&keys).unwrap(), 20);
        assert_eq!(store.snapshots_written(), before + 1);

        // Nothing left to remove, nothing rewritten
        assert_eq!(store.remove_many(&keys).unwrap(), 0);
        assert_eq!(store.snapshots_written(), before + 1);

        drop(store);
        let reopened = FileFastStore::open(&path, 64 * 1024).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["session_current"]);
    }

    #[test]
    fn test_quota_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFastStore::open(dir.path().join("s.json"), 16).unwrap();

        store.set("a", "12345").unwrap();
        assert!(store.set("b", "1234567890123").unwrap_err().is_quota_exceeded());
        assert_eq!(store.get("b").unwrap(), None);
    }
}
