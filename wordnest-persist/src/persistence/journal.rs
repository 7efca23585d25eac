use super::indexed::{IndexedStore, newest, overflow};
use super::types::{Collection, IndexedRecord};
use crate::core::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct JournalState {
    records: HashMap<Collection, HashMap<String, IndexedRecord>>,
    files: HashMap<Collection, File>,
    /// Journals whose tail may hold a partial line
    torn: HashSet<Collection>,
}

/// Result of reading one journal back
struct Replay {
    records: HashMap<String, IndexedRecord>,
    lines: usize,
    /// File does not end on a line boundary
    torn_tail: bool,
}

/// File-backed indexed store.
///
/// Each collection is an append-only JSON-lines journal (`<name>.jsonl`),
/// synced to disk on every put and replayed into memory on open. A later line
/// for the same id replaces the earlier one. Journals holding superseded,
/// corrupted or partial lines are rewritten on open, and `prune` rewrites
/// them down to the retained records.
pub struct JournalIndexedStore {
    dir: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalIndexedStore {
    /// Create or open the journals under `dir`
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut records = HashMap::new();
        let mut files = HashMap::new();

        for collection in Collection::ALL {
            let path = Self::journal_path(&dir, collection);
            let replay = Self::replay(&path).await?;

            let file = if replay.torn_tail || replay.lines > replay.records.len() {
                info!(
                    "Compacting journal {:?}: {} lines, {} live records, torn_tail={}",
                    path,
                    replay.lines,
                    replay.records.len(),
                    replay.torn_tail
                );
                Self::rewrite(&path, &replay.records).await?
            } else {
                Self::open_append(&path).await?
            };

            info!(
                "Journal {:?} opened with {} records",
                path,
                replay.records.len()
            );
            records.insert(collection, replay.records);
            files.insert(collection, file);
        }

        Ok(Self {
            dir,
            state: Mutex::new(JournalState {
                records,
                files,
                torn: HashSet::new(),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(dir: &Path, collection: Collection) -> PathBuf {
        dir.join(format!("{}.jsonl", collection.name()))
    }

    async fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?)
    }

    async fn replay(path: &Path) -> Result<Replay> {
        let mut replay = Replay {
            records: HashMap::new(),
            lines: 0,
            torn_tail: false,
        };
        if !tokio::fs::try_exists(path).await? {
            return Ok(replay);
        }

        let contents = tokio::fs::read(path).await?;
        replay.torn_tail = contents.last().is_some_and(|&b| b != b'\n');

        for (line_no, line) in contents.split(|&b| b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            replay.lines += 1;
            match serde_json::from_slice::<IndexedRecord>(line) {
                Ok(record) => {
                    replay.records.insert(record.id.clone(), record);
                }
                Err(e) => {
                    // Torn write or foreign data; later lines are still usable
                    warn!("Skipping corrupted journal line {} in {:?}: {}", line_no + 1, path, e);
                }
            }
        }

        Ok(replay)
    }

    /// Replace a journal with one line per live record, oldest first, and
    /// return a fresh append handle
    async fn rewrite(path: &Path, records: &HashMap<String, IndexedRecord>) -> Result<File> {
        let mut ordered: Vec<&IndexedRecord> = records.values().collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut buf = Vec::new();
        for record in ordered {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let tmp_path = path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(&buf).await?;
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, path).await?;

        if let Some(parent) = path.parent() {
            let synced = match File::open(parent).await {
                Ok(dir) => dir.sync_all().await,
                Err(e) => Err(e),
            };
            if let Err(e) = synced {
                debug!("Directory sync of {:?} skipped: {}", parent, e);
            }
        }

        debug!("Journal {:?} rewritten: {} records", path, records.len());
        Self::open_append(path).await
    }

    async fn append(file: &mut File, bytes: &[u8]) -> Result<()> {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl IndexedStore for JournalIndexedStore {
    async fn put(&self, collection: Collection, record: IndexedRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if let Some(file) = state.files.get_mut(&collection) {
            let offset = file.metadata().await?.len();
            let torn = state.torn.contains(&collection);
            if torn {
                // Terminate the partial line so this record stays parseable
                line.insert(0, b'\n');
            }

            if let Err(e) = Self::append(file, &line).await {
                warn!(
                    "Journal append failed: collection={}, id={}: {}",
                    collection.name(),
                    record.id,
                    e
                );
                if let Err(trunc) = file.set_len(offset).await {
                    error!(
                        "Journal {} could not be rolled back to {} bytes: {}",
                        collection.name(),
                        offset,
                        trunc
                    );
                    state.torn.insert(collection);
                }
                return Err(e);
            }
            state.torn.remove(&collection);
        }

        debug!(
            "Journal append: collection={}, id={}, size={}",
            collection.name(),
            record.id,
            line.len()
        );
        state
            .records
            .entry(collection)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn latest(&self, collection: Collection) -> Result<Option<IndexedRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&collection)
            .and_then(|records| newest(records.values()))
            .cloned())
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.records.get(&collection).map_or(0, HashMap::len))
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.files.get_mut(&collection) {
            file.flush().await?;
            file.set_len(0).await?;
            file.sync_all().await?;
        }
        state.records.remove(&collection);
        state.torn.remove(&collection);
        info!("Journal cleared: {}", collection.name());
        Ok(())
    }

    async fn prune(&self, collection: Collection, keep: usize) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(records) = state.records.get_mut(&collection) else {
            return Ok(0);
        };
        let dropped = overflow(records, keep);
        if dropped.is_empty() {
            return Ok(0);
        }

        let mut retained = records.clone();
        for id in &dropped {
            retained.remove(id);
        }
        let path = Self::journal_path(&self.dir, collection);
        let file = Self::rewrite(&path, &retained).await?;

        *records = retained;
        state.files.insert(collection, file);
        state.torn.remove(&collection);
        info!(
            "Journal {} pruned: dropped {}, kept {}",
            collection.name(),
            dropped.len(),
            records.len()
        );
        Ok(dropped.len())
    }
}
