use super::types::{Collection, IndexedRecord};
use crate::core::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Transactional backup store (the indexed tier).
///
/// Records are keyed by save id within a collection and queried by timestamp.
#[async_trait]
pub trait IndexedStore: Send + Sync {
    /// Insert or replace a record
    async fn put(&self, collection: Collection, record: IndexedRecord) -> Result<()>;

    /// Record with the greatest timestamp, if any
    async fn latest(&self, collection: Collection) -> Result<Option<IndexedRecord>>;

    async fn count(&self, collection: Collection) -> Result<usize>;

    /// Remove every record in a collection
    async fn clear(&self, collection: Collection) -> Result<()>;

    /// Keep only the `keep` newest records of a collection, returning how
    /// many were dropped
    async fn prune(&self, collection: Collection, keep: usize) -> Result<usize>;
}

pub(crate) fn newest<'a, I>(records: I) -> Option<&'a IndexedRecord>
where
    I: IntoIterator<Item = &'a IndexedRecord>,
{
    records.into_iter().max_by_key(|r| r.timestamp)
}

/// Ids beyond the `keep` newest records, newest first by timestamp then id
pub(crate) fn overflow(records: &HashMap<String, IndexedRecord>, keep: usize) -> Vec<String> {
    if records.len() <= keep {
        return Vec::new();
    }
    let mut ordered: Vec<&IndexedRecord> = records.values().collect();
    ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    ordered
        .into_iter()
        .skip(keep)
        .map(|record| record.id.clone())
        .collect()
}

/// In-memory indexed store
#[derive(Clone, Default)]
pub struct MemoryIndexedStore {
    collections: Arc<RwLock<HashMap<Collection, HashMap<String, IndexedRecord>>>>,
}

impl MemoryIndexedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexedStore for MemoryIndexedStore {
    async fn put(&self, collection: Collection, record: IndexedRecord) -> Result<()> {
        let mut collections = self.collections.write();
        collections
            .entry(collection)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn latest(&self, collection: Collection) -> Result<Option<IndexedRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(&collection)
            .and_then(|records| newest(records.values()))
            .cloned())
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let collections = self.collections.read();
        Ok(collections.get(&collection).map_or(0, HashMap::len))
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        self.collections.write().remove(&collection);
        Ok(())
    }

    async fn prune(&self, collection: Collection, keep: usize) -> Result<usize> {
        let mut collections = self.collections.write();
        let Some(records) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let dropped = overflow(records, keep);
        for id in &dropped {
            records.remove(id);
        }
        Ok(dropped.len())
    }
}
