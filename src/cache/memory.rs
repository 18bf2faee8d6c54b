use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{cache_key, CacheResult, CacheSink, Error};
use crate::state::changes::ChangeKind;
use crate::state::{CanonicalRecord, ChangeSet, Snapshot};

const PREFIX: &str = "memory";

#[derive(Debug, Default)]
struct Mirror {
    records: BTreeMap<String, Arc<CanonicalRecord>>,
    version: u64,
    replacements: usize,
    operations: usize,
    fail_next: u32,
}

/// A cache held in process memory. Can be told to fail, to stand in for an
/// unreachable cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    mirror: Mutex<Mirror>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` operations fail.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replacements(&self) -> usize {
        self.lock().replacements
    }

    /// Calls made, successful or not.
    pub fn operations(&self) -> usize {
        self.lock().operations
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().records.keys().cloned().collect()
    }

    pub fn record(&self, key: &str) -> Option<Arc<CanonicalRecord>> {
        self.lock().records.get(key).cloned()
    }

    fn check(mirror: &mut Mirror) -> CacheResult<()> {
        mirror.operations += 1;
        if mirror.fail_next > 0 {
            mirror.fail_next -= 1;
            return Err(Error::Unavailable("memory cache told to fail".to_string()));
        }
        Ok(())
    }

    fn apply_now(&self, changes: &ChangeSet) -> CacheResult<()> {
        let mut mirror = self.lock();
        Self::check(&mut mirror)?;

        for change in &changes.changes {
            let key = cache_key(PREFIX, &change.key);
            match (change.kind, &change.record) {
                (ChangeKind::Removed, _) | (_, None) => {
                    mirror.records.remove(&key);
                }
                (_, Some(record)) => {
                    mirror.records.insert(key, record.clone());
                }
            }
        }
        mirror.version = changes.version;
        Ok(())
    }

    fn replace_now(&self, snapshot: &Snapshot) -> CacheResult<()> {
        let mut mirror = self.lock();
        Self::check(&mut mirror)?;

        mirror.records = snapshot
            .records_by_type()
            .records()
            .map(|r| (cache_key(PREFIX, &r.key), r.clone()))
            .collect();
        mirror.version = snapshot.version();
        mirror.replacements += 1;
        Ok(())
    }
}

impl CacheSink for MemoryCache {
    fn apply(&self, changes: &ChangeSet) -> impl Future<Output = CacheResult<()>> + Send {
        std::future::ready(self.apply_now(changes))
    }

    fn replace_all(&self, snapshot: &Snapshot) -> impl Future<Output = CacheResult<()>> + Send {
        std::future::ready(self.replace_now(snapshot))
    }
}
