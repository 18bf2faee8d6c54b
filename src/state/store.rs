use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::changes::{Change, ChangeKind, ChangeLog, ChangeSet, ChangesSince};
use super::key::{EntityKey, FeedType, Payload, SourceId};
use super::snapshot::{Snapshot, SnapshotPublisher, Tables};
use crate::config::{OverlapPolicy, StoreConfig, Ttls};
use crate::gtfs::structure::realtime::feed_header::Incrementality;

/// Current truth about one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub key: EntityKey,
    pub payload: Payload,
    /// Source that last wrote the record, and so owns it.
    pub source: SourceId,
    /// Header timestamp of the message that last wrote the record.
    pub source_timestamp: DateTime<Utc>,
    /// Local ingest time of that write.
    pub observed_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Equal apart from when it was observed.
    pub fn same_content(&self, other: &CanonicalRecord) -> bool {
        self.key == other.key
            && self.source == other.source
            && self.source_timestamp == other.source_timestamp
            && self.payload == other.payload
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntityOp {
    Upsert(EntityKey, Payload),
    /// Deleted entities need not carry a payload, so the feed type may be unknown.
    Delete {
        id: String,
        feed_type: Option<FeedType>,
    },
}

/// One validated message, ready to be applied in a single critical section.
#[derive(Clone, Debug)]
pub struct Batch {
    pub source: SourceId,
    pub header_timestamp: DateTime<Utc>,
    pub incrementality: Incrementality,
    pub ops: Vec<EntityOp>,
}

#[derive(Clone, Debug)]
pub struct Applied {
    /// Version after the batch; unchanged when the batch changed nothing.
    pub version: u64,
    pub changes: Option<Arc<ChangeSet>>,
    pub conflicts: usize,
}

/// The batch is older than what its source already applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleBatch {
    pub last_applied: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    tables: Tables,
    version: u64,
    cursors: HashMap<SourceId, DateTime<Utc>>,
    log: ChangeLog,
}

/// Owner of canonical state. All mutation goes through one mutex-guarded
/// critical section per batch; reads go through the snapshot publisher and never
/// take the lock.
#[derive(Debug)]
pub struct CanonicalStore {
    inner: Mutex<Inner>,
    publisher: SnapshotPublisher,
    overlap: OverlapPolicy,
    sync: Option<UnboundedSender<Arc<ChangeSet>>>,
}

impl Default for CanonicalStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl CanonicalStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: Tables::default(),
                version: 0,
                cursors: HashMap::new(),
                log: ChangeLog::new(config.change_log_capacity),
            }),
            publisher: SnapshotPublisher::new(),
            overlap: config.overlap,
            sync: None,
        }
    }

    /// Every committed change-set is also sent here, in version order.
    pub fn with_sync(mut self, sync: UnboundedSender<Arc<ChangeSet>>) -> Self {
        self.sync = Some(sync);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply_change_set(
        &self,
        batch: Batch,
        observed_at: DateTime<Utc>,
    ) -> Result<Applied, StaleBatch> {
        let mut inner = self.lock();

        if let Some(last_applied) = inner.cursors.get(&batch.source) {
            if batch.header_timestamp < *last_applied {
                return Err(StaleBatch {
                    last_applied: *last_applied,
                });
            }
        }

        let mut working = Working::new(inner.tables.clone());
        let mut conflicts = 0;

        // A replacement covers only the feed types the message carries.
        if batch.incrementality == Incrementality::FullDataset {
            let present: HashSet<&EntityKey> = batch
                .ops
                .iter()
                .filter_map(|op| match op {
                    EntityOp::Upsert(key, _) => Some(key),
                    EntityOp::Delete { .. } => None,
                })
                .collect();

            let scope: HashSet<FeedType> = batch
                .ops
                .iter()
                .filter_map(|op| match op {
                    EntityOp::Upsert(key, _) => Some(key.feed_type),
                    EntityOp::Delete { feed_type, .. } => *feed_type,
                })
                .collect();

            let omitted: Vec<EntityKey> = inner
                .tables
                .records()
                .filter(|r| {
                    r.source == batch.source
                        && scope.contains(&r.key.feed_type)
                        && !present.contains(&r.key)
                })
                .map(|r| r.key.clone())
                .collect();

            for key in omitted {
                working.remove(&key);
            }
        }

        for op in batch.ops {
            match op {
                EntityOp::Upsert(key, payload) => {
                    if let Some(existing) = working.get(&key) {
                        if existing.source != batch.source && self.overlap == OverlapPolicy::KeepOwner
                        {
                            log::debug!(
                                "{} is owned by {}, ignoring write from {}",
                                key,
                                existing.source,
                                batch.source
                            );
                            conflicts += 1;
                            continue;
                        }
                        if existing.source == batch.source
                            && existing.source_timestamp == batch.header_timestamp
                            && existing.payload == payload
                        {
                            continue;
                        }
                    }
                    working.insert(CanonicalRecord {
                        key,
                        payload,
                        source: batch.source.clone(),
                        source_timestamp: batch.header_timestamp,
                        observed_at,
                    });
                }
                EntityOp::Delete {
                    id,
                    feed_type: Some(feed_type),
                } => {
                    let key = EntityKey::new(feed_type, id);
                    let foreign = working.get(&key).map(|existing| existing.source != batch.source);
                    match foreign {
                        Some(true) if self.overlap == OverlapPolicy::KeepOwner => conflicts += 1,
                        Some(_) => working.remove(&key),
                        None => {}
                    }
                }
                EntityOp::Delete {
                    id,
                    feed_type: None,
                } => {
                    for feed_type in FeedType::ALL {
                        let key = EntityKey::new(feed_type, id.as_str());
                        if working
                            .get(&key)
                            .is_some_and(|existing| existing.source == batch.source)
                        {
                            working.remove(&key);
                        }
                    }
                }
            }
        }

        let cursor = inner
            .cursors
            .entry(batch.source)
            .or_insert(batch.header_timestamp);
        *cursor = (*cursor).max(batch.header_timestamp);

        let full_reset = batch.incrementality == Incrementality::FullDataset;
        let changes = self.commit(&mut inner, working, full_reset);

        Ok(Applied {
            version: inner.version,
            changes,
            conflicts,
        })
    }

    /// Removes candidates that are still stale under `ttls` at `now`. A candidate
    /// refreshed since it was picked is left alone.
    pub fn evict_stale(
        &self,
        candidates: &[EntityKey],
        now: DateTime<Utc>,
        ttls: &Ttls,
    ) -> Option<Arc<ChangeSet>> {
        let mut inner = self.lock();
        let mut working = Working::new(inner.tables.clone());

        for key in candidates {
            let Some(ttl) = ttls.get(key.feed_type) else {
                continue;
            };
            if working.get(key).is_some_and(|r| r.age(now) > ttl) {
                working.remove(key);
            }
        }

        self.commit(&mut inner, working, false)
    }

    fn commit(&self, inner: &mut Inner, working: Working, full_reset: bool) -> Option<Arc<ChangeSet>> {
        let (tables, changes) = working.finish();
        if changes.is_empty() {
            return None;
        }

        inner.version += 1;
        inner.tables = tables;

        let changes = Arc::new(ChangeSet {
            version: inner.version,
            full_reset,
            changes,
        });
        inner.log.push(changes.clone());
        self.publisher
            .publish(Snapshot::new(inner.version, inner.tables.clone()));

        if let Some(sync) = &self.sync {
            if sync.send(changes.clone()).is_err() {
                log::debug!("Cache sync has stopped, version {} not mirrored", inner.version);
            }
        }

        Some(changes)
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.publisher.latest()
    }

    pub fn get(&self, feed_type: FeedType, id: &str) -> Option<Arc<CanonicalRecord>> {
        self.latest().get(feed_type, id).cloned()
    }

    pub fn version(&self) -> u64 {
        self.latest().version()
    }

    pub fn size_by_type(&self) -> BTreeMap<FeedType, usize> {
        self.latest().size_by_type()
    }

    pub fn cursor(&self, source: &SourceId) -> Option<DateTime<Utc>> {
        self.lock().cursors.get(source).copied()
    }

    pub fn changes_since(&self, version: u64) -> ChangesSince {
        let inner = self.lock();
        inner.log.since(version, inner.version)
    }
}

/// Copy-on-write working set for one critical section, remembering what each
/// touched key held before.
struct Working {
    tables: Tables,
    originals: HashMap<EntityKey, Option<Arc<CanonicalRecord>>>,
}

impl Working {
    fn new(tables: Tables) -> Self {
        Self {
            tables,
            originals: HashMap::new(),
        }
    }

    fn get(&self, key: &EntityKey) -> Option<&Arc<CanonicalRecord>> {
        self.tables.record(key)
    }

    fn insert(&mut self, record: CanonicalRecord) {
        let key = record.key.clone();
        let previous = self
            .tables
            .table_mut(key.feed_type)
            .insert(key.id.clone(), Arc::new(record));
        self.originals.entry(key).or_insert(previous);
    }

    fn remove(&mut self, key: &EntityKey) {
        if self.get(key).is_none() {
            return;
        }
        let previous = self.tables.table_mut(key.feed_type).remove(&key.id);
        self.originals.entry(key.clone()).or_insert(previous);
    }

    fn finish(self) -> (Tables, Vec<Change>) {
        let mut changes: Vec<Change> = self
            .originals
            .into_iter()
            .filter_map(|(key, original)| {
                let current = self.tables.record(&key).cloned();
                let kind = match (&original, &current) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(before), Some(after)) if !before.same_content(after) => {
                        ChangeKind::Updated
                    }
                    (Some(_), None) => ChangeKind::Removed,
                    _ => return None,
                };
                Some(Change {
                    key,
                    kind,
                    record: current,
                })
            })
            .collect();
        changes.sort_by(|a, b| a.key.cmp(&b.key));

        (self.tables, changes)
    }
}
