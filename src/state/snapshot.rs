use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::key::{EntityKey, FeedType};
use super::store::CanonicalRecord;

pub type Table = HashMap<String, Arc<CanonicalRecord>>;

/// One table per feed type. Cloning only bumps reference counts; a table is
/// copied the first time a writer touches it.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    trip_updates: Arc<Table>,
    vehicles: Arc<Table>,
    alerts: Arc<Table>,
}

impl Tables {
    pub fn table(&self, feed_type: FeedType) -> &Table {
        match feed_type {
            FeedType::TripUpdate => &self.trip_updates,
            FeedType::Vehicle => &self.vehicles,
            FeedType::Alert => &self.alerts,
        }
    }

    pub(crate) fn table_mut(&mut self, feed_type: FeedType) -> &mut Table {
        let table = match feed_type {
            FeedType::TripUpdate => &mut self.trip_updates,
            FeedType::Vehicle => &mut self.vehicles,
            FeedType::Alert => &mut self.alerts,
        };
        Arc::make_mut(table)
    }

    pub fn record(&self, key: &EntityKey) -> Option<&Arc<CanonicalRecord>> {
        self.table(key.feed_type).get(&key.id)
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<CanonicalRecord>> {
        FeedType::ALL
            .into_iter()
            .flat_map(move |feed_type| self.table(feed_type).values())
    }

    pub fn size_by_type(&self) -> BTreeMap<FeedType, usize> {
        FeedType::ALL
            .into_iter()
            .map(|feed_type| (feed_type, self.table(feed_type).len()))
            .collect()
    }
}

/// Immutable view of canonical state as of one version.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    version: u64,
    tables: Tables,
}

impl Snapshot {
    pub(crate) fn new(version: u64, tables: Tables) -> Self {
        Self { version, tables }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, feed_type: FeedType, id: &str) -> Option<&Arc<CanonicalRecord>> {
        self.tables.table(feed_type).get(id)
    }

    pub fn records_by_type(&self) -> &Tables {
        &self.tables
    }

    pub fn records(&self, feed_type: FeedType) -> impl Iterator<Item = &Arc<CanonicalRecord>> {
        self.tables.table(feed_type).values()
    }

    pub fn size_by_type(&self) -> BTreeMap<FeedType, usize> {
        self.tables.size_by_type()
    }

    pub fn len(&self) -> usize {
        self.size_by_type().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the most recently published snapshot behind an atomically swapped pointer.
#[derive(Debug)]
pub struct SnapshotPublisher {
    current: ArcSwap<Snapshot>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}
