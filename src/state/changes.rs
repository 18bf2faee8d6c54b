use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use super::key::EntityKey;
use super::store::CanonicalRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Net effect of one version on one key. `record` is `None` for a tombstone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Change {
    pub key: EntityKey,
    pub kind: ChangeKind,
    pub record: Option<Arc<CanonicalRecord>>,
}

/// Everything that changed between `version - 1` and `version`, or across a
/// range of versions when composed by [`ChangeLog::since`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChangeSet {
    pub version: u64,
    /// Produced by a FULL_DATASET replacement.
    pub full_reset: bool,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            full_reset: false,
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn added(&self) -> impl Iterator<Item = &EntityKey> {
        self.keys(ChangeKind::Added)
    }

    pub fn updated(&self) -> impl Iterator<Item = &EntityKey> {
        self.keys(ChangeKind::Updated)
    }

    pub fn removed(&self) -> impl Iterator<Item = &EntityKey> {
        self.keys(ChangeKind::Removed)
    }

    fn keys(&self, kind: ChangeKind) -> impl Iterator<Item = &EntityKey> {
        self.changes
            .iter()
            .filter(move |c| c.kind == kind)
            .map(|c| &c.key)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.keys(kind).count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangesSince {
    Changes(ChangeSet),
    /// The caller has to reload from `latest()`.
    FullResyncRequired { version: u64 },
}

/// Bounded history of recent change-sets. Versions are contiguous, so the log
/// covers `(base, newest]`.
#[derive(Debug)]
pub(crate) struct ChangeLog {
    capacity: usize,
    base: u64,
    entries: VecDeque<Arc<ChangeSet>>,
}

impl ChangeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            base: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, changes: Arc<ChangeSet>) {
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.base = evicted.version;
            }
        }
        self.entries.push_back(changes);
    }

    pub fn since(&self, from: u64, current: u64) -> ChangesSince {
        if from == current {
            return ChangesSince::Changes(ChangeSet::empty(current));
        }
        if from > current || from < self.base {
            return ChangesSince::FullResyncRequired { version: current };
        }

        let pending = self.entries.iter().filter(|c| c.version > from);

        let mut net: BTreeMap<EntityKey, (ChangeKind, Option<Arc<CanonicalRecord>>)> =
            BTreeMap::new();
        for changes in pending {
            if changes.full_reset {
                return ChangesSince::FullResyncRequired { version: current };
            }
            for change in &changes.changes {
                let kind = match net.get(&change.key) {
                    Some((earlier, _)) => compose(*earlier, change.kind),
                    None => Some(change.kind),
                };
                match kind {
                    Some(kind) => {
                        net.insert(change.key.clone(), (kind, change.record.clone()));
                    }
                    None => {
                        net.remove(&change.key);
                    }
                }
            }
        }

        ChangesSince::Changes(ChangeSet {
            version: current,
            full_reset: false,
            changes: net
                .into_iter()
                .map(|(key, (kind, record))| Change { key, kind, record })
                .collect(),
        })
    }
}

/// Net kind of two consecutive changes to one key, from the point of view of a
/// reader that saw neither. `None` means the reader never needs to hear of it.
fn compose(earlier: ChangeKind, later: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;

    match (earlier, later) {
        (Added, Removed) => None,
        (Added, _) => Some(Added),
        (Removed, Removed) => Some(Removed),
        (Removed, _) => Some(Updated),
        (Updated, later) => Some(later),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::state::key::FeedType;

    fn change(id: &str, kind: ChangeKind) -> Change {
        Change {
            key: EntityKey::new(FeedType::Vehicle, id),
            kind,
            record: None,
        }
    }

    fn set(version: u64, changes: Vec<Change>) -> Arc<ChangeSet> {
        Arc::new(ChangeSet {
            version,
            full_reset: false,
            changes,
        })
    }

    #[test]
    fn test_compose_over_versions() {
        let mut log = ChangeLog::new(8);
        log.push(set(1, vec![change("a", ChangeKind::Added), change("b", ChangeKind::Added)]));
        log.push(set(2, vec![change("a", ChangeKind::Updated), change("b", ChangeKind::Removed)]));
        log.push(set(3, vec![change("c", ChangeKind::Removed)]));

        let ChangesSince::Changes(from_zero) = log.since(0, 3) else {
            panic!("expected changes");
        };
        assert_eq!(from_zero.version, 3);
        assert_eq!(from_zero.added().map(|k| k.id.as_str()).collect::<Vec<_>>(), ["a"]);
        assert_eq!(from_zero.removed().map(|k| k.id.as_str()).collect::<Vec<_>>(), ["c"]);
        assert_eq!(from_zero.len(), 2);

        let ChangesSince::Changes(from_one) = log.since(1, 3) else {
            panic!("expected changes");
        };
        assert_eq!(from_one.updated().count(), 1);
        assert_eq!(from_one.removed().count(), 2);
    }

    #[test]
    fn test_current_version_has_no_changes() {
        let mut log = ChangeLog::new(8);
        log.push(set(1, vec![change("a", ChangeKind::Added)]));
        assert_eq!(log.since(1, 1), ChangesSince::Changes(ChangeSet::empty(1)));
    }

    #[test]
    fn test_resync_when_history_is_gone() {
        let mut log = ChangeLog::new(2);
        for version in 1..=4 {
            log.push(set(version, vec![change("a", ChangeKind::Updated)]));
        }
        assert_eq!(log.since(1, 4), ChangesSince::FullResyncRequired { version: 4 });
        assert!(matches!(log.since(2, 4), ChangesSince::Changes(_)));
        assert_eq!(log.since(9, 4), ChangesSince::FullResyncRequired { version: 4 });
    }

    #[test]
    fn test_resync_after_full_reset() {
        let mut log = ChangeLog::new(8);
        log.push(set(1, vec![change("a", ChangeKind::Added)]));
        log.push(Arc::new(ChangeSet {
            version: 2,
            full_reset: true,
            changes: vec![change("a", ChangeKind::Removed)],
        }));
        log.push(set(3, vec![change("b", ChangeKind::Added)]));

        assert_eq!(log.since(1, 3), ChangesSince::FullResyncRequired { version: 3 });
        assert!(matches!(log.since(2, 3), ChangesSince::Changes(_)));
    }
}
