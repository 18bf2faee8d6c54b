use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::clock::Clock;
use crate::config::{ReaperConfig, Ttls};
use crate::state::changes::ChangeSet;
use crate::state::key::EntityKey;
use crate::state::{CanonicalStore, Snapshot};

/// Periodically evicts records nobody has refreshed within their feed type's TTL.
pub struct StalenessReaper {
    store: Arc<CanonicalStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
}

/// Keys in `snapshot` whose age exceeds their TTL at `now`.
pub fn candidates(snapshot: &Snapshot, now: DateTime<Utc>, ttls: &Ttls) -> Vec<EntityKey> {
    snapshot
        .records_by_type()
        .records()
        .filter(|r| ttls.get(r.key.feed_type).is_some_and(|ttl| r.age(now) > ttl))
        .map(|r| r.key.clone())
        .collect()
}

impl StalenessReaper {
    pub fn new(store: Arc<CanonicalStore>, clock: Arc<dyn Clock>, config: ReaperConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// One pass. Candidates are picked from the latest snapshot without the
    /// store lock; the store re-checks each one before removing it.
    pub fn sweep(&self) -> Option<Arc<ChangeSet>> {
        let now = self.clock.now();
        let candidates = candidates(&self.store.latest(), now, &self.config.ttls);
        if candidates.is_empty() {
            return None;
        }

        let evicted = self.store.evict_stale(&candidates, now, &self.config.ttls);
        match &evicted {
            Some(changes) => log::info!(
                "Evicted {} stale records, now at version {}",
                changes.len(),
                changes.version
            ),
            None => log::debug!("{} stale candidates were refreshed", candidates.len()),
        }
        evicted
    }

    /// Runs forever, sweeping every interval.
    pub async fn keep_fresh(self) {
        log::info!("Staleness reaper running every {:?}", self.config.interval);

        loop {
            sleep(self.config.interval).await;
            self.sweep();
        }
    }
}
