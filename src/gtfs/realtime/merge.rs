use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::{EntityDefect, Error, RtResult};
use crate::clock::Clock;
use crate::config::MergeConfig;
use crate::gtfs::structure::realtime::feed_header::Incrementality;
use crate::gtfs::structure::realtime::{FeedEntity, FeedMessage};
use crate::state::changes::ChangeKind;
use crate::state::key::{EntityKey, Payload, SourceId};
use crate::state::store::{Batch, CanonicalStore, EntityOp};

/// Outcome of one applied message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeReport {
    pub source: SourceId,
    pub header_timestamp: DateTime<Utc>,
    pub incrementality: Incrementality,
    pub version: u64,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub malformed: usize,
    pub conflicts: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} @ {} -> v{}: +{} ~{} -{} (malformed {}, conflicts {})",
            self.source,
            self.incrementality,
            self.header_timestamp,
            self.version,
            self.added,
            self.updated,
            self.removed,
            self.malformed,
            self.conflicts
        )
    }
}

/// Running totals since startup.
#[derive(Debug, Default)]
pub struct MergeStats {
    applied: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

impl MergeStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Applies decoded feed messages to the canonical store.
pub struct MergeEngine {
    store: Arc<CanonicalStore>,
    clock: Arc<dyn Clock>,
    config: MergeConfig,
    stats: MergeStats,
}

impl MergeEngine {
    pub fn new(store: Arc<CanonicalStore>, clock: Arc<dyn Clock>, config: MergeConfig) -> Self {
        Self {
            store,
            clock,
            config,
            stats: MergeStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<CanonicalStore> {
        &self.store
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Applies `message` from `source` as one state transition. Rejections are
    /// logged here; callers only need to decide whether to keep going.
    pub fn apply(&self, source: &SourceId, message: FeedMessage) -> RtResult<MergeReport> {
        let now = self.clock.now();

        let result = self.validate(source, &message, now).and_then(|timestamp| {
            let incrementality = message.header.incrementality();
            let (ops, malformed) = entity_ops(source, timestamp, message.entity);

            let batch = Batch {
                source: source.clone(),
                header_timestamp: timestamp,
                incrementality,
                ops,
            };

            let applied = self
                .store
                .apply_change_set(batch, now)
                .map_err(|stale| Error::OutOfOrderUpdate {
                    feed: source.clone(),
                    timestamp,
                    last_applied: stale.last_applied,
                })?;

            let count = |kind| applied.changes.as_ref().map_or(0, |c| c.count(kind));
            Ok(MergeReport {
                source: source.clone(),
                header_timestamp: timestamp,
                incrementality,
                version: applied.version,
                added: count(ChangeKind::Added),
                updated: count(ChangeKind::Updated),
                removed: count(ChangeKind::Removed),
                malformed,
                conflicts: applied.conflicts,
            })
        });

        match &result {
            Ok(report) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .malformed
                    .fetch_add(report.malformed as u64, Ordering::Relaxed);
                if report.malformed > 0 {
                    log::warn!("{} malformed entities skipped in {}", report.malformed, report);
                } else {
                    log::debug!("{}", report);
                }
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                match e {
                    Error::OutOfOrderUpdate { .. } => log::debug!("{}", e),
                    _ => log::warn!("{}", e),
                }
            }
        }

        result
    }

    fn validate(
        &self,
        source: &SourceId,
        message: &FeedMessage,
        now: DateTime<Utc>,
    ) -> RtResult<DateTime<Utc>> {
        let timestamp = message
            .header
            .timestamp
            .ok_or_else(|| Error::MissingTimestamp {
                feed: source.clone(),
            })?;

        // a tolerance reaching past the representable range is no limit
        let limit = now.checked_add_signed(self.config.future_skew);
        if limit.is_some_and(|limit| timestamp > limit) {
            return Err(Error::FutureSkewRejected {
                feed: source.clone(),
                timestamp,
                now,
            });
        }

        Ok(timestamp)
    }
}

/// Converts entities in message order, skipping (and logging) malformed ones.
fn entity_ops(
    source: &SourceId,
    timestamp: DateTime<Utc>,
    entities: Vec<FeedEntity>,
) -> (Vec<EntityOp>, usize) {
    let mut malformed = 0;
    let mut ops = Vec::with_capacity(entities.len());

    for entity in entities {
        match entity_op(entity) {
            Ok(op) => ops.push(op),
            Err(e) => {
                malformed += 1;
                log::warn!("Skipping entity from {} at {}: {}", source, timestamp, e);
            }
        }
    }

    (ops, malformed)
}

fn entity_op(entity: FeedEntity) -> RtResult<EntityOp> {
    let deleted = entity.is_deleted();
    let FeedEntity {
        id,
        trip_update,
        vehicle,
        alert,
        shape,
        ..
    } = entity;

    let malformed = |id: String, reason| Error::MalformedEntity { id, reason };

    if id.trim().is_empty() {
        return Err(malformed(id, EntityDefect::EmptyId));
    }

    let mut payloads = [
        trip_update.map(Payload::TripUpdate),
        vehicle.map(Payload::Vehicle),
        alert.map(Payload::Alert),
    ]
    .into_iter()
    .flatten();

    let payload = payloads.next();
    if payloads.next().is_some() {
        return Err(malformed(id, EntityDefect::MultiplePayloads));
    }

    match (deleted, payload) {
        (true, payload) => Ok(EntityOp::Delete {
            id,
            feed_type: payload.map(|p| p.feed_type()),
        }),
        (false, Some(payload)) => Ok(EntityOp::Upsert(
            EntityKey::new(payload.feed_type(), id),
            payload,
        )),
        (false, None) if shape.is_some() => Err(malformed(id, EntityDefect::UnsupportedPayload)),
        (false, None) => Err(malformed(id, EntityDefect::MissingPayload)),
    }
}
