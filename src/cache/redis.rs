use std::collections::HashSet;
use std::future::Future;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Pipeline};

use super::{cache_key, CacheResult, CacheSink};
use crate::config::{RedisConfig, Ttls};
use crate::state::changes::ChangeKind;
use crate::state::{CanonicalRecord, ChangeSet, Snapshot};

/// Mirrors canonical state into Redis.
///
/// Each record is stored as JSON under `{prefix}:{feed_type}:{id}`, expiring
/// with its feed type's TTL when it has one. `{prefix}:index` holds the set of
/// record keys, `{prefix}:version` the last mirrored version, and every
/// change-set is published on `{prefix}:changes`. A full replace publishes an
/// empty change-set with `full_reset` set.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    layout: Layout,
}

/// Where things live under one prefix, and the commands that write them.
#[derive(Clone, Debug)]
struct Layout {
    prefix: String,
    ttls: Ttls,
}

impl Layout {
    fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }

    fn version_key(&self) -> String {
        format!("{}:version", self.prefix)
    }

    fn channel(&self) -> String {
        format!("{}:changes", self.prefix)
    }

    fn set_record(&self, pipe: &mut Pipeline, record: &CanonicalRecord) -> CacheResult<String> {
        let key = cache_key(&self.prefix, &record.key);
        let value = serde_json::to_string(record)?;

        match self.ttls.get(record.key.feed_type) {
            Some(ttl) if ttl.num_seconds() > 0 => {
                pipe.set_ex(&key, value, ttl.num_seconds() as u64).ignore();
            }
            _ => {
                pipe.set(&key, value).ignore();
            }
        }
        pipe.sadd(self.index_key(), &key).ignore();
        Ok(key)
    }

    fn remove_key(&self, pipe: &mut Pipeline, key: &str) {
        pipe.del(key).ignore();
        pipe.srem(self.index_key(), key).ignore();
    }

    fn finish(&self, pipe: &mut Pipeline, notice: &ChangeSet) -> CacheResult<()> {
        pipe.set(self.version_key(), notice.version).ignore();
        pipe.publish(self.channel(), serde_json::to_string(notice)?)
            .ignore();
        Ok(())
    }

    fn changes_pipeline(&self, changes: &ChangeSet) -> CacheResult<Pipeline> {
        let mut pipe = ::redis::pipe();
        pipe.atomic();

        for change in &changes.changes {
            match (change.kind, &change.record) {
                (ChangeKind::Removed, _) | (_, None) => {
                    self.remove_key(&mut pipe, &cache_key(&self.prefix, &change.key));
                }
                (_, Some(record)) => {
                    self.set_record(&mut pipe, record)?;
                }
            }
        }

        self.finish(&mut pipe, changes)?;
        Ok(pipe)
    }

    /// Writes every record in `snapshot` and drops indexed keys it no longer has.
    fn snapshot_pipeline(
        &self,
        snapshot: &Snapshot,
        existing: &HashSet<String>,
    ) -> CacheResult<Pipeline> {
        let mut pipe = ::redis::pipe();
        pipe.atomic();

        let mut current = HashSet::new();
        for record in snapshot.records_by_type().records() {
            current.insert(self.set_record(&mut pipe, record)?);
        }
        for key in existing.difference(&current) {
            self.remove_key(&mut pipe, key);
        }

        let notice = ChangeSet {
            version: snapshot.version(),
            full_reset: true,
            changes: Vec::new(),
        };
        self.finish(&mut pipe, &notice)?;
        Ok(pipe)
    }
}

impl RedisCache {
    pub async fn connect(config: &RedisConfig, ttls: Ttls) -> CacheResult<RedisCache> {
        log::info!("Connecting to Redis at {}", config.url);
        let client = Client::open(config.url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(RedisCache {
            connection,
            layout: Layout {
                prefix: config.prefix.clone(),
                ttls,
            },
        })
    }

    async fn write_changes(&self, changes: &ChangeSet) -> CacheResult<()> {
        let pipe = self.layout.changes_pipeline(changes)?;

        let mut connection = self.connection.clone();
        let () = pipe.query_async(&mut connection).await?;

        log::debug!(
            "Mirrored version {} ({} changes) to Redis",
            changes.version,
            changes.len()
        );
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> CacheResult<()> {
        let mut connection = self.connection.clone();
        let existing: HashSet<String> = connection.smembers(self.layout.index_key()).await?;

        let pipe = self.layout.snapshot_pipeline(snapshot, &existing)?;
        let () = pipe.query_async(&mut connection).await?;

        log::info!(
            "Replaced Redis mirror with version {} ({} records)",
            snapshot.version(),
            snapshot.len()
        );
        Ok(())
    }
}

impl CacheSink for RedisCache {
    fn apply(&self, changes: &ChangeSet) -> impl Future<Output = CacheResult<()>> + Send {
        self.write_changes(changes)
    }

    fn replace_all(&self, snapshot: &Snapshot) -> impl Future<Output = CacheResult<()>> + Send {
        self.write_snapshot(snapshot)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::gtfs::structure::realtime::feed_header::Incrementality;
    use crate::state::changes::Change;
    use crate::state::key::{EntityKey, FeedType, SourceId};
    use crate::state::store::{Batch, EntityOp};
    use crate::state::CanonicalStore;
    use crate::test_utils::{alert_payload, at, vehicle_payload};

    fn layout() -> Layout {
        Layout {
            prefix: "fs".to_string(),
            ttls: Ttls::default().with(FeedType::Vehicle, Duration::seconds(60)),
        }
    }

    /// Commands in a packed pipeline, without the MULTI/EXEC wrapper.
    fn commands(pipe: &Pipeline) -> Vec<Vec<String>> {
        let packed = pipe.get_packed_pipeline();
        let text = String::from_utf8_lossy(&packed);
        let mut lines = text.split("\r\n");
        let mut commands = Vec::new();

        while let Some(line) = lines.next() {
            let Some(count) = line.strip_prefix('*') else {
                continue;
            };
            let count: usize = count.parse().unwrap();
            let args: Vec<String> = (0..count)
                .map(|_| {
                    lines.next().unwrap();
                    lines.next().unwrap().to_string()
                })
                .collect();
            if args[0] != "MULTI" && args[0] != "EXEC" {
                commands.push(args);
            }
        }
        commands
    }

    fn record(feed_type: FeedType, id: &str) -> Arc<CanonicalRecord> {
        let payload = match feed_type {
            FeedType::Alert => alert_payload(),
            _ => vehicle_payload(id, 1.0),
        };
        Arc::new(CanonicalRecord {
            key: EntityKey::new(feed_type, id),
            payload,
            source: SourceId::new("at"),
            source_timestamp: at(100),
            observed_at: at(100),
        })
    }

    #[test]
    fn test_changes_pipeline() {
        let changes = ChangeSet {
            version: 7,
            full_reset: false,
            changes: vec![
                Change {
                    key: EntityKey::new(FeedType::Vehicle, "v1"),
                    kind: ChangeKind::Added,
                    record: Some(record(FeedType::Vehicle, "v1")),
                },
                Change {
                    key: EntityKey::new(FeedType::Alert, "a1"),
                    kind: ChangeKind::Updated,
                    record: Some(record(FeedType::Alert, "a1")),
                },
                Change {
                    key: EntityKey::new(FeedType::Vehicle, "gone"),
                    kind: ChangeKind::Removed,
                    record: None,
                },
            ],
        };

        let commands = commands(&layout().changes_pipeline(&changes).unwrap());
        let names: Vec<&str> = commands.iter().map(|c| c[0].as_str()).collect();
        assert_eq!(
            names,
            ["SETEX", "SADD", "SET", "SADD", "DEL", "SREM", "SET", "PUBLISH"]
        );

        assert_eq!(commands[0][1], "fs:vehicle:v1");
        assert_eq!(commands[0][2], "60");
        assert_eq!(commands[1][1..], ["fs:index", "fs:vehicle:v1"]);
        assert_eq!(commands[2][1], "fs:alert:a1");
        assert_eq!(commands[4][1], "fs:vehicle:gone");
        assert_eq!(commands[5][1..], ["fs:index", "fs:vehicle:gone"]);
        assert_eq!(commands[6][1..], ["fs:version", "7"]);
        assert_eq!(commands[7][1], "fs:changes");

        let stored: serde_json::Value = serde_json::from_str(&commands[0][3]).unwrap();
        assert_eq!(stored["key"]["id"], "v1");
        assert_eq!(stored["source"], "at");
    }

    #[test]
    fn test_snapshot_pipeline_drops_unknown_keys_and_announces_reset() {
        let store = CanonicalStore::default();
        store
            .apply_change_set(
                Batch {
                    source: SourceId::new("at"),
                    header_timestamp: at(100),
                    incrementality: Incrementality::FullDataset,
                    ops: vec![EntityOp::Upsert(
                        EntityKey::new(FeedType::Vehicle, "v1"),
                        vehicle_payload("v1", 1.0),
                    )],
                },
                at(100),
            )
            .unwrap();

        let existing: HashSet<String> = ["fs:vehicle:v1", "fs:vehicle:old"]
            .into_iter()
            .map(String::from)
            .collect();
        let commands = commands(
            &layout()
                .snapshot_pipeline(&store.latest(), &existing)
                .unwrap(),
        );
        let names: Vec<&str> = commands.iter().map(|c| c[0].as_str()).collect();
        assert_eq!(names, ["SETEX", "SADD", "DEL", "SREM", "SET", "PUBLISH"]);

        assert_eq!(commands[0][1], "fs:vehicle:v1");
        assert_eq!(commands[2][1], "fs:vehicle:old");
        assert_eq!(commands[4][1..], ["fs:version", "1"]);

        let notice: serde_json::Value = serde_json::from_str(&commands[5][2]).unwrap();
        assert_eq!(notice["version"], 1);
        assert_eq!(notice["full_reset"], true);
        assert_eq!(notice["changes"].as_array().unwrap().len(), 0);
    }
}
