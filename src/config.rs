use std::env;
use std::str::FromStr;

use chrono::Duration;
use derive_builder::Builder;
use itertools::Itertools;

use crate::state::key::FeedType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {name} '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Incomplete config: {0}")]
    Builder(String),
}

pub type ConfigResult<T> = Result<T, Error>;

/// What happens when a source writes a key another source currently owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// The writer becomes the owner.
    #[default]
    Takeover,
    /// The entity is skipped and counted as a conflict.
    KeepOwner,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "takeover" => Ok(OverlapPolicy::Takeover),
            "keep-owner" => Ok(OverlapPolicy::KeepOwner),
            other => Err(format!("expected takeover or keep-owner, got {}", other)),
        }
    }
}

/// Time-to-live per feed type. A type without one never goes stale.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ttls {
    pub trip_update: Option<Duration>,
    pub vehicle: Option<Duration>,
    pub alert: Option<Duration>,
}

impl Ttls {
    pub fn get(&self, feed_type: FeedType) -> Option<Duration> {
        match feed_type {
            FeedType::TripUpdate => self.trip_update,
            FeedType::Vehicle => self.vehicle,
            FeedType::Alert => self.alert,
        }
    }

    pub fn with(mut self, feed_type: FeedType, ttl: Duration) -> Self {
        match feed_type {
            FeedType::TripUpdate => self.trip_update = Some(ttl),
            FeedType::Vehicle => self.vehicle = Some(ttl),
            FeedType::Alert => self.alert = Some(ttl),
        }
        self
    }

    pub fn any(&self) -> bool {
        FeedType::ALL.iter().any(|t| self.get(*t).is_some())
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct MergeConfig {
    /// How far past local ingest time a header timestamp may be.
    pub future_skew: Duration,
}

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct StoreConfig {
    /// Change-sets retained for `changes_since`.
    #[builder(default = "1024")]
    pub change_log_capacity: usize,
    #[builder(default)]
    pub overlap: OverlapPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_log_capacity: 1024,
            overlap: OverlapPolicy::default(),
        }
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct ReaperConfig {
    pub ttls: Ttls,
    pub interval: std::time::Duration,
}

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct SyncConfig {
    #[builder(default = "std::time::Duration::from_secs(1)")]
    pub initial_backoff: std::time::Duration,
    #[builder(default = "std::time::Duration::from_secs(60)")]
    pub max_backoff: std::time::Duration,
    #[builder(default = "5")]
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff: std::time::Duration::from_secs(1),
            max_backoff: std::time::Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub prefix: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub poll_interval: std::time::Duration,
    pub merge: MergeConfig,
    pub store: StoreConfig,
    pub reaper: Option<ReaperConfig>,
    pub sync: SyncConfig,
    pub redis: Option<RedisConfig>,
}

impl Config {
    pub fn from_env() -> ConfigResult<Config> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Config> {
        let sources = lookup("FEED_SOURCES")
            .ok_or(Error::Missing("FEED_SOURCES"))
            .and_then(|s| parse_sources(&s))?;

        let poll_interval = parse::<u64>(&lookup, "POLL_INTERVAL_SECS")?.unwrap_or(30);

        let future_skew =
            parse_secs(&lookup, "FUTURE_SKEW_SECS")?.ok_or(Error::Missing("FUTURE_SKEW_SECS"))?;
        let merge = MergeConfigBuilder::default()
            .future_skew(future_skew)
            .build()
            .map_err(|e| Error::Builder(e.to_string()))?;

        let mut store = StoreConfigBuilder::default();
        if let Some(capacity) = parse::<usize>(&lookup, "CHANGE_LOG_CAPACITY")? {
            store.change_log_capacity(capacity);
        }
        if let Some(overlap) = parse::<OverlapPolicy>(&lookup, "OVERLAP_POLICY")? {
            store.overlap(overlap);
        }
        let store = store.build().map_err(|e| Error::Builder(e.to_string()))?;

        let mut ttls = Ttls::default();
        for (name, feed_type) in [
            ("TRIP_UPDATE_TTL_SECS", FeedType::TripUpdate),
            ("VEHICLE_TTL_SECS", FeedType::Vehicle),
            ("ALERT_TTL_SECS", FeedType::Alert),
        ] {
            if let Some(ttl) = parse_secs(&lookup, name)? {
                ttls = ttls.with(feed_type, ttl);
            }
        }

        let reaper = if ttls.any() {
            let interval = parse::<u64>(&lookup, "REAP_INTERVAL_SECS")?
                .ok_or(Error::Missing("REAP_INTERVAL_SECS"))?;
            let reaper = ReaperConfigBuilder::default()
                .ttls(ttls)
                .interval(std::time::Duration::from_secs(interval))
                .build()
                .map_err(|e| Error::Builder(e.to_string()))?;
            Some(reaper)
        } else {
            None
        };

        let redis = lookup("REDIS_URL").map(|url| RedisConfig {
            url,
            prefix: lookup("REDIS_PREFIX").unwrap_or_else(|| "feed-state".to_string()),
        });

        Ok(Config {
            sources,
            poll_interval: std::time::Duration::from_secs(poll_interval),
            merge,
            store,
            reaper,
            sync: SyncConfig::default(),
            redis,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
    }
}

/// A non-negative number of seconds that fits a `chrono::Duration`.
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> ConfigResult<Option<Duration>> {
    let Some(secs) = parse::<i64>(lookup, name)? else {
        return Ok(None);
    };
    let invalid = |reason: &str| Error::Invalid {
        name,
        value: secs.to_string(),
        reason: reason.to_string(),
    };

    if secs < 0 {
        return Err(invalid("must not be negative"));
    }
    Duration::try_seconds(secs)
        .map(Some)
        .ok_or_else(|| invalid("out of range"))
}

/// `name=url,name=url`
fn parse_sources(value: &str) -> ConfigResult<Vec<SourceConfig>> {
    let sources = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok(SourceConfig {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                })
            }
            _ => Err(Error::Invalid {
                name: "FEED_SOURCES",
                value: pair.to_string(),
                reason: "expected name=url".to_string(),
            }),
        })
        .collect::<ConfigResult<Vec<_>>>()?;

    if sources.is_empty() {
        return Err(Error::Missing("FEED_SOURCES"));
    }

    // names key the per-source cursors and ownership
    if let Some(name) = sources.iter().map(|s| s.name.as_str()).duplicates().next() {
        return Err(Error::Invalid {
            name: "FEED_SOURCES",
            value: value.to_string(),
            reason: format!("source '{}' is listed twice", name),
        });
    }

    Ok(sources)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_lookup(lookup(&[
            ("FEED_SOURCES", "at=https://example.com/realtime.json"),
            ("FUTURE_SKEW_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, "at");
        assert_eq!(config.merge.future_skew, Duration::seconds(30));
        assert_eq!(config.store.overlap, OverlapPolicy::Takeover);
        assert!(config.reaper.is_none());
        assert!(config.redis.is_none());
    }

    #[test]
    fn test_future_skew_is_required() {
        let err = Config::from_lookup(lookup(&[("FEED_SOURCES", "at=https://example.com")]))
            .unwrap_err();
        assert!(matches!(err, Error::Missing("FUTURE_SKEW_SECS")));
    }

    #[test]
    fn test_ttls_require_reap_interval() {
        let vars = [
            ("FEED_SOURCES", "at=https://example.com"),
            ("FUTURE_SKEW_SECS", "30"),
            ("VEHICLE_TTL_SECS", "60"),
        ];
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, Error::Missing("REAP_INTERVAL_SECS")));

        let mut vars = vars.to_vec();
        vars.push(("REAP_INTERVAL_SECS", "10"));
        vars.push(("OVERLAP_POLICY", "keep-owner"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        let reaper = config.reaper.unwrap();
        assert_eq!(reaper.ttls.get(FeedType::Vehicle), Some(Duration::seconds(60)));
        assert_eq!(reaper.ttls.get(FeedType::Alert), None);
        assert_eq!(config.store.overlap, OverlapPolicy::KeepOwner);
    }

    #[test]
    fn test_durations_must_be_non_negative_and_in_range() {
        let source = ("FEED_SOURCES", "at=https://example.com");

        let err = Config::from_lookup(lookup(&[source, ("FUTURE_SKEW_SECS", "-5")])).unwrap_err();
        assert!(matches!(err, Error::Invalid { name: "FUTURE_SKEW_SECS", .. }));

        let err = Config::from_lookup(lookup(&[source, ("FUTURE_SKEW_SECS", "9223372036854775807")]))
            .unwrap_err();
        assert!(matches!(err, Error::Invalid { name: "FUTURE_SKEW_SECS", .. }));

        let err = Config::from_lookup(lookup(&[
            source,
            ("FUTURE_SKEW_SECS", "30"),
            ("ALERT_TTL_SECS", "-1"),
            ("REAP_INTERVAL_SECS", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Invalid { name: "ALERT_TTL_SECS", .. }));

        // large but representable
        let config =
            Config::from_lookup(lookup(&[source, ("FUTURE_SKEW_SECS", "1000000000000000")]))
                .unwrap();
        assert_eq!(config.merge.future_skew, Duration::seconds(1_000_000_000_000_000));
    }

    #[test]
    fn test_bad_source_list() {
        let err = parse_sources("at").unwrap_err();
        assert!(matches!(err, Error::Invalid { name: "FEED_SOURCES", .. }));
        assert!(matches!(parse_sources(" , "), Err(Error::Missing("FEED_SOURCES"))));
        assert!(matches!(
            parse_sources("at=https://a.example, at=https://b.example"),
            Err(Error::Invalid { name: "FEED_SOURCES", .. })
        ));
    }
}
