//! Mirror of canonical state in an external cache.

pub mod memory;
pub mod redis;
pub mod sync;

use std::future::Future;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;
pub use sync::CacheSync;

use crate::state::key::EntityKey;
use crate::state::{ChangeSet, Snapshot};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Version {version} not mirrored after {attempts} attempts: {last}")]
    SyncPropagationFailure {
        version: u64,
        attempts: u32,
        last: String,
    },
}

pub type CacheResult<T> = Result<T, Error>;

/// Somewhere change-sets are mirrored to.
pub trait CacheSink: Send + Sync + 'static {
    /// Applies one change-set on top of what is already mirrored.
    fn apply(&self, changes: &ChangeSet) -> impl Future<Output = CacheResult<()>> + Send;

    /// Discards the mirror and writes `snapshot` in its place.
    fn replace_all(&self, snapshot: &Snapshot) -> impl Future<Output = CacheResult<()>> + Send;
}

/// `{prefix}:{feed_type}:{id}`
pub fn cache_key(prefix: &str, key: &EntityKey) -> String {
    format!("{}:{}:{}", prefix, key.feed_type, key.id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::key::FeedType;

    #[test]
    fn test_cache_key() {
        let key = EntityKey::new(FeedType::TripUpdate, "1300-90602");
        assert_eq!(cache_key("feed-state", &key), "feed-state:trip_update:1300-90602");
    }
}
