//! Canonical state: keys, the store that owns the records, the snapshots it
//! publishes, and the change-sets that describe each version.

pub mod changes;
pub mod key;
pub mod snapshot;
pub mod store;

pub use changes::{Change, ChangeKind, ChangeSet, ChangesSince};
pub use key::{EntityKey, FeedType, Payload, SourceId};
pub use snapshot::{Snapshot, SnapshotPublisher};
pub use store::{CanonicalRecord, CanonicalStore};
