use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gtfs::structure::realtime::{Alert, TripUpdate, VehiclePosition};

/// Entity ids are only unique within one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    TripUpdate,
    Vehicle,
    Alert,
}

impl FeedType {
    pub const ALL: [FeedType; 3] = [FeedType::TripUpdate, FeedType::Vehicle, FeedType::Alert];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::TripUpdate => "trip_update",
            FeedType::Vehicle => "vehicle",
            FeedType::Alert => "alert",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one canonical slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub feed_type: FeedType,
    pub id: String,
}

impl EntityKey {
    pub fn new(feed_type: FeedType, id: impl Into<String>) -> Self {
        Self {
            feed_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feed_type, self.id)
    }
}

/// The populated variant of a feed entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    TripUpdate(TripUpdate),
    Vehicle(VehiclePosition),
    Alert(Alert),
}

impl Payload {
    pub fn feed_type(&self) -> FeedType {
        match self {
            Payload::TripUpdate(_) => FeedType::TripUpdate,
            Payload::Vehicle(_) => FeedType::Vehicle,
            Payload::Alert(_) => FeedType::Alert,
        }
    }

    pub fn as_trip_update(&self) -> Option<&TripUpdate> {
        match self {
            Payload::TripUpdate(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_vehicle(&self) -> Option<&VehiclePosition> {
        match self {
            Payload::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_alert(&self) -> Option<&Alert> {
        match self {
            Payload::Alert(a) => Some(a),
            _ => None,
        }
    }
}

/// Name of an upstream publisher. Each source has its own timestamp cursor and
/// owns the records it last wrote.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(name: &str) -> Self {
        SourceId::new(name)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ids_are_scoped_by_feed_type() {
        let vehicle = EntityKey::new(FeedType::Vehicle, "22781");
        let trip = EntityKey::new(FeedType::TripUpdate, "22781");
        assert_ne!(vehicle, trip);
        assert_eq!(vehicle.to_string(), "vehicle:22781");
    }

    #[test]
    fn test_source_id_serializes_as_string() {
        let source = SourceId::new("at");
        assert_eq!(serde_json::to_string(&source).unwrap(), r#""at""#);
    }
}
