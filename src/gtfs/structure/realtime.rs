// Decoded form of gtfs-realtime.proto (2.0), as published in JSON by feed providers.
// Optional proto fields stay optional here; the merge decides what it needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use self::feed_header::Incrementality;
use super::serde_helpers::{
    deserialize_option_unix_date, serialize_option_unix_date, Many, MaybeStringWrapped,
};

/// One publication unit of a feed.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct FeedMessage {
    pub header: FeedHeader,
    #[serde(default)]
    pub entity: Vec<FeedEntity>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct FeedHeader {
    /// "2.0" or "1.0".
    pub gtfs_realtime_version: String,
    pub incrementality: Option<Incrementality>,
    /// Moment the publisher created this message, in server time.
    #[serde(
        default,
        deserialize_with = "deserialize_option_unix_date",
        serialize_with = "serialize_option_unix_date"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl FeedHeader {
    /// Absent incrementality is FULL_DATASET per the protocol default.
    pub fn incrementality(&self) -> Incrementality {
        self.incrementality.unwrap_or(Incrementality::FullDataset)
    }
}

pub mod feed_header {
    use serde_repr::{Deserialize_repr, Serialize_repr};

    #[derive(
        Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    pub enum Incrementality {
        #[default]
        FullDataset = 0,
        Differential = 1,
    }
}

/// A definition (or deletion) of one entity. At most one payload is set, and none
/// needs to be when the entity is deleted.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct FeedEntity {
    /// Empty when the publisher left it out; such entities are skipped by the merge.
    #[serde(default)]
    pub id: String,
    pub is_deleted: Option<bool>,
    pub trip_update: Option<TripUpdate>,
    pub vehicle: Option<VehiclePosition>,
    pub alert: Option<Alert>,
    /// Experimental in the protocol; not merged.
    pub shape: Option<Shape>,
}

impl FeedEntity {
    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }
}

/// Realtime progress of a vehicle along a trip.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TripUpdate {
    pub trip: TripDescriptor,
    pub vehicle: Option<VehicleDescriptor>,
    /// Sorted by stop_sequence.
    pub stop_time_update: Option<Many<trip_update::StopTimeUpdate>>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_unix_date",
        serialize_with = "serialize_option_unix_date"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    pub delay: Option<i32>,
    pub trip_properties: Option<trip_update::TripProperties>,
}

pub mod trip_update {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct StopTimeEvent {
        pub delay: Option<i32>,
        pub time: Option<i64>,
        pub uncertainty: Option<i32>,
    }

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct StopTimeUpdate {
        pub stop_sequence: Option<u32>,
        pub stop_id: Option<String>,
        pub arrival: Option<StopTimeEvent>,
        pub departure: Option<StopTimeEvent>,
        pub departure_occupancy_status: Option<i32>,
        pub schedule_relationship: Option<stop_time_update::ScheduleRelationship>,
        pub stop_time_properties: Option<stop_time_update::StopTimeProperties>,
    }

    pub mod stop_time_update {
        use serde::{Deserialize, Serialize};
        use serde_repr::{Deserialize_repr, Serialize_repr};

        #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
        pub struct StopTimeProperties {
            pub assigned_stop_id: Option<String>,
        }

        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
        )]
        #[repr(i32)]
        pub enum ScheduleRelationship {
            Scheduled = 0,
            Skipped = 1,
            NoData = 2,
            Unscheduled = 3,
        }
    }

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct TripProperties {
        pub trip_id: Option<String>,
        pub start_date: Option<String>,
        pub start_time: Option<String>,
        pub shape_id: Option<String>,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct VehiclePosition {
    pub trip: Option<TripDescriptor>,
    pub vehicle: Option<VehicleDescriptor>,
    pub position: Option<Position>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<vehicle_position::VehicleStopStatus>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_unix_date",
        serialize_with = "serialize_option_unix_date"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    pub congestion_level: Option<vehicle_position::CongestionLevel>,
    pub occupancy_status: Option<vehicle_position::OccupancyStatus>,
    pub occupancy_percentage: Option<u32>,
    pub multi_carriage_details: Option<Many<vehicle_position::CarriageDetails>>,
}

pub mod vehicle_position {
    use serde::{Deserialize, Serialize};
    use serde_repr::{Deserialize_repr, Serialize_repr};

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct CarriageDetails {
        pub id: Option<String>,
        pub label: Option<String>,
        pub occupancy_status: Option<i32>,
        pub occupancy_percentage: Option<i32>,
        pub carriage_sequence: Option<u32>,
    }

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    pub enum VehicleStopStatus {
        IncomingAt = 0,
        StoppedAt = 1,
        InTransitTo = 2,
    }

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    #[allow(clippy::enum_variant_names)]
    pub enum CongestionLevel {
        UnknownCongestionLevel = 0,
        RunningSmoothly = 1,
        StopAndGo = 2,
        Congestion = 3,
        SevereCongestion = 4,
    }

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    pub enum OccupancyStatus {
        Empty = 0,
        ManySeatsAvailable = 1,
        FewSeatsAvailable = 2,
        StandingRoomOnly = 3,
        CrushedStandingRoomOnly = 4,
        Full = 5,
        NotAcceptingPassengers = 6,
        NoDataAvailable = 7,
        NotBoardable = 8,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Alert {
    pub active_period: Option<Many<TimeRange>>,
    pub informed_entity: Option<Many<EntitySelector>>,
    pub cause: Option<alert::Cause>,
    pub effect: Option<alert::Effect>,
    pub url: Option<TranslatedString>,
    pub header_text: Option<TranslatedString>,
    pub description_text: Option<TranslatedString>,
    pub tts_header_text: Option<TranslatedString>,
    pub tts_description_text: Option<TranslatedString>,
    pub severity_level: Option<alert::SeverityLevel>,
    pub image: Option<TranslatedImage>,
    pub image_alternative_text: Option<TranslatedString>,
    pub cause_detail: Option<TranslatedString>,
    pub effect_detail: Option<TranslatedString>,
}

/// Alert enums are published by name rather than by number.
pub mod alert {
    use serde::{Deserialize, Serialize};

    #[allow(clippy::enum_variant_names)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum Cause {
        UnknownCause = 1,
        OtherCause = 2,
        TechnicalProblem = 3,
        Strike = 4,
        Demonstration = 5,
        Accident = 6,
        Holiday = 7,
        Weather = 8,
        Maintenance = 9,
        Construction = 10,
        PoliceActivity = 11,
        MedicalEmergency = 12,
    }

    #[allow(clippy::enum_variant_names)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum Effect {
        NoService = 1,
        ReducedService = 2,
        SignificantDelays = 3,
        Detour = 4,
        AdditionalService = 5,
        ModifiedService = 6,
        OtherEffect = 7,
        UnknownEffect = 8,
        StopMoved = 9,
        NoEffect = 10,
        AccessibilityIssue = 11,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum SeverityLevel {
        UnknownSeverity = 1,
        Info = 2,
        Warning = 3,
        Severe = 4,
    }
}

/// POSIX seconds; an open end means "until further notice".
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TimeRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Position {
    pub latitude: f32,
    pub longitude: f32,
    pub bearing: Option<MaybeStringWrapped<f32>>,
    pub odometer: Option<f64>,
    pub speed: Option<f32>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TripDescriptor {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_time: Option<String>,
    pub start_date: Option<String>,
    pub schedule_relationship: Option<trip_descriptor::ScheduleRelationship>,
}

pub mod trip_descriptor {
    use serde_repr::{Deserialize_repr, Serialize_repr};

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    pub enum ScheduleRelationship {
        Scheduled = 0,
        Added = 1,
        Unscheduled = 2,
        Canceled = 3,
        Replacement = 5,
        Duplicated = 6,
        Deleted = 7,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct VehicleDescriptor {
    pub id: Option<String>,
    pub label: Option<String>,
    pub license_plate: Option<String>,
    pub wheelchair_accessible: Option<vehicle_descriptor::WheelchairAccessible>,
}

pub mod vehicle_descriptor {
    use serde_repr::{Deserialize_repr, Serialize_repr};

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
    )]
    #[repr(i32)]
    #[allow(clippy::enum_variant_names)]
    pub enum WheelchairAccessible {
        NoValue = 0,
        Unknown = 1,
        WheelchairAccessible = 2,
        WheelchairInaccessible = 3,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct EntitySelector {
    pub agency_id: Option<String>,
    pub route_id: Option<String>,
    pub route_type: Option<i32>,
    pub trip: Option<TripDescriptor>,
    pub stop_id: Option<String>,
    pub direction_id: Option<u32>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TranslatedString {
    pub translation: Option<Many<translated_string::Translation>>,
}

impl TranslatedString {
    pub fn get(&self, lang: &str) -> Option<String> {
        match &self.translation {
            Some(Many::One(t)) => Some(t.text.clone()),
            Some(Many::Many(v)) => v
                .iter()
                .find(|t| t.language.as_deref() == Some(lang))
                .map(|t| t.text.clone()),
            None => None,
        }
    }
}

pub mod translated_string {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct Translation {
        pub text: String,
        pub language: Option<String>,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TranslatedImage {
    pub localized_image: Option<Many<translated_image::LocalizedImage>>,
}

pub mod translated_image {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
    pub struct LocalizedImage {
        pub url: String,
        pub media_type: String,
        pub language: Option<String>,
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Shape {
    pub shape_id: Option<String>,
    pub encoded_polyline: Option<String>,
}
