use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::clock::ManualClock;
use crate::config::MergeConfig;
use crate::gtfs::realtime::merge::MergeEngine;
use crate::gtfs::structure::realtime::feed_header::Incrementality;
use crate::gtfs::structure::realtime::{
    Alert, FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, TripUpdate,
    VehicleDescriptor, VehiclePosition,
};
use crate::state::key::Payload;
use crate::state::store::CanonicalStore;

pub fn init() {
    dotenvy::from_filename(".dev.vars").ok();
    env_logger::builder().is_test(true).try_init().ok();
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

pub fn vehicle_payload(id: &str, lat: f32) -> Payload {
    Payload::Vehicle(VehiclePosition {
        trip: None,
        vehicle: Some(VehicleDescriptor {
            id: Some(id.to_string()),
            label: None,
            license_plate: None,
            wheelchair_accessible: None,
        }),
        position: Some(Position {
            latitude: lat,
            longitude: 174.76,
            bearing: None,
            odometer: None,
            speed: None,
        }),
        current_stop_sequence: None,
        stop_id: None,
        current_status: None,
        timestamp: None,
        congestion_level: None,
        occupancy_status: None,
        occupancy_percentage: None,
        multi_carriage_details: None,
    })
}

pub fn trip_update_payload(trip_id: &str) -> Payload {
    Payload::TripUpdate(TripUpdate {
        trip: TripDescriptor {
            trip_id: Some(trip_id.to_string()),
            route_id: None,
            direction_id: None,
            start_time: None,
            start_date: None,
            schedule_relationship: None,
        },
        vehicle: None,
        stop_time_update: None,
        timestamp: None,
        delay: Some(60),
        trip_properties: None,
    })
}

pub fn alert_payload() -> Payload {
    Payload::Alert(Alert {
        active_period: None,
        informed_entity: None,
        cause: None,
        effect: None,
        url: None,
        header_text: None,
        description_text: None,
        tts_header_text: None,
        tts_description_text: None,
        severity_level: None,
        image: None,
        image_alternative_text: None,
        cause_detail: None,
        effect_detail: None,
    })
}

fn entity(id: &str, payload: Option<Payload>) -> FeedEntity {
    let mut entity = FeedEntity {
        id: id.to_string(),
        is_deleted: None,
        trip_update: None,
        vehicle: None,
        alert: None,
        shape: None,
    };
    match payload {
        Some(Payload::TripUpdate(t)) => entity.trip_update = Some(t),
        Some(Payload::Vehicle(v)) => entity.vehicle = Some(v),
        Some(Payload::Alert(a)) => entity.alert = Some(a),
        None => {}
    }
    entity
}

pub fn vehicle(id: &str, lat: f32) -> FeedEntity {
    entity(id, Some(vehicle_payload(id, lat)))
}

pub fn trip_update(id: &str, trip_id: &str) -> FeedEntity {
    entity(id, Some(trip_update_payload(trip_id)))
}

pub fn alert(id: &str) -> FeedEntity {
    entity(id, Some(alert_payload()))
}

pub fn deleted(id: &str) -> FeedEntity {
    let mut entity = entity(id, None);
    entity.is_deleted = Some(true);
    entity
}

fn message(secs: i64, incrementality: Incrementality, entity: Vec<FeedEntity>) -> FeedMessage {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: Some(incrementality),
            timestamp: Some(at(secs)),
        },
        entity,
    }
}

pub fn differential(secs: i64, entity: Vec<FeedEntity>) -> FeedMessage {
    message(secs, Incrementality::Differential, entity)
}

pub fn full_dataset(secs: i64, entity: Vec<FeedEntity>) -> FeedMessage {
    message(secs, Incrementality::FullDataset, entity)
}

/// An engine over an empty store, with ingest time pinned at `now` and a 30s
/// future skew allowance.
pub fn engine_at(now: i64) -> (MergeEngine, Arc<ManualClock>) {
    init();
    let clock = Arc::new(ManualClock::new(at(now)));
    let engine = MergeEngine::new(
        Arc::new(CanonicalStore::default()),
        clock.clone(),
        MergeConfig {
            future_skew: Duration::seconds(30),
        },
    );
    (engine, clock)
}
