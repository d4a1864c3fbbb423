//! Protobuf parser for GTFS Realtime vehicle position feeds.

use chrono::{DateTime, Utc};
use prost::{DecodeError, Message};
use tracing::debug;

use crate::gtfs_rt::{FeedMessage, VehiclePosition};
use crate::vehicle::VehicleSnapshot;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    FeedMessage::decode(bytes)
}

/// Decodes a feed into one [`VehicleSnapshot`] per entity carrying a vehicle
/// position, stamped with the current time as the ingestion time.
pub fn decode_vehicles(bytes: &[u8]) -> Result<Vec<VehicleSnapshot>, DecodeError> {
    decode_vehicles_at(bytes, Utc::now())
}

/// Like [`decode_vehicles`] with an explicit ingestion time.
pub fn decode_vehicles_at(
    bytes: &[u8],
    ingested_at: DateTime<Utc>,
) -> Result<Vec<VehicleSnapshot>, DecodeError> {
    let feed = parse_feed(bytes)?;
    let header_ts = feed.header.timestamp.and_then(epoch_to_utc);

    let vehicles: Vec<VehicleSnapshot> = feed
        .entity
        .iter()
        .filter_map(|e| e.vehicle.as_ref())
        .map(|v| snapshot_from(v, header_ts, ingested_at))
        .collect();

    debug!(
        entities = feed.entity.len(),
        vehicles = vehicles.len(),
        header_timestamp = ?header_ts,
        "Feed decoded"
    );

    Ok(vehicles)
}

fn snapshot_from(
    v: &VehiclePosition,
    header_ts: Option<DateTime<Utc>>,
    ingested_at: DateTime<Utc>,
) -> VehicleSnapshot {
    let mut s = VehicleSnapshot::empty(ingested_at);

    if let Some(d) = &v.vehicle {
        s.vehicle_id = non_empty(&d.id);
        s.vehicle_label = non_empty(&d.label);
        s.license_plate = non_empty(&d.license_plate);
    }

    if let Some(t) = &v.trip {
        s.trip_id = non_empty(&t.trip_id);
        s.route_id = non_empty(&t.route_id);
        // proto2 presence: Some(0) is a real direction, None is "not sent"
        s.direction_id = t.direction_id;
        s.start_time = non_empty(&t.start_time);
        s.start_date = non_empty(&t.start_date);
    }

    if let Some(p) = &v.position {
        s.latitude = Some(f64::from(p.latitude));
        s.longitude = Some(f64::from(p.longitude));
        s.bearing = p.bearing.map(f64::from);
        s.speed = p.speed.map(f64::from);
    }

    s.current_stop_id = non_empty(&v.stop_id);
    s.position_timestamp = v.timestamp.and_then(epoch_to_utc).or(header_ts);

    s
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}
