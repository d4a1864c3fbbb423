//! Normalized vehicle records produced from a feed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Category derived from a route identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum VehicleType {
    Bus,
    Train,
    Tram,
    #[default]
    Unknown,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Bus => "Bus",
            VehicleType::Train => "Train",
            VehicleType::Tram => "Tram",
            VehicleType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vehicle's reported state, as decoded from a single feed entity.
///
/// Every field the feed may omit is an `Option`; `vehicle_type` stays
/// [`VehicleType::Unknown`] until the record passes through the validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub license_plate: Option<String>,

    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_time: Option<String>,
    pub start_date: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,

    pub current_stop_id: Option<String>,
    pub position_timestamp: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub vehicle_type: VehicleType,
}

impl VehicleSnapshot {
    /// A record with nothing but the ingestion time set.
    pub fn empty(ingested_at: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: None,
            vehicle_label: None,
            license_plate: None,
            trip_id: None,
            route_id: None,
            direction_id: None,
            start_time: None,
            start_date: None,
            latitude: None,
            longitude: None,
            bearing: None,
            speed: None,
            current_stop_id: None,
            position_timestamp: None,
            ingested_at,
            vehicle_type: VehicleType::Unknown,
        }
    }

    /// `(longitude, latitude)` when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}
