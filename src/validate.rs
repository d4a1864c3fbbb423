//! Position validation and vehicle classification.

use tracing::info;

use crate::config::{BoundingBox, PipelineConfig};
use crate::vehicle::{VehicleSnapshot, VehicleType};

/// Drops unusable positions and assigns [`VehicleType`].
///
/// Multiple reports for the same vehicle within one feed are all kept; this
/// stage never deduplicates.
#[derive(Debug, Clone)]
pub struct Validator {
    bounds: BoundingBox,
    tram_routes: Vec<String>,
}

impl Validator {
    pub fn new(bounds: BoundingBox, tram_routes: &[String]) -> Self {
        Self {
            bounds,
            tram_routes: tram_routes.iter().map(|r| r.trim().to_uppercase()).collect(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.bounds, &config.tram_routes)
    }

    pub fn filter(&self, vehicles: Vec<VehicleSnapshot>) -> Vec<VehicleSnapshot> {
        let total = vehicles.len();
        let mut missing = 0usize;
        let mut outside = 0usize;

        let valid: Vec<VehicleSnapshot> = vehicles
            .into_iter()
            .filter(|v| match (v.latitude, v.longitude) {
                (Some(lat), Some(lon)) if lat != 0.0 && lon != 0.0 => {
                    let inside = self.bounds.contains(lat, lon);
                    if !inside {
                        outside += 1;
                    }
                    inside
                }
                _ => {
                    missing += 1;
                    false
                }
            })
            .map(|mut v| {
                v.vehicle_type = self.classify(v.route_id.as_deref());
                v
            })
            .collect();

        info!(
            total,
            valid = valid.len(),
            missing_or_zero = missing,
            out_of_bounds = outside,
            "Vehicles validated"
        );
        valid
    }

    pub fn classify(&self, route_id: Option<&str>) -> VehicleType {
        let rid = match route_id.map(|r| r.trim().to_uppercase()) {
            Some(r) if !r.is_empty() => r,
            _ => return VehicleType::Unknown,
        };

        if self.tram_routes.iter().any(|t| *t == rid) {
            VehicleType::Tram
        } else if rid.chars().all(char::is_alphabetic) {
            VehicleType::Train
        } else {
            VehicleType::Bus
        }
    }
}
