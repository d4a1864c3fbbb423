//! The fixed vehicle layer schema and the record → feature projection.

use serde_json::{Map, Value};

use crate::error::PublishError;
use crate::services::feature_store::{
    Extent, Feature, FieldDef, FieldType, LayerDefinition, PointGeometry, SpatialReference,
};
use crate::vehicle::VehicleSnapshot;

pub const OBJECT_ID_FIELD: &str = "OBJECTID";

/// Attributes a vehicle record can contribute, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleField {
    VehicleId,
    VehicleLabel,
    LicensePlate,
    TripId,
    RouteId,
    DirectionId,
    StartTime,
    StartDate,
    Bearing,
    Speed,
    CurrentStopId,
    PositionTimestamp,
    LastUpdated,
    VehicleType,
}

/// Value shape of a field, independent of the store's type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Double,
    Date,
}

impl ValueKind {
    fn label(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Date => "date",
        }
    }

    /// Whether a declared store field can hold values of this kind without loss.
    fn fits(&self, declared: FieldType) -> bool {
        use FieldType as F;
        match self {
            ValueKind::Text => declared == F::String,
            ValueKind::Integer => matches!(
                declared,
                F::SmallInteger | F::Integer | F::BigInteger | F::Double
            ),
            ValueKind::Double => matches!(declared, F::Single | F::Double),
            ValueKind::Date => declared == F::Date,
        }
    }
}

impl VehicleField {
    pub const ALL: [VehicleField; 14] = [
        VehicleField::VehicleId,
        VehicleField::VehicleLabel,
        VehicleField::LicensePlate,
        VehicleField::TripId,
        VehicleField::RouteId,
        VehicleField::DirectionId,
        VehicleField::StartTime,
        VehicleField::StartDate,
        VehicleField::Bearing,
        VehicleField::Speed,
        VehicleField::CurrentStopId,
        VehicleField::PositionTimestamp,
        VehicleField::LastUpdated,
        VehicleField::VehicleType,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VehicleField::VehicleId => "VehicleID",
            VehicleField::VehicleLabel => "VehicleLabel",
            VehicleField::LicensePlate => "LicensePlate",
            VehicleField::TripId => "TripID",
            VehicleField::RouteId => "RouteID",
            VehicleField::DirectionId => "DirectionID",
            VehicleField::StartTime => "StartTime",
            VehicleField::StartDate => "StartDate",
            VehicleField::Bearing => "Bearing",
            VehicleField::Speed => "Speed",
            VehicleField::CurrentStopId => "CurrentStopID",
            VehicleField::PositionTimestamp => "PositionTimestamp",
            VehicleField::LastUpdated => "LastUpdated",
            VehicleField::VehicleType => "VehicleType",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            VehicleField::DirectionId => ValueKind::Integer,
            VehicleField::Bearing | VehicleField::Speed => ValueKind::Double,
            VehicleField::PositionTimestamp | VehicleField::LastUpdated => ValueKind::Date,
            _ => ValueKind::Text,
        }
    }

    /// Type and length used when creating a store.
    fn declaration(&self) -> (FieldType, Option<u32>) {
        match self {
            VehicleField::DirectionId => (FieldType::Integer, None),
            VehicleField::Bearing | VehicleField::Speed => (FieldType::Double, None),
            VehicleField::PositionTimestamp | VehicleField::LastUpdated => (FieldType::Date, None),
            VehicleField::StartTime | VehicleField::StartDate | VehicleField::VehicleType => {
                (FieldType::String, Some(20))
            }
            _ => (FieldType::String, Some(50)),
        }
    }

    /// The record's value for this field. Dates are epoch milliseconds;
    /// `LastUpdated` is the ingestion time.
    pub fn value(&self, v: &VehicleSnapshot) -> Value {
        fn text(s: &Option<String>) -> Value {
            s.as_deref().map_or(Value::Null, |s| Value::String(s.to_string()))
        }
        fn number(n: Option<f64>) -> Value {
            n.map_or(Value::Null, Value::from)
        }

        match self {
            VehicleField::VehicleId => text(&v.vehicle_id),
            VehicleField::VehicleLabel => text(&v.vehicle_label),
            VehicleField::LicensePlate => text(&v.license_plate),
            VehicleField::TripId => text(&v.trip_id),
            VehicleField::RouteId => text(&v.route_id),
            VehicleField::DirectionId => v.direction_id.map_or(Value::Null, Value::from),
            VehicleField::StartTime => text(&v.start_time),
            VehicleField::StartDate => text(&v.start_date),
            VehicleField::Bearing => number(v.bearing),
            VehicleField::Speed => number(v.speed),
            VehicleField::CurrentStopId => text(&v.current_stop_id),
            VehicleField::PositionTimestamp => v
                .position_timestamp
                .map_or(Value::Null, |t| Value::from(t.timestamp_millis())),
            VehicleField::LastUpdated => Value::from(v.ingested_at.timestamp_millis()),
            VehicleField::VehicleType => Value::String(v.vehicle_type.to_string()),
        }
    }
}

/// Layer definition used when a new store is created.
pub fn vehicle_layer_definition(name: &str, extent: Extent) -> LayerDefinition {
    let mut fields = vec![FieldDef {
        name: OBJECT_ID_FIELD.to_string(),
        field_type: FieldType::ObjectId,
        alias: Some(OBJECT_ID_FIELD.to_string()),
        length: None,
        nullable: false,
        editable: false,
    }];

    fields.extend(VehicleField::ALL.iter().map(|f| {
        let (field_type, length) = f.declaration();
        FieldDef {
            name: f.name().to_string(),
            field_type,
            alias: Some(f.name().to_string()),
            length,
            nullable: true,
            editable: true,
        }
    }));

    LayerDefinition {
        name: name.to_string(),
        geometry_type: LayerDefinition::POINT.to_string(),
        object_id_field: Some(OBJECT_ID_FIELD.to_string()),
        extent: Some(extent),
        fields,
    }
}

/// Vehicle fields the layer declares, paired with the layer's spelling of each.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    columns: Vec<(VehicleField, String)>,
}

impl Projection {
    /// Intersects the vehicle fields with `layer`'s declared fields.
    ///
    /// Undeclared vehicle fields are left out, except `VehicleID`: a layer
    /// without it is not a vehicle layer. A declared field whose type cannot
    /// hold the record value is a schema mismatch; the store is never altered
    /// to fit.
    pub fn for_layer(layer: &LayerDefinition) -> Result<Self, PublishError> {
        let mut columns = Vec::new();

        for field in VehicleField::ALL {
            let Some(declared) = layer.field(field.name()) else {
                continue;
            };
            if !field.kind().fits(declared.field_type) {
                return Err(PublishError::SchemaMismatch {
                    field: declared.name.clone(),
                    declared: declared.field_type.to_string(),
                    expected: field.kind().label().to_string(),
                });
            }
            columns.push((field, declared.name.clone()));
        }

        if !columns.iter().any(|(f, _)| *f == VehicleField::VehicleId) {
            return Err(PublishError::MissingKeyField {
                field: VehicleField::VehicleId.name().to_string(),
            });
        }

        Ok(Self { columns })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(_, name)| name.as_str())
    }

    /// Builds a point feature. `None` when the record has no coordinates.
    pub fn feature(&self, v: &VehicleSnapshot) -> Option<Feature> {
        let (x, y) = v.coordinates()?;
        let attributes: Map<String, Value> = self
            .columns
            .iter()
            .map(|(field, name)| (name.clone(), field.value(v)))
            .collect();

        Some(Feature {
            geometry: PointGeometry {
                x,
                y,
                spatial_reference: SpatialReference::wgs84(),
            },
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoundingBox;
    use crate::vehicle::VehicleType;
    use chrono::{TimeZone, Utc};

    fn definition() -> LayerDefinition {
        vehicle_layer_definition("Vehicles", BoundingBox::default().to_extent())
    }

    fn sample() -> VehicleSnapshot {
        let mut v = VehicleSnapshot::empty(Utc.with_ymd_and_hms(2026, 10, 16, 1, 0, 0).unwrap());
        v.vehicle_id = Some("V1".to_string());
        v.route_id = Some("H30".to_string());
        v.direction_id = Some(0);
        v.latitude = Some(-34.9);
        v.longitude = Some(138.6);
        v.bearing = Some(45.0);
        v.vehicle_type = VehicleType::Bus;
        v
    }

    #[test]
    fn test_definition_has_fixed_fields() {
        let def = definition();
        assert!(def.is_point());
        assert_eq!(def.fields.len(), 15);
        assert_eq!(def.fields[0].field_type, FieldType::ObjectId);

        let vid = def.field("VehicleID").unwrap();
        assert_eq!(vid.field_type, FieldType::String);
        assert_eq!(vid.length, Some(50));
        assert_eq!(def.field("StartDate").unwrap().length, Some(20));
        assert_eq!(def.field("VehicleType").unwrap().length, Some(20));
        assert_eq!(def.field("DirectionID").unwrap().field_type, FieldType::Integer);
        assert_eq!(def.field("Speed").unwrap().field_type, FieldType::Double);
        assert_eq!(def.field("LastUpdated").unwrap().field_type, FieldType::Date);
    }

    #[test]
    fn test_full_projection_on_own_schema() {
        let projection = Projection::for_layer(&definition()).unwrap();
        assert_eq!(projection.field_names().count(), VehicleField::ALL.len());

        let feature = projection.feature(&sample()).unwrap();
        assert_eq!(feature.geometry.x, 138.6);
        assert_eq!(feature.geometry.y, -34.9);
        assert_eq!(feature.attributes["VehicleID"], "V1");
        assert_eq!(feature.attributes["DirectionID"], 0);
        assert_eq!(feature.attributes["VehicleType"], "Bus");
        assert_eq!(feature.attributes["TripID"], Value::Null);
        assert_eq!(
            feature.attributes["LastUpdated"],
            Utc.with_ymd_and_hms(2026, 10, 16, 1, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_undeclared_fields_are_omitted() {
        let mut def = definition();
        def.fields.retain(|f| f.name != "LicensePlate" && f.name != "VehicleType");

        let projection = Projection::for_layer(&def).unwrap();
        let feature = projection.feature(&sample()).unwrap();
        assert!(!feature.attributes.contains_key("LicensePlate"));
        assert!(!feature.attributes.contains_key("VehicleType"));
        assert_eq!(feature.attributes.len(), 12);
    }

    #[test]
    fn test_store_spelling_is_used() {
        let mut def = definition();
        for f in def.fields.iter_mut() {
            if f.name == "VehicleID" {
                f.name = "vehicleid".to_string();
            }
        }
        let projection = Projection::for_layer(&def).unwrap();
        assert!(projection.field_names().any(|n| n == "vehicleid"));
    }

    #[test]
    fn test_incompatible_type_is_mismatch() {
        let mut def = definition();
        for f in def.fields.iter_mut() {
            if f.name == "DirectionID" {
                f.field_type = FieldType::String;
            }
        }
        let err = Projection::for_layer(&def).unwrap_err();
        assert!(matches!(err, PublishError::SchemaMismatch { ref field, .. } if field == "DirectionID"));
    }

    #[test]
    fn test_layer_without_vehicle_id_is_rejected() {
        let mut def = definition();
        def.fields.retain(|f| f.name != "VehicleID");
        let err = Projection::for_layer(&def).unwrap_err();
        assert!(matches!(err, PublishError::MissingKeyField { ref field } if field == "VehicleID"));

        def.fields.retain(|f| f.name == OBJECT_ID_FIELD);
        assert!(Projection::for_layer(&def).is_err());
    }

    #[test]
    fn test_record_without_coordinates_has_no_feature() {
        let projection = Projection::for_layer(&definition()).unwrap();
        let mut v = sample();
        v.latitude = None;
        assert!(projection.feature(&v).is_none());
    }
}
