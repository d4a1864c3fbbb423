//! Trait and types for interacting with a remote, versioned feature store.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// WGS84 geographic coordinates.
pub const WGS84_WKID: u32 = 4326;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    pub wkid: u32,
}

impl SpatialReference {
    pub fn wgs84() -> Self {
        Self { wkid: WGS84_WKID }
    }
}

/// Declared spatial extent of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub spatial_reference: SpatialReference,
}

/// Field types as named by the store's REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "esriFieldTypeOID")]
    ObjectId,
    #[serde(rename = "esriFieldTypeString")]
    String,
    #[serde(rename = "esriFieldTypeSmallInteger")]
    SmallInteger,
    #[serde(rename = "esriFieldTypeInteger")]
    Integer,
    #[serde(rename = "esriFieldTypeBigInteger")]
    BigInteger,
    #[serde(rename = "esriFieldTypeSingle")]
    Single,
    #[serde(rename = "esriFieldTypeDouble")]
    Double,
    #[serde(rename = "esriFieldTypeDate")]
    Date,
    #[serde(other)]
    Other,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::ObjectId => "esriFieldTypeOID",
            FieldType::String => "esriFieldTypeString",
            FieldType::SmallInteger => "esriFieldTypeSmallInteger",
            FieldType::Integer => "esriFieldTypeInteger",
            FieldType::BigInteger => "esriFieldTypeBigInteger",
            FieldType::Single => "esriFieldTypeSingle",
            FieldType::Double => "esriFieldTypeDouble",
            FieldType::Date => "esriFieldTypeDate",
            FieldType::Other => "unsupported field type",
        };
        f.write_str(name)
    }
}

/// One entry of a layer's ordered field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
}

fn default_true() -> bool {
    true
}

/// Schema and geometry of an editable layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDefinition {
    pub name: String,
    pub geometry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Extent>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl LayerDefinition {
    pub const POINT: &'static str = "esriGeometryPoint";

    pub fn is_point(&self) -> bool {
        self.geometry_type == Self::POINT
    }

    /// Case-insensitive lookup, matching how the store resolves field names.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// The two item kinds that represent a feature store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Service,
    Layer,
    Other(String),
}

impl StoreKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Feature Service" => StoreKind::Service,
            "Feature Layer" => StoreKind::Layer,
            other => StoreKind::Other(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            StoreKind::Service => "Feature Service",
            StoreKind::Layer => "Feature Layer",
            StoreKind::Other(name) => name,
        }
    }
}

/// An owned item on the remote platform.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStore {
    pub id: String,
    pub title: String,
    pub kind: StoreKind,
    pub owner: String,
    /// Service endpoint for services; `<service>/<index>` for layer items.
    pub url: Option<String>,
    pub modified: DateTime<Utc>,
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGeometry {
    pub x: f64,
    pub y: f64,
    pub spatial_reference: SpatialReference,
}

/// A feature ready to be added to a layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    pub geometry: PointGeometry,
    pub attributes: Map<String, Value>,
}

/// Per-feature result of an add request.
#[derive(Debug, Clone, PartialEq)]
pub struct EditResult {
    pub success: bool,
    pub object_id: Option<i64>,
    pub error: Option<String>,
}

impl EditResult {
    pub fn ok(object_id: i64) -> Self {
        Self {
            success: true,
            object_id: Some(object_id),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            object_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Abstraction over a hosted feature store platform (e.g., ArcGIS Online).
///
/// Every call is a single attempt; callers decide what a failure means.
#[async_trait::async_trait]
pub trait FeatureStoreApi: Send + Sync {
    /// Returns owned items whose title matches `title` as the platform's search
    /// understands it (which may be looser than an exact match). An empty
    /// `kinds` slice searches every item type.
    async fn search_owned(&self, title: &str, kinds: &[StoreKind]) -> Result<Vec<RemoteStore>>;

    /// Creates a new service named `title` holding a single layer built from
    /// `definition`.
    async fn create_point_store(
        &self,
        title: &str,
        definition: &LayerDefinition,
    ) -> Result<RemoteStore>;

    async fn layer_definition(&self, layer_url: &str) -> Result<LayerDefinition>;

    /// Removes every feature in one request. Not every layer supports it.
    async fn truncate(&self, layer_url: &str) -> Result<()>;

    /// Removes every feature with a `1=1` predicate.
    async fn delete_all_features(&self, layer_url: &str) -> Result<()>;

    async fn add_features(&self, layer_url: &str, features: &[Feature]) -> Result<Vec<EditResult>>;

    async fn delete_item(&self, store: &RemoteStore) -> Result<()>;
}
