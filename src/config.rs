//! Pipeline configuration.
//!
//! Values are defaulted, optionally read from a JSON file, then overridden by
//! CLI flags. The resulting [`PipelineConfig`] is passed explicitly to every
//! stage; nothing reads process-wide settings.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fetch::{ClientOptions, RetryPolicy};
use crate::services::feature_store::{Extent, SpatialReference};

pub const DEFAULT_FEED_URL: &str =
    "https://gtfs.adelaidemetro.com.au/v1/realtime/vehicle_positions";
pub const DEFAULT_BASE_TITLE: &str = "Adelaide_Metro_Vehicles";
pub const DEFAULT_PORTAL_URL: &str = "https://www.arcgis.com";

/// Inclusive latitude/longitude window a valid position must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    /// Roughly the Adelaide metropolitan area.
    fn default() -> Self {
        Self {
            min_lat: -36.5,
            max_lat: -33.5,
            min_lon: 137.5,
            max_lon: 140.5,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn to_extent(&self) -> Extent {
        Extent {
            xmin: self.min_lon,
            ymin: self.min_lat,
            xmax: self.max_lon,
            ymax: self.max_lat,
            spatial_reference: SpatialReference::wgs84(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feed_url: String,
    pub base_title: String,
    pub bounds: BoundingBox,
    /// Route ids that are light rail rather than heavy rail.
    pub tram_routes: Vec<String>,
    /// Timestamp-suffixed stores kept after a new one is created.
    pub keep_versions: usize,
    pub batch_size: usize,
    pub max_fetch_attempts: u32,
    pub backoff_base_secs: f64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Declared extent of newly created stores; defaults to `bounds`.
    pub store_extent: Option<Extent>,
    pub portal_url: String,
    /// Owner of the stores. Resolved from the token when unset.
    pub username: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            base_title: DEFAULT_BASE_TITLE.to_string(),
            bounds: BoundingBox::default(),
            tram_routes: vec!["GLNELG".to_string(), "BTANIC".to_string()],
            keep_versions: 3,
            batch_size: 950,
            max_fetch_attempts: 4,
            backoff_base_secs: 1.5,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: concat!("vehicle-feed-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            store_extent: None,
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            username: None,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`. Missing keys keep their
    /// defaults.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{path}'"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file '{path}'"))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_title.trim().is_empty() {
            bail!("base_title must not be empty");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_fetch_attempts == 0 {
            bail!("max_fetch_attempts must be at least 1");
        }
        if !self.backoff_base_secs.is_finite() || self.backoff_base_secs < 0.0 {
            bail!("backoff_base_secs must be a non-negative number");
        }
        let b = &self.bounds;
        if ![b.min_lat, b.max_lat, b.min_lon, b.max_lon].iter().all(|v| v.is_finite()) {
            bail!("bounds must be finite numbers: {b:?}");
        }
        if b.min_lat > b.max_lat || b.min_lon > b.max_lon {
            bail!("bounds are inverted: {b:?}");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_fetch_attempts,
            base_delay: Duration::try_from_secs_f64(self.backoff_base_secs)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn store_extent(&self) -> Extent {
        self.store_extent.unwrap_or_else(|| self.bounds.to_extent())
    }
}
