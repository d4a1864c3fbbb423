use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use super::schema::vehicle_layer_definition;
use crate::services::feature_store::{Extent, FeatureStoreApi, RemoteStore};

/// Suffix format of versioned titles, UTC with second resolution.
pub const VERSION_SUFFIX_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn versioned_title(base: &str, now: DateTime<Utc>) -> String {
    format!("{base}_{}", now.format(VERSION_SUFFIX_FORMAT))
}

/// Creates a new `{base}_{timestamp}` point store with the fixed vehicle
/// schema. A single attempt: creation is not safe to repeat blindly.
#[tracing::instrument(skip(api, extent, now))]
pub async fn provision<S: FeatureStoreApi + ?Sized>(
    api: &S,
    base: &str,
    extent: Extent,
    now: DateTime<Utc>,
) -> Result<RemoteStore> {
    let title = versioned_title(base, now);
    let definition = vehicle_layer_definition(&title, extent);

    let store = api.create_point_store(&title, &definition).await?;
    info!(title = %store.title, store_id = %store.id, "Store created");
    Ok(store)
}
