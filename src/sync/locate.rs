use anyhow::Result;
use tracing::{debug, info};

use crate::services::feature_store::{FeatureStoreApi, RemoteStore, StoreKind};

/// Finds the owned store titled exactly `title`.
///
/// Only service and layer items are considered. When both exist the service
/// wins, since it carries the authoritative schema and capabilities.
#[tracing::instrument(skip(api))]
pub async fn locate<S: FeatureStoreApi + ?Sized>(api: &S, title: &str) -> Result<Option<RemoteStore>> {
    let results = api
        .search_owned(title, &[StoreKind::Service, StoreKind::Layer])
        .await?;
    debug!(results = results.len(), "Owned items returned by search");

    let matches: Vec<RemoteStore> = results
        .into_iter()
        .filter(|s| s.title == title && matches!(s.kind, StoreKind::Service | StoreKind::Layer))
        .collect();

    let chosen = matches
        .iter()
        .find(|s| s.kind == StoreKind::Service)
        .or_else(|| matches.first())
        .cloned();

    match &chosen {
        Some(s) => info!(store_id = %s.id, kind = s.kind.type_name(), "Existing store found"),
        None => info!("No existing store with this title"),
    }
    Ok(chosen)
}
