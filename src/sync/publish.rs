use tracing::{debug, info, warn};

use super::schema::Projection;
use crate::error::PublishError;
use crate::services::feature_store::{Feature, FeatureStoreApi, RemoteStore, StoreKind};
use crate::vehicle::VehicleSnapshot;

/// Index of the editable layer inside a vehicle store's service.
const EDIT_LAYER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub written: usize,
    pub chunks: usize,
}

/// Service endpoint of `store`. Layer items point at `<service>/<index>` and
/// are mapped to their parent service.
pub fn service_url(store: &RemoteStore) -> Option<String> {
    let url = store.url.as_deref()?.trim_end_matches('/');
    if url.is_empty() {
        return None;
    }
    let service = match store.kind {
        StoreKind::Layer => match url.rsplit_once('/') {
            Some((parent, index))
                if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) =>
            {
                parent
            }
            _ => url,
        },
        _ => url,
    };
    Some(service.to_string())
}

/// Replaces every feature in `store` with `records`, written in chunks of at
/// most `batch_size`.
///
/// The store's schema is read but never changed. The first failing chunk ends
/// the publish with [`PublishError::PartialWrite`]; chunks already accepted
/// stay in the store.
#[tracing::instrument(skip(api, store, records), fields(store_id = %store.id, records = records.len()))]
pub async fn publish<S: FeatureStoreApi + ?Sized>(
    api: &S,
    store: &RemoteStore,
    records: &[VehicleSnapshot],
    batch_size: usize,
) -> Result<PublishOutcome, PublishError> {
    let service = service_url(store).ok_or_else(|| PublishError::NoServiceUrl {
        title: store.title.clone(),
    })?;
    let layer_url = format!("{service}/{EDIT_LAYER}");

    let layer = api
        .layer_definition(&layer_url)
        .await
        .map_err(|cause| PublishError::Layer {
            url: layer_url.clone(),
            cause,
        })?;
    if !layer.is_point() {
        return Err(PublishError::NotPointLayer {
            url: layer_url,
            geometry: layer.geometry_type,
        });
    }

    let projection = Projection::for_layer(&layer)?;
    debug!(fields = ?projection.field_names().collect::<Vec<_>>(), "Projected fields");

    let features: Vec<Feature> = records.iter().filter_map(|v| projection.feature(v)).collect();

    clear(api, &layer_url).await?;

    let expected = features.len();
    let mut written = 0usize;
    let mut chunks = 0usize;

    for (i, chunk) in features.chunks(batch_size.max(1)).enumerate() {
        let n = i + 1;
        chunks = n;

        let results = match api.add_features(&layer_url, chunk).await {
            Ok(results) => results,
            Err(e) => {
                let reason = format!("{e:#}");
                debug!(chunk = n, written, expected, error = %reason, "Chunk add failed");
                return Err(PublishError::PartialWrite {
                    written,
                    expected,
                    chunk: n,
                    reason,
                });
            }
        };

        let accepted = results.iter().filter(|r| r.success).count();
        written += accepted;

        if accepted < chunk.len() {
            let first = results
                .iter()
                .find_map(|r| r.error.as_deref())
                .unwrap_or("no result returned");
            let reason = format!(
                "{} of {} features rejected; first error: {first}",
                chunk.len() - accepted,
                chunk.len()
            );
            debug!(chunk = n, written, expected, error = %reason, "Chunk add rejected");
            return Err(PublishError::PartialWrite {
                written,
                expected,
                chunk: n,
                reason,
            });
        }

        debug!(chunk = n, added = accepted, "Chunk written");
    }

    info!(written, chunks, "Features published");
    Ok(PublishOutcome { written, chunks })
}

async fn clear<S: FeatureStoreApi + ?Sized>(api: &S, layer_url: &str) -> Result<(), PublishError> {
    match api.truncate(layer_url).await {
        Ok(()) => {
            debug!("Layer truncated");
            Ok(())
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Truncate refused, deleting all features instead");
            api.delete_all_features(layer_url)
                .await
                .map_err(|cause| PublishError::Clear {
                    url: layer_url.to_string(),
                    cause,
                })
        }
    }
}
