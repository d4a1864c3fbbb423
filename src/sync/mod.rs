//! One fetch → decode → validate → locate-or-provision → publish → prune cycle.
//!
//! Stages run strictly in order, each on the previous stage's full output.
//! Only the feed fetch retries; every store call is a single attempt.

pub mod locate;
pub mod provision;
pub mod publish;
pub mod retention;
pub mod schema;

pub use locate::locate;
pub use provision::{provision, versioned_title};
pub use publish::{PublishOutcome, publish};
pub use retention::{PruneReport, prune};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PublishError, SyncError};
use crate::fetch::{HttpClient, fetch_with_retry};
use crate::parser::decode_vehicles;
use crate::services::feature_store::FeatureStoreApi;
use crate::stats::{CycleOutcome, RunStats};
use crate::validate::Validator;

/// Runs a single sync cycle.
///
/// An empty feed or an empty validated set ends the cycle early without
/// touching the store. A feed that cannot be decoded is an error, as is any
/// failure to locate, create or publish. A failed retention pass after a new
/// store was created is logged only.
pub async fn run_cycle<C, S>(config: &PipelineConfig, http: &C, api: &S) -> Result<RunStats, SyncError>
where
    C: HttpClient,
    S: FeatureStoreApi + ?Sized,
{
    let mut stats = RunStats::started();
    run_cycle_into(config, http, api, &mut stats).await?;
    Ok(stats)
}

/// [`run_cycle`] recording each milestone into `stats` as it is reached.
/// On error, `stats` holds the counts reached before the failure.
#[tracing::instrument(skip_all, fields(base_title = %config.base_title))]
pub async fn run_cycle_into<C, S>(
    config: &PipelineConfig,
    http: &C,
    api: &S,
    stats: &mut RunStats,
) -> Result<(), SyncError>
where
    C: HttpClient,
    S: FeatureStoreApi + ?Sized,
{
    let bytes = fetch_with_retry(http, &config.feed_url, &config.retry_policy()).await;
    stats.feed_bytes = bytes.len();
    if bytes.is_empty() {
        warn!("No feed data this cycle; store left unchanged");
        stats.outcome = CycleOutcome::NoData;
        return Ok(());
    }

    let vehicles = decode_vehicles(&bytes)?;
    stats.decoded = vehicles.len();
    info!(vehicles = stats.decoded, "Vehicle positions decoded");

    let valid = Validator::from_config(config).filter(vehicles);
    stats.valid = valid.len();
    if valid.is_empty() {
        warn!(decoded = stats.decoded, "No valid vehicles this cycle; store left unchanged");
        stats.outcome = CycleOutcome::NoValidVehicles;
        return Ok(());
    }

    let base = config.base_title.as_str();
    let existing = locate(api, base).await.map_err(|cause| SyncError::Locate {
        title: base.to_string(),
        cause,
    })?;

    let (store, created) = match existing {
        Some(store) => (store, false),
        None => {
            let store = provision(api, base, config.store_extent(), Utc::now())
                .await
                .map_err(|cause| SyncError::Provision {
                    title: base.to_string(),
                    cause,
                })?;
            (store, true)
        }
    };
    stats.store_title = Some(store.title.clone());
    stats.store_id = Some(store.id.clone());
    stats.store_created = created;

    let outcome = match publish(api, &store, &valid, config.batch_size).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let PublishError::PartialWrite { written, .. } = &e {
                stats.written = *written;
            }
            return Err(e.into());
        }
    };
    stats.written = outcome.written;

    if created {
        match prune(api, base, Some(&store.id), config.keep_versions).await {
            Ok(report) => stats.pruned = report.deleted.len(),
            Err(e) => warn!(error = %format!("{e:#}"), "Retention pass failed; older versions left in place"),
        }
    }

    stats.outcome = CycleOutcome::Published;
    info!(
        store = %store.title,
        created,
        decoded = stats.decoded,
        valid = stats.valid,
        dropped = stats.dropped(),
        written = stats.written,
        pruned = stats.pruned,
        "Sync cycle complete"
    );
    Ok(())
}
