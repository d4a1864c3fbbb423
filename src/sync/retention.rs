use anyhow::Result;
use tracing::{info, warn};

use crate::services::feature_store::{FeatureStoreApi, RemoteStore};

/// What a retention pass did, by item id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub protected: Vec<String>,
    pub failed: Vec<String>,
}

/// Deletes timestamp-suffixed versions of `base` outside the retention window.
///
/// Candidates are owned items titled `{base}_...`, newest first. The newest
/// `keep_n` and `keep_id` survive, as does anything protected and the item
/// titled exactly `base`. A failed deletion is logged and the pass moves on.
#[tracing::instrument(skip(api))]
pub async fn prune<S: FeatureStoreApi + ?Sized>(
    api: &S,
    base: &str,
    keep_id: Option<&str>,
    keep_n: usize,
) -> Result<PruneReport> {
    let prefix = format!("{base}_");
    let mut candidates: Vec<RemoteStore> = api
        .search_owned(base, &[])
        .await?
        .into_iter()
        .filter(|s| s.title != base && s.title.starts_with(&prefix))
        .collect();
    candidates.sort_by(|a, b| b.modified.cmp(&a.modified));

    let mut report = PruneReport::default();

    for (rank, store) in candidates.iter().enumerate() {
        if rank < keep_n || keep_id == Some(store.id.as_str()) {
            report.kept.push(store.id.clone());
            continue;
        }
        if store.protected {
            info!(title = %store.title, store_id = %store.id, "Skipping protected store");
            report.protected.push(store.id.clone());
            continue;
        }
        match api.delete_item(store).await {
            Ok(()) => {
                info!(title = %store.title, store_id = %store.id, "Deleted superseded store");
                report.deleted.push(store.id.clone());
            }
            Err(e) => {
                warn!(title = %store.title, store_id = %store.id, error = %format!("{e:#}"), "Failed to delete store");
                report.failed.push(store.id.clone());
            }
        }
    }

    info!(
        candidates = candidates.len(),
        kept = report.kept.len(),
        deleted = report.deleted.len(),
        protected = report.protected.len(),
        failed = report.failed.len(),
        "Retention pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryStore;
    use crate::services::feature_store::StoreKind;
    use chrono::{Duration, TimeZone, Utc};

    /// Seeds six versions; index 0 is rank 1 (newest).
    fn seed_ranks(api: &MemoryStore, protected_rank: Option<usize>) -> Vec<RemoteStore> {
        let newest = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        (1..=6)
            .map(|rank| {
                let modified = newest - Duration::hours(rank as i64);
                let title = format!("Vehicles_{}", modified.format("%Y%m%d_%H%M%S"));
                api.seed_at(&title, StoreKind::Service, protected_rank == Some(rank), modified)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_keeps_top_n_and_keep_id() {
        let api = MemoryStore::new("alice");
        let ranks = seed_ranks(&api, None);
        let rank5 = ranks[4].id.clone();

        let report = prune(&api, "Vehicles", Some(&rank5), 3).await.unwrap();

        let mut survivors = api.ids();
        survivors.sort();
        let mut expected = vec![
            ranks[0].id.clone(),
            ranks[1].id.clone(),
            ranks[2].id.clone(),
            rank5,
        ];
        expected.sort();
        assert_eq!(survivors, expected);

        let mut deleted = report.deleted.clone();
        deleted.sort();
        let mut expected_deleted = vec![ranks[3].id.clone(), ranks[5].id.clone()];
        expected_deleted.sort();
        assert_eq!(deleted, expected_deleted);
    }

    #[tokio::test]
    async fn test_base_title_and_protected_are_never_deleted() {
        let api = MemoryStore::new("alice");
        let base = api.seed("Vehicles", StoreKind::Service, false);
        let ranks = seed_ranks(&api, Some(6));

        let report = prune(&api, "Vehicles", None, 3).await.unwrap();

        assert!(api.ids().contains(&base.id));
        assert!(api.ids().contains(&ranks[5].id));
        assert_eq!(report.protected, vec![ranks[5].id.clone()]);
        assert_eq!(report.deleted.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_abort_pass() {
        let api = MemoryStore::new("alice");
        let ranks = seed_ranks(&api, None);
        api.fail_delete(&ranks[3].id);

        let report = prune(&api, "Vehicles", None, 3).await.unwrap();
        assert_eq!(report.failed, vec![ranks[3].id.clone()]);
        assert_eq!(report.deleted.len(), 2);
        assert!(api.ids().contains(&ranks[3].id));
    }

    #[tokio::test]
    async fn test_unrelated_titles_are_ignored() {
        let api = MemoryStore::new("alice");
        api.seed("VehiclesArchive", StoreKind::Service, false);
        api.seed("Other_Vehicles_1", StoreKind::Service, false);

        let report = prune(&api, "Vehicles", None, 0).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(api.item_count(), 2);
    }
}
