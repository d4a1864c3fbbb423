use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a sync cycle ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Features were replaced in the store.
    Published,
    /// The feed produced no bytes; nothing was touched.
    NoData,
    /// Every decoded vehicle failed validation; the store was left as is.
    NoValidVehicles,
    #[default]
    Failed,
}

/// Milestone counts of one cycle, appended to the run history.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub timestamp: DateTime<Utc>,
    pub outcome: CycleOutcome,

    // feed
    pub feed_bytes: usize,
    pub decoded: usize,
    pub valid: usize,

    // store
    pub store_title: Option<String>,
    pub store_id: Option<String>,
    pub store_created: bool,
    pub written: usize,
    pub pruned: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunStats {
    pub fn started() -> Self {
        RunStats {
            timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Records that failed validation.
    pub fn dropped(&self) -> usize {
        self.decoded.saturating_sub(self.valid)
    }

    /// Marks the cycle failed, keeping whatever milestones were recorded.
    pub fn record_error(&mut self, error_type: &str, error_message: &str) {
        self.outcome = CycleOutcome::Failed;
        self.error_type = Some(error_type.to_string());
        self.error_message = Some(error_message.to_string());
    }
}
