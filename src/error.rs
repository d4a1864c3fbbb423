//! Error taxonomy for a sync cycle.
//!
//! Only the variants the pipeline has to branch on get a type here; everything
//! else travels as [`anyhow::Error`] inside a `cause` field.

use reqwest::StatusCode;
use thiserror::Error;

/// A single failed feed request, classified for the retry loop.
#[derive(Error, Debug)]
pub enum FetchFailure {
    #[error("invalid feed url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed endpoint returned HTTP {status}")]
    Status { status: StatusCode },
}

impl FetchFailure {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Transport failures (connect, timeout, truncated body), `408`, `429` and
    /// any `5xx` are transient. A malformed URL or any other status is not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::InvalidUrl { .. } => false,
            FetchFailure::Transport(e) => !e.is_builder(),
            FetchFailure::Status { status } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Failures while replacing the contents of a store.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("store '{title}' has no service url to edit")]
    NoServiceUrl { title: String },

    #[error("could not read layer definition at {url}: {cause:#}")]
    Layer { url: String, cause: anyhow::Error },

    #[error("layer at {url} has geometry type '{geometry}', expected points; recreate the store")]
    NotPointLayer { url: String, geometry: String },

    #[error(
        "field '{field}' is declared as {declared} but records carry {expected}; \
         delete the store so a new one is created with the current schema"
    )]
    SchemaMismatch {
        field: String,
        declared: String,
        expected: String,
    },

    #[error(
        "layer does not declare '{field}', so it does not hold vehicle positions; \
         refusing to replace its contents"
    )]
    MissingKeyField { field: String },

    #[error("could not clear existing features at {url}: {cause:#}")]
    Clear { url: String, cause: anyhow::Error },

    #[error("chunk {chunk} failed after {written} of {expected} features were written: {reason}")]
    PartialWrite {
        written: usize,
        expected: usize,
        chunk: usize,
        reason: String,
    },
}

/// Fatal outcome of one sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("feed could not be decoded: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("searching for store '{title}' failed: {cause:#}")]
    Locate { title: String, cause: anyhow::Error },

    #[error("creating store '{title}' failed: {cause:#}")]
    Provision { title: String, cause: anyhow::Error },

    #[error("publishing failed: {0}")]
    Publish(#[from] PublishError),
}

impl SyncError {
    /// Short machine-readable label, written to the run history.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Decode(_) => "decode_error",
            SyncError::Locate { .. } => "locate_error",
            SyncError::Provision { .. } => "provision_error",
            SyncError::Publish(PublishError::SchemaMismatch { .. })
            | SyncError::Publish(PublishError::NotPointLayer { .. })
            | SyncError::Publish(PublishError::MissingKeyField { .. }) => "schema_mismatch",
            SyncError::Publish(_) => "publish_error",
        }
    }
}
