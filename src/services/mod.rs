//! Seams to external platforms consumed by the pipeline.

pub mod feature_store;
