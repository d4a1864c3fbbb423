//! Output formatting and persistence: run history and local vehicle snapshots.
//!
//! Supports pretty-printing, CSV append and CSV export
//! (optionally gzip-compressed).

use anyhow::{Context, Result};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::stats::RunStats;
use crate::vehicle::VehicleSnapshot;

/// What to do when a snapshot file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    /// Refuse to touch an existing file.
    CreateNew,
}

/// Logs run statistics using Rust's debug pretty-print format.
pub fn print_pretty(stats: &RunStats) {
    debug!("{:#?}", stats);
}

/// Appends a [`RunStats`] record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, stats: &RunStats) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}

/// Writes validated vehicles to `path` as CSV, gzip-compressed when `gzip`.
///
/// Returns the number of rows written.
pub fn write_snapshot(
    path: &Path,
    vehicles: &[VehicleSnapshot],
    mode: WriteMode,
    gzip: bool,
) -> Result<usize> {
    let file = match mode {
        WriteMode::Overwrite => File::create(path),
        WriteMode::CreateNew => OpenOptions::new().write(true).create_new(true).open(path),
    }
    .with_context(|| format!("Failed to open snapshot file {}", path.display()))?;

    let rows = if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        let rows = write_rows(&mut encoder, vehicles)?;
        encoder.finish()?;
        rows
    } else {
        write_rows(file, vehicles)?
    };

    info!(path = %path.display(), rows, gzip, "Snapshot written");
    Ok(rows)
}

fn write_rows<W: Write>(out: W, vehicles: &[VehicleSnapshot]) -> Result<usize> {
    let mut writer = WriterBuilder::new().from_writer(out);
    for v in vehicles {
        writer.serialize(v)?;
    }
    writer.flush()?;
    Ok(vehicles.len())
}
