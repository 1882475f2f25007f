//! Writers for prediction label files and per-point CSV exports.
//!
//! Prediction files use the SemanticKITTI layout: one little-endian `u32`
//! raw semantic id per point, stored under
//! `<root>/sequences/<NN>/predictions/<id>.label`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::dataset::ScanEntry;
use super::remap::{RemapError, RemapTable};
use crate::processors::voxelizer::Sample;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// A training id has no raw id to write back.
    #[error(transparent)]
    Remap(#[from] RemapError),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write raw semantic ids as a `.label` file.
pub fn write_label_file(path: &Path, raw_ids: &[u32]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    let write_err = |e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    };
    for id in raw_ids {
        writer.write_all(&id.to_le_bytes()).map_err(write_err)?;
    }
    writer.flush().map_err(write_err)?;
    Ok(())
}

/// Map training-id predictions back to raw ids and store them for `entry`.
///
/// Returns the path that was written.
///
/// # Errors
///
/// Fails before touching the filesystem if any prediction has no inverse
/// mapping.
pub fn write_predictions(
    root: &Path,
    entry: &ScanEntry,
    predictions: &[u8],
    remap: &RemapTable,
) -> Result<PathBuf> {
    let raw_ids = remap.unmap_all(predictions)?;
    let path = entry.prediction_path(root);
    write_label_file(&path, &raw_ids)?;
    log::debug!("wrote {} predictions to {}", raw_ids.len(), path.display());
    Ok(path)
}

/// Write one row per point: grid index, training label, then features.
pub fn write_features_csv(path: &Path, sample: &Sample) -> Result<()> {
    ensure_parent_dirs(path)?;
    let writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(writer);

    let path_str = path.display().to_string();
    let csv_err = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    let mut header = vec!["i", "j", "k", "label"];
    header.extend_from_slice(sample.features.layout().column_names());
    csv_writer.write_record(&header).map_err(csv_err)?;

    for (n, (idx, label)) in sample
        .grid_indices
        .iter()
        .zip(&sample.point_labels)
        .enumerate()
    {
        let mut record = vec![
            idx[0].to_string(),
            idx[1].to_string(),
            idx[2].to_string(),
            label.to_string(),
        ];
        if let Some(row) = sample.features.row(n) {
            record.extend(row.iter().map(|v| format!("{:.6}", v)));
        }
        csv_writer.write_record(&record).map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    Ok(())
}
