//! Discovery of scan/label file pairs in a SemanticKITTI-style tree.
//!
//! ```text
//! <data_dir>/sequences/<NN>/velodyne/<id>.bin
//! <data_dir>/sequences/<NN>/labels/<id>.label
//! ```
//!
//! Label paths are derived from the scan id rather than listed separately,
//! so a missing label file surfaces as a not-found error when the sample is
//! loaded instead of silently shifting the pairing.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

use super::remap::LabelSchema;

/// Errors that can occur while indexing a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sequence directory not found: {0}")]
    MissingSequence(PathBuf),

    #[error("Unknown split '{0}' (expected train, valid or test)")]
    UnknownSplit(String),

    #[error("Split '{0}' is not declared in the label schema")]
    SplitNotInSchema(Split),

    #[error("Invalid scan file pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    /// Inference-only: scans have no labels.
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }

    /// Whether scans in this split come with label files.
    pub fn has_labels(&self) -> bool {
        !matches!(self, Split::Test)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "valid" | "val" | "validation" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            _ => Err(DatasetError::UnknownSplit(s.to_string())),
        }
    }
}

/// One scan and, for labeled splits, its label file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Two-digit sequence name, e.g. "08".
    pub sequence: String,
    /// Scan file stem, e.g. "000123".
    pub scan_id: String,
    pub scan_path: PathBuf,
    pub label_path: Option<PathBuf>,
}

impl ScanEntry {
    /// Where a prediction for this scan is written under `root`.
    pub fn prediction_path(&self, root: &Path) -> PathBuf {
        root.join("sequences")
            .join(&self.sequence)
            .join("predictions")
            .join(format!("{:0>6}.label", self.scan_id))
    }
}

/// Ordered list of scans in one split.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    split: Split,
    entries: Vec<ScanEntry>,
}

impl DatasetIndex {
    /// Build an index from explicit entries.
    pub fn from_entries(split: Split, entries: Vec<ScanEntry>) -> Self {
        Self { split, entries }
    }

    /// List the scans of `sequences` under `data_dir`.
    ///
    /// Entries are ordered by sequence, then by scan id.
    ///
    /// # Arguments
    ///
    /// * `data_dir` - Dataset root containing `sequences/<NN>/velodyne`
    /// * `sequences` - Sequence numbers to include
    /// * `split` - Decides whether label paths are recorded
    ///
    /// # Errors
    ///
    /// Fails if a sequence's `velodyne` directory is missing or cannot be
    /// listed.
    pub fn discover(data_dir: &Path, sequences: &[u32], split: Split) -> Result<Self> {
        let scan_pattern = Regex::new(r"^(\d+)\.bin$")?;
        let mut entries = Vec::new();

        let mut sequences = sequences.to_vec();
        sequences.sort_unstable();
        sequences.dedup();

        for seq in sequences {
            let sequence = format!("{:02}", seq);
            let seq_dir = data_dir.join("sequences").join(&sequence);
            let scan_dir = seq_dir.join("velodyne");
            if !scan_dir.is_dir() {
                return Err(DatasetError::MissingSequence(scan_dir));
            }

            let read_dir = fs::read_dir(&scan_dir).map_err(|source| DatasetError::ReadDir {
                path: scan_dir.clone(),
                source,
            })?;

            let mut scan_ids: Vec<String> = read_dir
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let name = entry.file_name();
                    let name = name.to_str()?;
                    scan_pattern
                        .captures(name)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                })
                .collect();
            scan_ids.sort();

            log::debug!("sequence {}: {} scans", sequence, scan_ids.len());

            for scan_id in scan_ids {
                let label_path = split
                    .has_labels()
                    .then(|| seq_dir.join("labels").join(format!("{}.label", scan_id)));
                entries.push(ScanEntry {
                    sequence: sequence.clone(),
                    scan_path: scan_dir.join(format!("{}.bin", scan_id)),
                    scan_id,
                    label_path,
                });
            }
        }

        Ok(Self { split, entries })
    }

    /// List the scans of a split as declared by the schema.
    pub fn from_schema(data_dir: &Path, schema: &LabelSchema, split: Split) -> Result<Self> {
        let sequences = schema
            .sequences(split.as_str())
            .ok_or(DatasetError::SplitNotInSchema(split))?;
        Self::discover(data_dir, sequences, split)
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScanEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    /// Keep at most the first `limit` entries.
    pub fn truncate(&mut self, limit: usize) {
        self.entries.truncate(limit);
    }
}
