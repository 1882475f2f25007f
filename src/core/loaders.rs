//! Loaders for raw LiDAR scan and label buffers.
//!
//! Both formats are headerless little-endian streams:
//! - Scan files (`.bin`): 4 x float32 per point (x, y, z, reflectance)
//! - Label files (`.label`): 1 x int32 per point, semantic id in the low
//!   16 bits and instance id in the high 16 bits

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::remap::{RemapError, RemapTable};

/// Bytes per point in a scan buffer.
pub const SCAN_STRIDE: usize = 4 * std::mem::size_of::<f32>();

/// Bytes per point in a label buffer.
pub const LABEL_STRIDE: usize = std::mem::size_of::<i32>();

/// Mask selecting the semantic id of a label word.
pub const SEMANTIC_MASK: u32 = 0xFFFF;

/// Errors that can occur during scan/label loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {kind} buffer: {len} bytes is not a multiple of {stride}")]
    MalformedBuffer {
        kind: &'static str,
        len: usize,
        stride: usize,
    },

    #[error("Point/label count mismatch for '{path}': {points} points, {labels} labels")]
    CountMismatch {
        path: PathBuf,
        points: usize,
        labels: usize,
    },

    #[error(transparent)]
    Remap(#[from] RemapError),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// One LiDAR sweep stored as parallel coordinate columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LidarScan {
    /// X coordinates of all points.
    pub x: Vec<f32>,
    /// Y coordinates of all points.
    pub y: Vec<f32>,
    /// Z coordinates of all points.
    pub z: Vec<f32>,
    /// Reflectance (remission) of all points.
    pub reflectance: Vec<f32>,
}

impl LidarScan {
    /// Creates a new empty scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scan with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            reflectance: Vec::with_capacity(capacity),
        }
    }

    /// Builds a scan from `[x, y, z, reflectance]` rows.
    pub fn from_points(points: &[[f32; 4]]) -> Self {
        let mut scan = Self::with_capacity(points.len());
        for &[x, y, z, r] in points {
            scan.push(x, y, z, r);
        }
        scan
    }

    /// Returns the number of points in the scan.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the scan holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Adds a point to the scan.
    #[inline]
    pub fn push(&mut self, x: f32, y: f32, z: f32, reflectance: f32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        self.reflectance.push(reflectance);
    }

    /// Converts the scan to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((&x, &y), &z)| [x, y, z])
            .collect()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => LoaderError::NotFound(path.to_path_buf()),
        _ => LoaderError::Io {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Decode a raw scan buffer.
///
/// The point count is inferred from the byte length; a trailing partial
/// point is rejected rather than dropped.
pub fn decode_scan(bytes: &[u8]) -> Result<LidarScan> {
    if bytes.len() % SCAN_STRIDE != 0 {
        return Err(LoaderError::MalformedBuffer {
            kind: "scan",
            len: bytes.len(),
            stride: SCAN_STRIDE,
        });
    }

    let mut scan = LidarScan::with_capacity(bytes.len() / SCAN_STRIDE);
    for chunk in bytes.chunks_exact(SCAN_STRIDE) {
        let mut values = [0.0f32; 4];
        for (value, word) in values.iter_mut().zip(chunk.chunks_exact(4)) {
            *value = f32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        scan.push(values[0], values[1], values[2], values[3]);
    }
    Ok(scan)
}

/// Decode a raw label buffer into semantic ids (instance ids stripped).
pub fn decode_labels(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % LABEL_STRIDE != 0 {
        return Err(LoaderError::MalformedBuffer {
            kind: "label",
            len: bytes.len(),
            stride: LABEL_STRIDE,
        });
    }

    Ok(bytes
        .chunks_exact(LABEL_STRIDE)
        .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]) as u32 & SEMANTIC_MASK)
        .collect())
}

/// Load a scan file from disk.
///
/// # Errors
///
/// Returns `LoaderError::NotFound` if the file does not exist and
/// `LoaderError::MalformedBuffer` if its size is not a whole number of points.
pub fn load_scan<P: AsRef<Path>>(path: P) -> Result<LidarScan> {
    decode_scan(&read_file(path.as_ref())?)
}

/// Load a label file from disk as semantic ids.
pub fn load_raw_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    decode_labels(&read_file(path.as_ref())?)
}

/// Reads a scan together with its remapped training labels.
#[derive(Debug, Clone)]
pub struct ScanLabelLoader {
    remap: RemapTable,
}

impl ScanLabelLoader {
    pub fn new(remap: RemapTable) -> Self {
        Self { remap }
    }

    /// The remap table applied to every label buffer.
    pub fn remap(&self) -> &RemapTable {
        &self.remap
    }

    /// Load one sample.
    ///
    /// When `label_path` is `None` (inference-only splits) every point gets
    /// training label 0.
    ///
    /// # Arguments
    ///
    /// * `scan_path` - Path to the `.bin` scan
    /// * `label_path` - Path to the matching `.label` file, if the split has one
    ///
    /// # Returns
    ///
    /// Tuple of (scan, training labels) with one label per point.
    ///
    /// # Errors
    ///
    /// Fails if either file is missing, if either buffer is malformed, if the
    /// point and label counts differ, or if a semantic id has no mapping.
    pub fn load(&self, scan_path: &Path, label_path: Option<&Path>) -> Result<(LidarScan, Vec<u8>)> {
        let scan = load_scan(scan_path)?;

        let labels = match label_path {
            Some(path) => {
                let raw = load_raw_labels(path)?;
                if raw.len() != scan.len() {
                    return Err(LoaderError::CountMismatch {
                        path: path.to_path_buf(),
                        points: scan.len(),
                        labels: raw.len(),
                    });
                }
                self.remap.remap_all(&raw)?
            }
            None => vec![0u8; scan.len()],
        };

        log::debug!(
            "{}: loaded {} points",
            scan_path.display(),
            scan.len()
        );

        Ok((scan, labels))
    }
}
