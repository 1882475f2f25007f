//! Raw semantic id to training id remapping.
//!
//! The mapping is read from a SemanticKITTI-style YAML schema with the
//! sections `labels`, `color_map`, `learning_map`, `learning_map_inv`,
//! `learning_ignore` and `split`. Raw ids are the low 16 bits of a label
//! word, so the forward direction is stored as a dense lookup table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of distinct 16-bit semantic ids.
const RAW_ID_SPACE: usize = 1 << 16;

/// Number of distinct 8-bit training ids.
const TRAINING_ID_SPACE: usize = 1 << 8;

/// Errors that can occur while building or applying a remap table.
#[derive(Error, Debug)]
pub enum RemapError {
    #[error("IO error reading schema '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("raw label id {0} has no training mapping")]
    Undefined(u32),

    #[error("training id {0} has no inverse mapping")]
    UndefinedInverse(u8),

    #[error("raw label id {0} exceeds the 16-bit semantic id space")]
    RawIdOutOfRange(u32),

    #[error("training id {0} does not fit in 8 bits")]
    TrainingIdOutOfRange(u32),

    #[error("schema declares no ignored training class")]
    NoIgnoreClass,
}

/// Result type for remap operations.
pub type Result<T> = std::result::Result<T, RemapError>;

/// SemanticKITTI-style label schema document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSchema {
    /// Raw id -> class name
    #[serde(default)]
    pub labels: BTreeMap<u32, String>,

    /// Raw id -> BGR color
    #[serde(default)]
    pub color_map: BTreeMap<u32, [u8; 3]>,

    /// Raw id -> training id
    pub learning_map: BTreeMap<u32, u32>,

    /// Training id -> canonical raw id
    #[serde(default)]
    pub learning_map_inv: BTreeMap<u32, u32>,

    /// Training id -> excluded from evaluation
    #[serde(default)]
    pub learning_ignore: BTreeMap<u32, bool>,

    /// Split name (train / valid / test) -> sequence numbers
    #[serde(default)]
    pub split: BTreeMap<String, Vec<u32>>,
}

impl LabelSchema {
    /// Load a schema from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RemapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse a schema from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// The lowest training id flagged in `learning_ignore`.
    pub fn ignore_class(&self) -> Option<u8> {
        self.learning_ignore
            .iter()
            .filter(|&(_, &ignored)| ignored)
            .filter_map(|(&id, _)| u8::try_from(id).ok())
            .next()
    }

    /// Sequences belonging to a split, or `None` if the split is not declared.
    pub fn sequences(&self, split: &str) -> Option<&[u32]> {
        self.split.get(split).map(|v| v.as_slice())
    }

    /// Class name of a training id, resolved through its canonical raw id.
    pub fn class_name(&self, table: &RemapTable, training: u8) -> Option<&str> {
        let raw = table.to_raw(training).ok()?;
        self.labels.get(&raw).map(|s| s.as_str())
    }

    /// RGB color of a training id; `color_map` stores BGR.
    pub fn class_color(&self, table: &RemapTable, training: u8) -> Option<[u8; 3]> {
        let raw = table.to_raw(training).ok()?;
        self.color_map.get(&raw).map(|&[b, g, r]| [r, g, b])
    }
}

/// Mapping between raw semantic ids and contiguous training ids.
#[derive(Debug, Clone)]
pub struct RemapTable {
    forward: Vec<Option<u8>>,
    inverse: Vec<Option<u32>>,
    ignore: u8,
}

impl RemapTable {
    /// Build a table from raw -> training pairs.
    ///
    /// The inverse of each training id defaults to the lowest raw id mapping
    /// onto it; use [`RemapTable::with_inverse`] to pin canonical ids.
    pub fn new<I>(pairs: I, ignore: u8) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut forward = vec![None; RAW_ID_SPACE];
        let mut inverse: Vec<Option<u32>> = vec![None; TRAINING_ID_SPACE];

        for (raw, training) in pairs {
            let raw_idx = usize::try_from(raw)
                .ok()
                .filter(|&r| r < RAW_ID_SPACE)
                .ok_or(RemapError::RawIdOutOfRange(raw))?;
            let training_id =
                u8::try_from(training).map_err(|_| RemapError::TrainingIdOutOfRange(training))?;

            forward[raw_idx] = Some(training_id);
            let slot = &mut inverse[training_id as usize];
            *slot = Some(slot.map_or(raw, |existing| existing.min(raw)));
        }

        Ok(Self {
            forward,
            inverse,
            ignore,
        })
    }

    /// Replace inverse entries with explicit training -> raw pairs.
    pub fn with_inverse<I>(mut self, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        for (training, raw) in pairs {
            let training_id =
                u8::try_from(training).map_err(|_| RemapError::TrainingIdOutOfRange(training))?;
            if raw as usize >= RAW_ID_SPACE {
                return Err(RemapError::RawIdOutOfRange(raw));
            }
            self.inverse[training_id as usize] = Some(raw);
        }
        Ok(self)
    }

    /// Build the table declared by a schema.
    ///
    /// `ignore_override` takes precedence over the schema's `learning_ignore`.
    pub fn from_schema(schema: &LabelSchema, ignore_override: Option<u8>) -> Result<Self> {
        let ignore = ignore_override
            .or_else(|| schema.ignore_class())
            .ok_or(RemapError::NoIgnoreClass)?;

        let table = Self::new(schema.learning_map.iter().map(|(&r, &t)| (r, t)), ignore)?;
        table.with_inverse(schema.learning_map_inv.iter().map(|(&t, &r)| (t, r)))
    }

    /// Map a semantic id (low 16 bits of a label word) to its training id.
    #[inline]
    pub fn to_training(&self, raw: u32) -> Result<u8> {
        self.forward
            .get(raw as usize)
            .copied()
            .flatten()
            .ok_or(RemapError::Undefined(raw))
    }

    /// Map a training id back to its canonical raw id.
    #[inline]
    pub fn to_raw(&self, training: u8) -> Result<u32> {
        self.inverse[training as usize].ok_or(RemapError::UndefinedInverse(training))
    }

    /// Remap a whole label buffer, failing on the first undefined id.
    pub fn remap_all(&self, raw: &[u32]) -> Result<Vec<u8>> {
        raw.iter().map(|&id| self.to_training(id)).collect()
    }

    /// Inverse-remap a buffer of training ids.
    pub fn unmap_all(&self, training: &[u8]) -> Result<Vec<u32>> {
        training.iter().map(|&id| self.to_raw(id)).collect()
    }

    /// Reserved id for unlabeled / ignored points.
    #[inline]
    pub fn ignore_label(&self) -> u8 {
        self.ignore
    }

    /// One past the largest training id that any raw id maps to.
    pub fn num_classes(&self) -> usize {
        self.forward
            .iter()
            .flatten()
            .map(|&t| t as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Raw ids with a defined forward mapping, ascending.
    pub fn raw_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.forward
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some())
            .map(|(raw, _)| raw as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
labels:
  0: "unlabeled"
  1: "outlier"
  10: "car"
  40: "road"
  252: "moving-car"
color_map:
  0: [0, 0, 0]
  10: [245, 150, 100]
  40: [255, 0, 255]
learning_map:
  0: 0
  1: 0
  10: 1
  40: 2
  252: 1
learning_map_inv:
  0: 0
  1: 10
  2: 40
learning_ignore:
  0: true
  1: false
  2: false
split:
  train: [0, 1]
  valid: [8]
  test: [11]
"#;

    fn schema() -> LabelSchema {
        LabelSchema::from_yaml_str(SCHEMA).unwrap()
    }

    #[test]
    fn test_schema_parsing() {
        let schema = schema();
        assert_eq!(schema.ignore_class(), Some(0));
        assert_eq!(schema.sequences("valid"), Some(&[8u32][..]));
        assert!(schema.sequences("bogus").is_none());
    }

    #[test]
    fn test_forward_many_to_one() -> Result<()> {
        let table = RemapTable::from_schema(&schema(), None)?;
        assert_eq!(table.to_training(10)?, 1);
        assert_eq!(table.to_training(252)?, 1);
        assert_eq!(table.to_training(1)?, 0);
        assert_eq!(table.num_classes(), 3);
        assert_eq!(table.ignore_label(), 0);
        Ok(())
    }

    #[test]
    fn test_inverse_uses_canonical_ids() -> Result<()> {
        let table = RemapTable::from_schema(&schema(), None)?;
        assert_eq!(table.to_raw(1)?, 10);
        assert_eq!(table.to_raw(2)?, 40);
        assert!(matches!(table.to_raw(9), Err(RemapError::UndefinedInverse(9))));
        Ok(())
    }

    #[test]
    fn test_forward_then_inverse_on_bijective_table() -> Result<()> {
        let table = RemapTable::new(vec![(0, 0), (10, 1), (40, 2), (70, 3)], 0)?;
        for raw in table.raw_ids().collect::<Vec<_>>() {
            assert_eq!(table.to_raw(table.to_training(raw)?)?, raw);
        }
        Ok(())
    }

    #[test]
    fn test_reapplying_table_is_stable() -> Result<()> {
        let table = RemapTable::from_schema(&schema(), None)?;
        let raw = vec![40, 10, 0, 252, 1];
        let first = table.remap_all(&raw)?;
        let second = table.remap_all(&raw)?;
        assert_eq!(first, second);
        assert_eq!(first, vec![2, 1, 0, 1, 0]);
        Ok(())
    }

    #[test]
    fn test_undefined_raw_id() {
        let table = RemapTable::from_schema(&schema(), None).unwrap();
        let result = table.remap_all(&[10, 99]);
        assert!(matches!(result, Err(RemapError::Undefined(99))));
    }

    #[test]
    fn test_ignore_override() -> Result<()> {
        let table = RemapTable::from_schema(&schema(), Some(255))?;
        assert_eq!(table.ignore_label(), 255);
        Ok(())
    }

    #[test]
    fn test_missing_ignore_class() {
        let mut schema = schema();
        schema.learning_ignore.clear();
        assert!(matches!(
            RemapTable::from_schema(&schema, None),
            Err(RemapError::NoIgnoreClass)
        ));
    }

    #[test]
    fn test_out_of_range_ids() {
        assert!(matches!(
            RemapTable::new(vec![(70_000, 1)], 0),
            Err(RemapError::RawIdOutOfRange(70_000))
        ));
        assert!(matches!(
            RemapTable::new(vec![(1, 300)], 0),
            Err(RemapError::TrainingIdOutOfRange(300))
        ));
    }

    #[test]
    fn test_bundled_semantic_kitti_schema() -> Result<()> {
        let schema =
            LabelSchema::from_yaml_str(include_str!("../../config/semantic-kitti.yaml"))?;
        let table = RemapTable::from_schema(&schema, None)?;
        assert_eq!(table.num_classes(), 20);
        assert_eq!(table.ignore_label(), 0);
        assert_eq!(table.to_training(259)?, 5);
        assert_eq!(table.to_raw(19)?, 81);
        assert_eq!(schema.sequences("valid"), Some(&[8u32][..]));
        Ok(())
    }

    #[test]
    fn test_class_name_and_color() -> Result<()> {
        let schema = schema();
        let table = RemapTable::from_schema(&schema, None)?;
        assert_eq!(schema.class_name(&table, 1), Some("car"));
        // BGR [245, 150, 100] -> RGB [100, 150, 245]
        assert_eq!(schema.class_color(&table, 1), Some([100, 150, 245]));
        assert_eq!(schema.class_color(&table, 7), None);
        Ok(())
    }
}
