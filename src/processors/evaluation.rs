//! Per-class IoU scoring of point predictions.
//!
//! Counts are accumulated in a confusion matrix with ground truth on rows and
//! predictions on columns. Points whose ground truth is the ignore class are
//! skipped.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use rayon::prelude::*;
use thiserror::Error;

use crate::core::dataset::DatasetIndex;
use crate::core::loaders::{load_raw_labels, ScanLabelLoader};

/// Errors that can occur while accumulating scores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{predictions} predictions for {labels} labels")]
    LengthMismatch { predictions: usize, labels: usize },

    #[error("class {class} outside confusion matrix of {num_classes} classes")]
    ClassOutOfRange { class: u8, num_classes: usize },

    #[error("cannot merge matrices of {left} and {right} classes")]
    ShapeMismatch { left: usize, right: usize },
}

/// Result type for evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Square matrix of (ground truth, prediction) counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    ignore: u8,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize, ignore: u8) -> Self {
        Self {
            num_classes,
            ignore,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Count at (ground truth, prediction).
    pub fn get(&self, truth: u8, predicted: u8) -> u64 {
        let (t, p) = (truth as usize, predicted as usize);
        if t >= self.num_classes || p >= self.num_classes {
            return 0;
        }
        self.counts[t * self.num_classes + p]
    }

    fn check(&self, class: u8) -> Result<usize> {
        let c = class as usize;
        if c >= self.num_classes {
            return Err(EvalError::ClassOutOfRange {
                class,
                num_classes: self.num_classes,
            });
        }
        Ok(c)
    }

    /// Accumulate one scan.
    pub fn add(&mut self, predictions: &[u8], labels: &[u8]) -> Result<()> {
        if predictions.len() != labels.len() {
            return Err(EvalError::LengthMismatch {
                predictions: predictions.len(),
                labels: labels.len(),
            });
        }
        for (&p, &t) in predictions.iter().zip(labels) {
            if t == self.ignore {
                continue;
            }
            let t = self.check(t)?;
            let p = self.check(p)?;
            self.counts[t * self.num_classes + p] += 1;
        }
        Ok(())
    }

    /// Sum another matrix into this one.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if other.num_classes != self.num_classes {
            return Err(EvalError::ShapeMismatch {
                left: self.num_classes,
                right: other.num_classes,
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    /// IoU of every class; NaN for classes that never occur.
    pub fn iou(&self) -> Vec<f64> {
        let n = self.num_classes;
        (0..n)
            .map(|c| {
                let tp = self.counts[c * n + c];
                let row: u64 = self.counts[c * n..(c + 1) * n].iter().sum();
                let col: u64 = (0..n).map(|r| self.counts[r * n + c]).sum();
                let union = row + col - tp;
                if union == 0 {
                    f64::NAN
                } else {
                    tp as f64 / union as f64
                }
            })
            .collect()
    }

    /// Mean IoU over present classes, excluding the ignore class.
    pub fn mean_iou(&self) -> f64 {
        let (sum, count) = self
            .iou()
            .into_iter()
            .enumerate()
            .filter(|&(c, v)| c != self.ignore as usize && !v.is_nan())
            .fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    }

    /// Fraction of non-ignored points predicted correctly.
    pub fn accuracy(&self) -> f64 {
        let n = self.num_classes;
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return f64::NAN;
        }
        let correct: u64 = (0..n).map(|c| self.counts[c * n + c]).sum();
        correct as f64 / total as f64
    }
}

/// Score stored prediction files against ground truth for a labeled split.
///
/// Predictions are read from `<predictions_root>/sequences/<NN>/predictions`
/// as raw ids and mapped back to training ids before scoring.
pub fn evaluate_predictions(
    index: &DatasetIndex,
    loader: &ScanLabelLoader,
    predictions_root: &Path,
) -> AnyResult<ConfusionMatrix> {
    let remap = loader.remap();
    let num_classes = remap.num_classes();
    let ignore = remap.ignore_label();

    let matrices = index
        .entries()
        .par_iter()
        .map(|entry| -> AnyResult<ConfusionMatrix> {
            let (_, labels) = loader.load(&entry.scan_path, entry.label_path.as_deref())?;
            let pred_path = entry.prediction_path(predictions_root);
            let raw = load_raw_labels(&pred_path)
                .with_context(|| format!("Failed to read predictions {}", pred_path.display()))?;
            let predictions = remap.remap_all(&raw)?;

            let mut matrix = ConfusionMatrix::new(num_classes, ignore);
            matrix
                .add(&predictions, &labels)
                .with_context(|| format!("Failed to score {}", pred_path.display()))?;
            Ok(matrix)
        })
        .collect::<AnyResult<Vec<_>>>()?;

    let mut total = ConfusionMatrix::new(num_classes, ignore);
    for matrix in &matrices {
        total.merge(matrix)?;
    }
    Ok(total)
}
