//! Core data types and I/O operations.

pub mod dataset;
pub mod loaders;
pub mod remap;
pub mod transforms;
pub mod writers;

pub use dataset::{DatasetError, DatasetIndex, ScanEntry, Split};
pub use loaders::{LidarScan, LoaderError, ScanLabelLoader};
pub use remap::{LabelSchema, RemapError, RemapTable};
pub use transforms::{AugmentRecord, Augmentor};
pub use writers::{write_features_csv, write_predictions, WriteError};
