//! LiDAR scan voxelization pipeline.
//!
//! This crate provides tools for:
//! - Loading SemanticKITTI-style `.bin` scans and `.label` files
//! - Remapping raw semantic ids to contiguous training ids
//! - Flip/rotation augmentation and cartesian, polar or spherical projection
//! - Grid indexing with fixed or per-sample volume bounds
//! - Majority-vote voxel labels and per-point feature vectors
//! - Writing predictions and scoring them with per-class IoU
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::core::dataset::Split;
//! use lidar_pipeline::processors::voxelizer::VoxelDataset;
//! use lidar_pipeline::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let dataset = VoxelDataset::open(&config, Split::Valid).unwrap();
//! let sample = dataset.get(0).unwrap();
//! println!("{} occupied voxels", sample.occupied_voxels());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{AugmentationConfig, DatasetConfig, PipelineConfig, ProjectionType, VoxelConfig};
pub use core::loaders::LidarScan;
pub use processors::voxelizer::{Sample, VoxelDataset, Voxelizer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
