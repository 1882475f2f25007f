//! Data processing modules.

pub mod evaluation;
pub mod features;
pub mod grid;
pub mod projection;
pub mod voting;
pub mod voxelizer;

// Re-export key types for convenience
pub use evaluation::{evaluate_predictions, ConfusionMatrix, EvalError};
pub use features::{FeatureBuilder, FeatureError, FeatureLayout, PointFeatures};
pub use grid::{BoundsMode, GridError, GridIndex, GridIndexer, VolumeBounds};
pub use projection::{ProjectedCloud, Projection, SphericalImage, SphericalParams};
pub use voting::{vote_voxel_labels, VotingError, VoxelGrid};
pub use voxelizer::{Sample, VoxelDataset, VoxelizeError, Voxelizer};
