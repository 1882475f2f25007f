//! Configuration types for the LiDAR voxelization pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Spatial projection applied before gridding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionType {
    /// Identity: grid directly over (x, y, z).
    #[serde(alias = "traditional")]
    Cartesian,
    /// (rho, theta, z) cylindrical coordinates.
    Polar,
    /// Range-image coordinates (row, col, depth bin).
    Spherical,
}

impl std::fmt::Display for ProjectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProjectionType::Cartesian => "cartesian",
            ProjectionType::Polar => "polar",
            ProjectionType::Spherical => "spherical",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ProjectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cartesian" | "traditional" => Ok(ProjectionType::Cartesian),
            "polar" => Ok(ProjectionType::Polar),
            "spherical" => Ok(ProjectionType::Spherical),
            other => Err(format!(
                "unknown projection '{}' (expected cartesian, polar or spherical)",
                other
            )),
        }
    }
}

/// Dataset location and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root directory containing `sequences/<NN>/velodyne` and `labels`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SemanticKITTI-style label schema (learning_map, split, ...)
    #[serde(default = "default_schema_path", alias = "semkitti_config")]
    pub schema: PathBuf,

    /// Worker threads for batch voxelization (0 = rayon default)
    #[serde(default)]
    pub num_workers: usize,

    /// Base seed for augmentation; unseeded runs draw from OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("config/semantic-kitti.yaml")
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            schema: default_schema_path(),
            num_workers: 0,
            seed: None,
        }
    }
}

/// Voxel grid geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelConfig {
    /// Projection used before gridding
    #[serde(default = "default_projection_type")]
    pub projection_type: ProjectionType,

    /// Cells per axis; (H, W, D) for the spherical projection
    #[serde(default = "default_grid_size")]
    pub grid_size: [usize; 3],

    /// Lower volume bound in projected coordinates
    #[serde(default = "default_min_vol")]
    pub min_vol: [f32; 3],

    /// Upper volume bound in projected coordinates
    #[serde(default = "default_max_vol")]
    pub max_vol: [f32; 3],

    /// Overrides the ignore id declared by the label schema
    #[serde(default)]
    pub ignore_label: Option<u8>,
}

fn default_projection_type() -> ProjectionType {
    ProjectionType::Polar
}

fn default_grid_size() -> [usize; 3] {
    [480, 360, 32]
}

fn default_min_vol() -> [f32; 3] {
    [0.0, -std::f32::consts::PI, -3.0]
}

fn default_max_vol() -> [f32; 3] {
    [50.0, std::f32::consts::PI, 1.5]
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            projection_type: default_projection_type(),
            grid_size: default_grid_size(),
            min_vol: default_min_vol(),
            max_vol: default_max_vol(),
            ignore_label: None,
        }
    }
}

/// Augmentation and feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Randomly mirror x and/or y
    #[serde(default = "default_true")]
    pub flip: bool,

    /// Random rotation about the z axis
    #[serde(default = "default_true", rename = "rot", alias = "rotate")]
    pub rotate: bool,

    /// Clip against the configured volume instead of per-sample extents
    #[serde(default = "default_true")]
    pub fixed_vol: bool,

    /// Append cartesian (x, y) to polar features (9 instead of 3 values)
    #[serde(default = "default_true", rename = "9features", alias = "extended_features")]
    pub extended_features: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            flip: true,
            rotate: true,
            fixed_vol: true,
            extended_features: true,
        }
    }
}

/// Vertical field of view for the spherical projection, in degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SphericalConfig {
    #[serde(default = "default_fov_up")]
    pub fov_up: f32,

    #[serde(default = "default_fov_down")]
    pub fov_down: f32,
}

fn default_fov_up() -> f32 {
    3.0
}

fn default_fov_down() -> f32 {
    -25.0
}

impl Default for SphericalConfig {
    fn default() -> Self {
        Self {
            fov_up: default_fov_up(),
            fov_down: default_fov_down(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub dataset: DatasetConfig,

    #[serde(default)]
    pub voxel: VoxelConfig,

    #[serde(default)]
    pub augmentations: AugmentationConfig,

    #[serde(default)]
    pub spherical: SphericalConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
