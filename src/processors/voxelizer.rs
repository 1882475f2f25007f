//! Per-sample voxelization pipeline and dataset facade.
//!
//! One sample flows through
//! load -> augment -> project -> grid index -> {vote, features}.
//! Every stage is a pure function of its inputs plus the sample's own random
//! stream, so samples can be processed on any worker in any order.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{PipelineConfig, ProjectionType};
use crate::core::dataset::{DatasetIndex, ScanEntry, Split};
use crate::core::loaders::{LidarScan, LoaderError, ScanLabelLoader};
use crate::core::remap::{LabelSchema, RemapTable};
use crate::core::transforms::{sample_rng, AugmentRecord, Augmentor};

use super::features::{FeatureBuilder, FeatureError, FeatureLayout, PointFeatures};
use super::grid::{GridError, GridIndex, GridIndexer, VolumeBounds};
use super::projection::{spherical_image, ProjectedCloud, Projection, SphericalParams};
use super::voting::{vote_voxel_labels, VotingError, VoxelGrid};

/// Errors that can occur while voxelizing a sample.
#[derive(Error, Debug)]
pub enum VoxelizeError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Voting(#[from] VotingError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("scan has {points} points but {labels} labels")]
    LengthMismatch { points: usize, labels: usize },

    #[error("sample index {index} out of range for {len} scans")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result type for voxelization.
pub type Result<T> = std::result::Result<T, VoxelizeError>;

/// One voxelized scan.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Majority label per voxel; unoccupied voxels hold the ignore label.
    pub voxel_labels: VoxelGrid,
    /// Voxel of each point, in input order.
    pub grid_indices: Vec<GridIndex>,
    /// Training label of each point.
    pub point_labels: Vec<u8>,
    pub features: PointFeatures,
    /// Bounds used for gridding. `None` for the spherical projection.
    pub bounds: Option<VolumeBounds>,
    /// Random draws applied to this sample.
    pub augmentation: AugmentRecord,
    /// Position in the dataset; set for inference samples only.
    pub source_index: Option<usize>,
    pub ignore_label: u8,
}

impl Sample {
    pub fn len(&self) -> usize {
        self.point_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point_labels.is_empty()
    }

    /// Label of each point's voxel.
    ///
    /// Scoring these against `point_labels` gives the upper bound any
    /// voxel-level predictor can reach at this resolution.
    pub fn voxel_label_per_point(&self) -> Vec<u8> {
        self.grid_indices
            .iter()
            .map(|&idx| self.voxel_labels.get(idx).unwrap_or(self.ignore_label))
            .collect()
    }

    /// Number of voxels holding a label other than ignore.
    pub fn occupied_voxels(&self) -> usize {
        self.voxel_labels.count_not(self.ignore_label)
    }
}

/// Projection and gridding chosen together, since the spherical projection
/// yields its own indices.
#[derive(Debug, Clone, Copy)]
enum Gridding {
    Volume {
        projection: Projection,
        indexer: GridIndexer,
    },
    RangeImage(SphericalParams),
}

/// Turns one scan into a [`Sample`].
#[derive(Debug, Clone)]
pub struct Voxelizer {
    augmentor: Augmentor,
    gridding: Gridding,
    features: FeatureBuilder,
    grid_size: [usize; 3],
    ignore_label: u8,
}

impl Voxelizer {
    /// Build the pipeline stages from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the grid size or fixed bounds cannot produce a valid grid.
    pub fn new(config: &PipelineConfig, ignore_label: u8) -> Result<Self> {
        let grid_size = config.voxel.grid_size;
        let projection = Projection::from_config(config);

        let gridding = match projection {
            Projection::Spherical(params) => {
                if grid_size.iter().any(|&g| g < 1) {
                    return Err(GridError::InvalidGridSize {
                        grid_size,
                        min_cells: 1,
                    }
                    .into());
                }
                Gridding::RangeImage(params)
            }
            projection => {
                let indexer = if config.augmentations.fixed_vol {
                    GridIndexer::fixed(VolumeBounds::new(
                        config.voxel.min_vol,
                        config.voxel.max_vol,
                        grid_size,
                    )?)
                } else {
                    GridIndexer::per_sample(grid_size)?
                };
                Gridding::Volume {
                    projection,
                    indexer,
                }
            }
        };

        let layout = FeatureLayout::select(
            config.voxel.projection_type,
            config.augmentations.extended_features,
        );

        Ok(Self {
            augmentor: Augmentor::from_config(&config.augmentations),
            gridding,
            features: FeatureBuilder::new(layout),
            grid_size,
            ignore_label,
        })
    }

    pub fn grid_size(&self) -> [usize; 3] {
        self.grid_size
    }

    pub fn ignore_label(&self) -> u8 {
        self.ignore_label
    }

    pub fn projection(&self) -> Projection {
        match self.gridding {
            Gridding::Volume { projection, .. } => projection,
            Gridding::RangeImage(params) => Projection::Spherical(params),
        }
    }

    pub fn projection_type(&self) -> ProjectionType {
        self.projection().kind()
    }

    pub fn feature_layout(&self) -> FeatureLayout {
        self.features.layout()
    }

    /// Voxelize one scan with its training labels.
    ///
    /// Point order and count are preserved through every stage.
    ///
    /// # Arguments
    ///
    /// * `scan` - Raw points with reflectance
    /// * `labels` - Training label of each point
    /// * `rng` - Source for the flip and rotation draws
    ///
    /// # Returns
    ///
    /// A `Sample` with the voted voxel grid, per-point grid indices and
    /// features, and the bounds and augmentation that were applied.
    pub fn voxelize<R: Rng + ?Sized>(
        &self,
        scan: &LidarScan,
        labels: &[u8],
        rng: &mut R,
    ) -> Result<Sample> {
        if labels.len() != scan.len() {
            return Err(VoxelizeError::LengthMismatch {
                points: scan.len(),
                labels: labels.len(),
            });
        }

        let mut coords = scan.to_coords();
        let augmentation = self.augmentor.apply(&mut coords, rng);

        let (projected, bounds, grid_indices) = match &self.gridding {
            Gridding::Volume {
                projection,
                indexer,
            } => {
                let projected = projection.project(coords);
                let (bounds, indices) = indexer.index(projected.coords())?;
                (projected, Some(bounds), indices)
            }
            Gridding::RangeImage(params) => {
                let image = spherical_image(&coords, params);
                let indices = image.indices.clone();
                (ProjectedCloud::Spherical { coords, image }, None, indices)
            }
        };

        let voxel_labels =
            vote_voxel_labels(self.grid_size, self.ignore_label, &grid_indices, labels)?;
        let features = self.features.build(
            &projected,
            &scan.reflectance,
            &grid_indices,
            bounds.as_ref(),
        )?;

        let sample = Sample {
            voxel_labels,
            grid_indices,
            point_labels: labels.to_vec(),
            features,
            bounds,
            augmentation,
            source_index: None,
            ignore_label: self.ignore_label,
        };
        log::trace!(
            "voxelized {} points into {} occupied voxels",
            sample.len(),
            sample.occupied_voxels()
        );
        Ok(sample)
    }
}

/// Indexed access to voxelized samples of one split.
#[derive(Debug, Clone)]
pub struct VoxelDataset {
    index: DatasetIndex,
    loader: ScanLabelLoader,
    voxelizer: Voxelizer,
    seed: Option<u64>,
    num_workers: usize,
}

impl VoxelDataset {
    pub fn new(index: DatasetIndex, loader: ScanLabelLoader, voxelizer: Voxelizer) -> Self {
        Self {
            index,
            loader,
            voxelizer,
            seed: None,
            num_workers: 0,
        }
    }

    /// Base seed for per-sample augmentation streams.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Worker threads for [`VoxelDataset::par_map`]; 0 uses the global pool.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Open a split described by configuration and its label schema.
    pub fn open(config: &PipelineConfig, split: Split) -> AnyResult<Self> {
        let schema = LabelSchema::from_yaml(&config.dataset.schema).with_context(|| {
            format!(
                "Failed to load label schema {}",
                config.dataset.schema.display()
            )
        })?;
        let remap = RemapTable::from_schema(&schema, config.voxel.ignore_label)?;
        let index = DatasetIndex::from_schema(&config.dataset.data_dir, &schema, split)
            .with_context(|| format!("Failed to index {} split", split))?;
        let voxelizer = Voxelizer::new(config, remap.ignore_label())?;

        log::info!(
            "{} split: {} scans, {} projection, grid {:?}",
            split,
            index.len(),
            voxelizer.projection_type(),
            voxelizer.grid_size()
        );

        Ok(Self::new(index, ScanLabelLoader::new(remap), voxelizer)
            .with_seed(config.dataset.seed)
            .with_workers(config.dataset.num_workers))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Keep at most the first `limit` samples.
    pub fn truncate(&mut self, limit: usize) {
        self.index.truncate(limit);
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn loader(&self) -> &ScanLabelLoader {
        &self.loader
    }

    pub fn voxelizer(&self) -> &Voxelizer {
        &self.voxelizer
    }

    /// Load and voxelize sample `i`.
    pub fn get(&self, i: usize) -> Result<Sample> {
        let entry = self
            .index
            .get(i)
            .ok_or(VoxelizeError::IndexOutOfRange {
                index: i,
                len: self.len(),
            })?;
        let mut sample = self.voxelize_entry(entry, i)?;
        if !self.index.split().has_labels() {
            sample.source_index = Some(i);
        }
        Ok(sample)
    }

    fn voxelize_entry(&self, entry: &ScanEntry, i: usize) -> Result<Sample> {
        let (scan, labels) = self
            .loader
            .load(&entry.scan_path, entry.label_path.as_deref())?;
        let mut rng = sample_rng(self.seed, i);
        self.voxelizer.voxelize(&scan, &labels, &mut rng)
    }

    /// Voxelize every sample in parallel, in dataset order.
    pub fn voxelize_all(&self) -> AnyResult<Vec<Result<Sample>>> {
        self.par_map(|_, sample| sample)
    }

    /// Voxelize every sample in parallel and map each result through `f`.
    ///
    /// Outputs are returned in dataset order.
    pub fn par_map<T, F>(&self, f: F) -> AnyResult<Vec<T>>
    where
        T: Send,
        F: Fn(&ScanEntry, Result<Sample>) -> T + Sync + Send,
    {
        let run = || {
            (0..self.len())
                .into_par_iter()
                .map(|i| f(&self.index.entries()[i], self.get(i)))
                .collect::<Vec<T>>()
        };

        if self.num_workers == 0 {
            return Ok(run());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()
            .context("Failed to build worker pool")?;
        Ok(pool.install(run))
    }
}

/// Voxelize a single scan file outside of any dataset.
pub fn voxelize_file(
    voxelizer: &Voxelizer,
    loader: &ScanLabelLoader,
    scan_path: &Path,
    label_path: Option<&Path>,
    seed: Option<u64>,
) -> Result<Sample> {
    let (scan, labels) = loader.load(scan_path, label_path)?;
    let mut rng = sample_rng(seed, 0);
    voxelizer.voxelize(&scan, &labels, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::tests::{label_bytes, scan_bytes};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::TempDir;

    fn unit_config(projection: ProjectionType) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.voxel.projection_type = projection;
        config.voxel.grid_size = [2, 2, 2];
        config.voxel.min_vol = [0.0; 3];
        config.voxel.max_vol = [1.0; 3];
        config.augmentations.flip = false;
        config.augmentations.rotate = false;
        config.augmentations.fixed_vol = true;
        config
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_cartesian_majority_sample() -> Result<()> {
        let voxelizer = Voxelizer::new(&unit_config(ProjectionType::Cartesian), 0)?;
        let scan = LidarScan::from_points(&[
            [0.0, 0.0, 0.0, 0.1],
            [0.0, 0.0, 0.0, 0.2],
            [0.0, 0.0, 1.0, 0.3],
        ]);
        let sample = voxelizer.voxelize(&scan, &[5, 5, 7], &mut rng())?;

        assert_eq!(sample.grid_indices, vec![[0, 0, 0], [0, 0, 0], [0, 0, 1]]);
        assert_eq!(sample.voxel_labels.get([0, 0, 0]), Some(5));
        assert_eq!(sample.voxel_labels.get([0, 0, 1]), Some(7));
        assert_eq!(sample.occupied_voxels(), 2);
        assert_eq!(sample.voxel_label_per_point(), vec![5, 5, 7]);
        assert_eq!(sample.features.layout(), FeatureLayout::Cartesian);
        assert_eq!(sample.features.len(), 3);
        assert_eq!(sample.features.row(2).unwrap()[6], 0.3);
        assert!(sample.bounds.is_some());
        Ok(())
    }

    #[test]
    fn test_point_count_preserved_with_augmentation() -> Result<()> {
        let mut config = unit_config(ProjectionType::Polar);
        config.voxel.grid_size = [8, 8, 4];
        config.voxel.min_vol = [0.0, -std::f32::consts::PI, -2.0];
        config.voxel.max_vol = [10.0, std::f32::consts::PI, 2.0];
        config.augmentations.flip = true;
        config.augmentations.rotate = true;
        let voxelizer = Voxelizer::new(&config, 0)?;

        let points: Vec<[f32; 4]> = (0..40)
            .map(|i| {
                let t = i as f32 * 0.3;
                [t.cos() * 5.0, t.sin() * 5.0, (i % 5) as f32 * 0.5 - 1.0, 0.5]
            })
            .collect();
        let scan = LidarScan::from_points(&points);
        let labels: Vec<u8> = (0..40).map(|i| (i % 3) as u8 + 1).collect();

        let sample = voxelizer.voxelize(&scan, &labels, &mut rng())?;
        assert_eq!(sample.len(), 40);
        assert_eq!(sample.grid_indices.len(), 40);
        assert_eq!(sample.features.len(), 40);
        assert_eq!(sample.point_labels, labels);
        assert!(sample.augmentation.angle.is_some());
        for idx in &sample.grid_indices {
            assert!(sample.voxel_labels.contains(*idx));
        }
        Ok(())
    }

    #[test]
    fn test_seeded_samples_are_reproducible() -> Result<()> {
        let mut config = unit_config(ProjectionType::Cartesian);
        config.voxel.grid_size = [16, 16, 16];
        config.voxel.min_vol = [-10.0; 3];
        config.voxel.max_vol = [10.0; 3];
        config.augmentations.flip = true;
        config.augmentations.rotate = true;
        let voxelizer = Voxelizer::new(&config, 0)?;
        let scan = LidarScan::from_points(&[[3.0, 1.0, 0.5, 0.0], [-2.0, 4.0, 1.0, 0.0]]);

        let a = voxelizer.voxelize(&scan, &[1, 2], &mut sample_rng(Some(11), 3))?;
        let b = voxelizer.voxelize(&scan, &[1, 2], &mut sample_rng(Some(11), 3))?;
        assert_eq!(a.grid_indices, b.grid_indices);
        assert_eq!(a.augmentation, b.augmentation);
        Ok(())
    }

    #[test]
    fn test_spherical_sample_has_no_bounds() -> Result<()> {
        let mut config = unit_config(ProjectionType::Spherical);
        config.voxel.grid_size = [16, 32, 2];
        let voxelizer = Voxelizer::new(&config, 0)?;
        let scan = LidarScan::from_points(&[[10.0, 0.0, 0.0, 0.1], [0.0, 5.0, -1.0, 0.2]]);

        let sample = voxelizer.voxelize(&scan, &[1, 2], &mut rng())?;
        assert!(sample.bounds.is_none());
        assert_eq!(sample.features.layout(), FeatureLayout::Spherical);
        assert_eq!(sample.voxel_labels.grid_size(), [16, 32, 2]);
        assert_eq!(voxelizer.projection_type(), ProjectionType::Spherical);
        Ok(())
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let mut config = unit_config(ProjectionType::Polar);
        config.voxel.grid_size = [1, 8, 8];
        assert!(matches!(
            Voxelizer::new(&config, 0),
            Err(VoxelizeError::Grid(GridError::InvalidGridSize { .. }))
        ));
    }

    #[test]
    fn test_label_count_mismatch() {
        let voxelizer = Voxelizer::new(&unit_config(ProjectionType::Cartesian), 0).unwrap();
        let scan = LidarScan::from_points(&[[0.0; 4]]);
        let result = voxelizer.voxelize(&scan, &[1, 2], &mut rng());
        assert!(matches!(result, Err(VoxelizeError::LengthMismatch { .. })));
    }

    fn write_entry(dir: &Path, id: &str, points: &[[f32; 4]], labels: Option<&[u32]>) -> ScanEntry {
        let scan_path = dir.join(format!("{}.bin", id));
        fs::write(&scan_path, scan_bytes(points)).unwrap();
        let label_path = labels.map(|l| {
            let path = dir.join(format!("{}.label", id));
            fs::write(&path, label_bytes(l)).unwrap();
            path
        });
        ScanEntry {
            sequence: "00".to_string(),
            scan_id: id.to_string(),
            scan_path,
            label_path,
        }
    }

    fn identity_loader() -> ScanLabelLoader {
        ScanLabelLoader::new(RemapTable::new((0..10u32).map(|i| (i, i)), 0).unwrap())
    }

    #[test]
    fn test_dataset_par_map_keeps_order() -> AnyResult<()> {
        let temp_dir = TempDir::new()?;
        let entries = (0..6)
            .map(|n| {
                let points = vec![[0.0, 0.0, 0.0, 0.0]; n + 1];
                let labels = vec![n as u32; n + 1];
                write_entry(temp_dir.path(), &format!("{:06}", n), &points, Some(&labels))
            })
            .collect();
        let dataset = VoxelDataset::new(
            DatasetIndex::from_entries(Split::Valid, entries),
            identity_loader(),
            Voxelizer::new(&unit_config(ProjectionType::Cartesian), 0)?,
        )
        .with_workers(2);

        let counts = dataset.par_map(|_, sample| sample.map(|s| (s.len(), s.source_index)))?;
        for (n, count) in counts.into_iter().enumerate() {
            assert_eq!(count?, (n + 1, None));
        }

        let samples = dataset.voxelize_all()?;
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[3].as_ref().unwrap().point_labels, vec![3; 4]);
        Ok(())
    }

    #[test]
    fn test_inference_samples_carry_source_index() -> AnyResult<()> {
        let temp_dir = TempDir::new()?;
        let entries = vec![
            write_entry(temp_dir.path(), "000000", &[[0.0; 4]], None),
            write_entry(temp_dir.path(), "000001", &[[1.0; 4], [0.5; 4]], None),
        ];
        let dataset = VoxelDataset::new(
            DatasetIndex::from_entries(Split::Test, entries),
            identity_loader(),
            Voxelizer::new(&unit_config(ProjectionType::Cartesian), 0)?,
        );

        let sample = dataset.get(1)?;
        assert_eq!(sample.source_index, Some(1));
        assert_eq!(sample.point_labels, vec![0, 0]);
        assert!(matches!(
            dataset.get(2),
            Err(VoxelizeError::IndexOutOfRange { index: 2, len: 2 })
        ));
        Ok(())
    }
}
