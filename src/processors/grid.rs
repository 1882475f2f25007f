//! Volume bounds and voxel index computation.
//!
//! Bounds are either fixed by configuration or recomputed from each sample's
//! own extents. Per-sample bounds are returned as a value alongside the
//! indices, so nothing shared is mutated while workers run in parallel.

use thiserror::Error;

/// Discrete `(i, j, k)` cell of a point.
pub type GridIndex = [usize; 3];

/// Errors that can occur while building bounds or indexing points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("grid size {grid_size:?} needs at least {min_cells} cells per axis")]
    InvalidGridSize {
        grid_size: [usize; 3],
        min_cells: usize,
    },

    #[error("degenerate volume on axis {axis}: min {min} >= max {max}")]
    DegenerateBounds { axis: usize, min: f32, max: f32 },

    #[error("cannot derive volume bounds from an empty sample")]
    EmptySample,
}

/// Result type for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Affine map from projected coordinates to voxel indices.
///
/// Only constructible through [`VolumeBounds::new`] or
/// [`VolumeBounds::from_extents`], so `min_vol < max_vol` holds on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBounds {
    min_vol: [f32; 3],
    max_vol: [f32; 3],
    grid_size: [usize; 3],
}

impl VolumeBounds {
    /// Validate and build bounds.
    ///
    /// Every axis needs at least two cells (the voxel size divides by
    /// `grid_size - 1`) and a strictly positive extent.
    pub fn new(min_vol: [f32; 3], max_vol: [f32; 3], grid_size: [usize; 3]) -> Result<Self> {
        if grid_size.iter().any(|&g| g < 2) {
            return Err(GridError::InvalidGridSize {
                grid_size,
                min_cells: 2,
            });
        }
        for axis in 0..3 {
            // Also rejects NaN bounds
            if !(max_vol[axis] > min_vol[axis]) {
                return Err(GridError::DegenerateBounds {
                    axis,
                    min: min_vol[axis],
                    max: max_vol[axis],
                });
            }
        }
        Ok(Self {
            min_vol,
            max_vol,
            grid_size,
        })
    }

    /// Bounds spanning exactly the given coordinates.
    pub fn from_extents(coords: &[[f32; 3]], grid_size: [usize; 3]) -> Result<Self> {
        if coords.is_empty() {
            return Err(GridError::EmptySample);
        }
        let mut min_vol = [f32::INFINITY; 3];
        let mut max_vol = [f32::NEG_INFINITY; 3];
        for p in coords {
            for axis in 0..3 {
                min_vol[axis] = min_vol[axis].min(p[axis]);
                max_vol[axis] = max_vol[axis].max(p[axis]);
            }
        }
        Self::new(min_vol, max_vol, grid_size)
    }

    pub fn min_vol(&self) -> [f32; 3] {
        self.min_vol
    }

    pub fn max_vol(&self) -> [f32; 3] {
        self.max_vol
    }

    pub fn grid_size(&self) -> [usize; 3] {
        self.grid_size
    }

    /// `max_vol - min_vol` per axis.
    #[inline]
    pub fn extent(&self) -> [f32; 3] {
        [0, 1, 2].map(|a| self.max_vol[a] - self.min_vol[a])
    }

    /// Edge length of one voxel per axis.
    #[inline]
    pub fn voxel_size(&self) -> [f32; 3] {
        let extent = self.extent();
        [0, 1, 2].map(|a| extent[a] / (self.grid_size[a] - 1) as f32)
    }

    /// Voxel index of a point, clipped into the grid.
    ///
    /// The coordinate is first clipped to `[min_vol, max_vol]`; a point on
    /// `max_vol` lands in the last cell.
    pub fn index_of(&self, p: [f32; 3]) -> GridIndex {
        let extent = self.extent();
        let voxel = self.voxel_size();
        [0, 1, 2].map(|a| {
            let last = self.grid_size[a] - 1;
            let rebased = (p[a] - self.min_vol[a]).clamp(0.0, extent[a]);
            if rebased >= extent[a] {
                last
            } else {
                ((rebased / voxel[a]).floor() as usize).min(last)
            }
        })
    }

    /// Center of a voxel in projected coordinates.
    #[inline]
    pub fn voxel_center(&self, index: GridIndex) -> [f32; 3] {
        let voxel = self.voxel_size();
        [0, 1, 2].map(|a| (index[a] as f32 + 0.5) * voxel[a] + self.min_vol[a])
    }
}

/// How bounds are chosen for each sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundsMode {
    /// Clip against configured bounds.
    Fixed(VolumeBounds),
    /// Recompute bounds from each sample's extents.
    PerSample { grid_size: [usize; 3] },
}

/// Maps projected coordinates to voxel indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridIndexer {
    mode: BoundsMode,
}

impl GridIndexer {
    pub fn fixed(bounds: VolumeBounds) -> Self {
        Self {
            mode: BoundsMode::Fixed(bounds),
        }
    }

    pub fn per_sample(grid_size: [usize; 3]) -> Result<Self> {
        if grid_size.iter().any(|&g| g < 2) {
            return Err(GridError::InvalidGridSize {
                grid_size,
                min_cells: 2,
            });
        }
        Ok(Self {
            mode: BoundsMode::PerSample { grid_size },
        })
    }

    pub fn mode(&self) -> &BoundsMode {
        &self.mode
    }

    /// Index every point, returning the bounds that were used.
    ///
    /// # Arguments
    ///
    /// * `coords` - Projected coordinates
    ///
    /// # Returns
    ///
    /// Tuple of (bounds, indices). Fixed mode returns the configured bounds;
    /// per-sample mode returns bounds spanning `coords`, which is the only
    /// place they are reported.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let indexer = GridIndexer::per_sample([3, 3, 3])?;
    /// let (bounds, indices) = indexer.index(&[[0.0; 3], [2.0; 3]])?;
    /// assert_eq!(bounds.max_vol(), [2.0; 3]);
    /// assert_eq!(indices, vec![[0, 0, 0], [2, 2, 2]]);
    /// ```
    ///
    /// # Errors
    ///
    /// Per-sample mode fails on an empty sample or a flat axis.
    pub fn index(&self, coords: &[[f32; 3]]) -> Result<(VolumeBounds, Vec<GridIndex>)> {
        let bounds = match self.mode {
            BoundsMode::Fixed(bounds) => bounds,
            BoundsMode::PerSample { grid_size } => VolumeBounds::from_extents(coords, grid_size)?,
        };
        let indices = coords.iter().map(|&p| bounds.index_of(p)).collect();
        Ok((bounds, indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bounds() -> VolumeBounds {
        VolumeBounds::new([0.0; 3], [1.0; 3], [2, 2, 2]).unwrap()
    }

    #[test]
    fn test_voxel_size() {
        let bounds = VolumeBounds::new([0.0, -10.0, -2.0], [50.0, 10.0, 2.0], [11, 5, 3]).unwrap();
        assert_eq!(bounds.voxel_size(), [5.0, 5.0, 2.0]);
        assert_eq!(bounds.extent(), [50.0, 20.0, 4.0]);
    }

    #[test]
    fn test_index_of_unit_grid() {
        let bounds = unit_bounds();
        assert_eq!(bounds.index_of([0.0, 0.0, 0.0]), [0, 0, 0]);
        assert_eq!(bounds.index_of([0.0, 0.0, 1.0]), [0, 0, 1]);
        assert_eq!(bounds.index_of([0.99, 0.5, 0.0]), [0, 0, 0]);
    }

    #[test]
    fn test_point_at_max_vol_maps_to_last_cell() {
        let bounds = VolumeBounds::new(
            [0.0, -std::f32::consts::PI, -3.0],
            [50.0, std::f32::consts::PI, 1.5],
            [480, 360, 32],
        )
        .unwrap();
        let index = bounds.index_of(bounds.max_vol());
        assert_eq!(index, [479, 359, 31]);

        let odd = VolumeBounds::new([-0.3; 3], [0.7; 3], [7, 13, 29]).unwrap();
        assert_eq!(odd.index_of(odd.max_vol()), [6, 12, 28]);
    }

    #[test]
    fn test_out_of_volume_points_are_clipped() {
        let bounds = VolumeBounds::new([0.0; 3], [10.0; 3], [5, 5, 5]).unwrap();
        assert_eq!(bounds.index_of([-4.0, 100.0, 5.0]), [0, 4, 2]);
    }

    #[test]
    fn test_voxel_center() {
        let bounds = VolumeBounds::new([0.0; 3], [10.0; 3], [6, 6, 6]).unwrap();
        assert_eq!(bounds.voxel_center([0, 1, 4]), [1.0, 3.0, 9.0]);
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        let result = VolumeBounds::new([0.0, 0.0, 1.0], [1.0, 1.0, 1.0], [4, 4, 4]);
        assert_eq!(
            result,
            Err(GridError::DegenerateBounds {
                axis: 2,
                min: 1.0,
                max: 1.0
            })
        );
    }

    #[test]
    fn test_inverted_or_nan_bounds_rejected() {
        assert!(matches!(
            VolumeBounds::new([5.0, 0.0, 0.0], [1.0, 1.0, 1.0], [4, 4, 4]),
            Err(GridError::DegenerateBounds { axis: 0, .. })
        ));
        assert!(matches!(
            VolumeBounds::new([0.0, f32::NAN, 0.0], [1.0; 3], [4, 4, 4]),
            Err(GridError::DegenerateBounds { axis: 1, .. })
        ));

        let bounds = VolumeBounds::new([-1.0, 0.0, 2.0], [1.0, 3.0, 4.0], [4, 5, 6]).unwrap();
        assert_eq!(bounds.min_vol(), [-1.0, 0.0, 2.0]);
        assert_eq!(bounds.max_vol(), [1.0, 3.0, 4.0]);
        assert_eq!(bounds.grid_size(), [4, 5, 6]);
    }

    #[test]
    fn test_grid_size_below_two_rejected() {
        assert!(matches!(
            VolumeBounds::new([0.0; 3], [1.0; 3], [4, 1, 4]),
            Err(GridError::InvalidGridSize { .. })
        ));
        assert!(GridIndexer::per_sample([0, 4, 4]).is_err());
    }

    #[test]
    fn test_per_sample_bounds_follow_extents() -> Result<()> {
        let indexer = GridIndexer::per_sample([3, 3, 3])?;
        let coords = vec![[-2.0, 1.0, 0.0], [2.0, 5.0, 4.0], [0.0, 3.0, 2.0]];

        let (bounds, indices) = indexer.index(&coords)?;
        assert_eq!(bounds.min_vol(), [-2.0, 1.0, 0.0]);
        assert_eq!(bounds.max_vol(), [2.0, 5.0, 4.0]);
        assert_eq!(indices, vec![[0, 0, 0], [2, 2, 2], [1, 1, 1]]);
        Ok(())
    }

    #[test]
    fn test_per_sample_bounds_do_not_leak_between_samples() -> Result<()> {
        let indexer = GridIndexer::per_sample([2, 2, 2])?;
        let (first, _) = indexer.index(&[[0.0; 3], [10.0; 3]])?;
        let (second, _) = indexer.index(&[[0.0; 3], [1.0; 3]])?;
        assert_eq!(first.max_vol(), [10.0; 3]);
        assert_eq!(second.max_vol(), [1.0; 3]);
        assert_eq!(indexer.mode(), &BoundsMode::PerSample { grid_size: [2, 2, 2] });
        Ok(())
    }

    #[test]
    fn test_per_sample_flat_sample_is_degenerate() {
        let indexer = GridIndexer::per_sample([4, 4, 4]).unwrap();
        let result = indexer.index(&[[0.0, 0.0, 1.0], [1.0, 1.0, 1.0]]);
        assert!(matches!(result, Err(GridError::DegenerateBounds { axis: 2, .. })));
        assert_eq!(indexer.index(&[]), Err(GridError::EmptySample));
    }

    #[test]
    fn test_fixed_indexer_keeps_configured_bounds() -> Result<()> {
        let indexer = GridIndexer::fixed(unit_bounds());
        let (bounds, indices) = indexer.index(&[[5.0, -5.0, 0.2]])?;
        assert_eq!(bounds, unit_bounds());
        assert_eq!(indices, vec![[1, 0, 0]]);
        Ok(())
    }
}
