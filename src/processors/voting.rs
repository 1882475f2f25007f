//! Majority-vote label aggregation per voxel.
//!
//! Points are stably sorted by grid index (k, then j, then i) so identical
//! indices form contiguous runs. A 256-bin histogram is accumulated per run
//! and the most frequent label is written to the grid when the run ends.
//! Equal counts resolve to the lowest label id.
//!
//! The scan depends on the sort having grouped each run, so it runs
//! sequentially; parallelism belongs at the sample level.

use thiserror::Error;

use super::grid::GridIndex;

/// Number of distinct 8-bit labels.
const LABEL_BINS: usize = 256;

/// Errors that can occur during voxel voting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VotingError {
    #[error("array length mismatch: {indices} grid indices, {labels} labels")]
    LengthMismatch { indices: usize, labels: usize },

    #[error("grid index {index:?} outside grid {grid_size:?}")]
    IndexOutOfBounds {
        index: GridIndex,
        grid_size: [usize; 3],
    },
}

/// Result type for voting operations.
pub type Result<T> = std::result::Result<T, VotingError>;

/// Dense 3D grid of 8-bit labels, row-major over `(i, j, k)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelGrid {
    grid_size: [usize; 3],
    cells: Vec<u8>,
}

impl VoxelGrid {
    /// Grid with every cell set to `fill`.
    pub fn filled(grid_size: [usize; 3], fill: u8) -> Self {
        let len = grid_size.iter().product();
        Self {
            grid_size,
            cells: vec![fill; len],
        }
    }

    #[inline]
    pub fn grid_size(&self) -> [usize; 3] {
        self.grid_size
    }

    /// Flat cell storage in row-major order.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    #[inline]
    pub fn contains(&self, index: GridIndex) -> bool {
        index.iter().zip(&self.grid_size).all(|(&i, &g)| i < g)
    }

    #[inline]
    fn offset(&self, [i, j, k]: GridIndex) -> usize {
        (i * self.grid_size[1] + j) * self.grid_size[2] + k
    }

    /// Label at `index`, or `None` outside the grid.
    pub fn get(&self, index: GridIndex) -> Option<u8> {
        self.contains(index).then(|| self.cells[self.offset(index)])
    }

    /// Set the label at `index`. Returns false outside the grid.
    pub fn set(&mut self, index: GridIndex, label: u8) -> bool {
        if !self.contains(index) {
            return false;
        }
        let offset = self.offset(index);
        self.cells[offset] = label;
        true
    }

    /// Number of cells whose label differs from `ignore`.
    pub fn count_not(&self, ignore: u8) -> usize {
        self.cells.iter().filter(|&&c| c != ignore).count()
    }
}

/// Lowest label with the highest count.
#[inline]
fn first_max(histogram: &[u32; LABEL_BINS]) -> u8 {
    let mut best = 0usize;
    for (label, &count) in histogram.iter().enumerate().skip(1) {
        if count > histogram[best] {
            best = label;
        }
    }
    best as u8
}

/// Resolve per-voxel labels by majority vote.
///
/// Every cell that no point maps to keeps `ignore`. Within a cell, ties go
/// to the lowest label id.
///
/// # Arguments
///
/// * `grid_size` - Cells per axis of the output grid
/// * `ignore` - Label written to unoccupied cells
/// * `indices` - Grid index of each point
/// * `labels` - Training label of each point, parallel to `indices`
///
/// # Returns
///
/// A `VoxelGrid` holding the winning label of every occupied cell.
///
/// # Example
///
/// ```ignore
/// let grid = vote_voxel_labels([2, 2, 2], 0, &[[0, 0, 0], [0, 0, 0]], &[3, 3])?;
/// assert_eq!(grid.get([0, 0, 0]), Some(3));
/// assert_eq!(grid.get([1, 1, 1]), Some(0));
/// ```
///
/// # Errors
///
/// Fails if `indices` and `labels` differ in length or an index lies outside
/// `grid_size`.
pub fn vote_voxel_labels(
    grid_size: [usize; 3],
    ignore: u8,
    indices: &[GridIndex],
    labels: &[u8],
) -> Result<VoxelGrid> {
    if indices.len() != labels.len() {
        return Err(VotingError::LengthMismatch {
            indices: indices.len(),
            labels: labels.len(),
        });
    }

    let mut grid = VoxelGrid::filled(grid_size, ignore);
    if let Some(&index) = indices.iter().find(|&&idx| !grid.contains(idx)) {
        return Err(VotingError::IndexOutOfBounds { index, grid_size });
    }

    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_by_key(|&p| {
        let [i, j, k] = indices[p];
        (k, j, i)
    });

    let mut order = order.into_iter();
    let Some(first) = order.next() else {
        return Ok(grid);
    };

    let mut histogram = [0u32; LABEL_BINS];
    let mut current = indices[first];
    histogram[labels[first] as usize] = 1;

    for p in order {
        if indices[p] != current {
            grid.set(current, first_max(&histogram));
            current = indices[p];
            histogram = [0; LABEL_BINS];
        }
        histogram[labels[p] as usize] += 1;
    }
    grid.set(current, first_max(&histogram));

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IGNORE: u8 = 255;

    #[test]
    fn test_two_voxels_majority() -> Result<()> {
        // (0,0,0) twice with label 5, (0,0,1) once with label 7
        let indices = vec![[0, 0, 0], [0, 0, 0], [0, 0, 1]];
        let labels = vec![5, 5, 7];
        let grid = vote_voxel_labels([2, 2, 2], IGNORE, &indices, &labels)?;

        assert_eq!(grid.get([0, 0, 0]), Some(5));
        assert_eq!(grid.get([0, 0, 1]), Some(7));
        assert_eq!(grid.count_not(IGNORE), 2);
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    if [i, j, k] != [0, 0, 0] && [i, j, k] != [0, 0, 1] {
                        assert_eq!(grid.get([i, j, k]), Some(IGNORE));
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_tie_resolves_to_lowest_label() -> Result<()> {
        let grid = vote_voxel_labels([1, 1, 1], IGNORE, &[[0, 0, 0], [0, 0, 0]], &[4, 3])?;
        assert_eq!(grid.get([0, 0, 0]), Some(3));

        let grid = vote_voxel_labels(
            [1, 1, 1],
            IGNORE,
            &[[0, 0, 0]; 6],
            &[9, 2, 9, 200, 2, 200],
        )?;
        assert_eq!(grid.get([0, 0, 0]), Some(2));
        Ok(())
    }

    #[test]
    fn test_interleaved_points_are_grouped() -> Result<()> {
        let indices = vec![[1, 0, 0], [0, 1, 0], [1, 0, 0], [0, 1, 0], [1, 0, 0]];
        let labels = vec![1, 2, 1, 3, 4];
        let grid = vote_voxel_labels([2, 2, 1], IGNORE, &indices, &labels)?;
        assert_eq!(grid.get([1, 0, 0]), Some(1));
        assert_eq!(grid.get([0, 1, 0]), Some(2));
        assert_eq!(grid.get([0, 0, 0]), Some(IGNORE));
        Ok(())
    }

    #[test]
    fn test_majority_matches_brute_force() -> Result<()> {
        let grid_size = [3, 2, 4];
        let mut indices = Vec::new();
        let mut labels = Vec::new();
        for n in 0..500usize {
            indices.push([n % 3, (n / 3) % 2, (n * 7) % 4]);
            labels.push(((n * 31 + n / 5) % 6) as u8);
        }
        let grid = vote_voxel_labels(grid_size, IGNORE, &indices, &labels)?;

        for cell in indices.iter().copied() {
            let mut counts = [0u32; LABEL_BINS];
            for (idx, &label) in indices.iter().zip(&labels) {
                if *idx == cell {
                    counts[label as usize] += 1;
                }
            }
            let max = *counts.iter().max().unwrap();
            let expected = counts.iter().position(|&c| c == max).unwrap() as u8;
            assert_eq!(grid.get(cell), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn test_empty_input_keeps_ignore() -> Result<()> {
        let grid = vote_voxel_labels([2, 3, 4], IGNORE, &[], &[])?;
        assert_eq!(grid.as_slice().len(), 24);
        assert_eq!(grid.count_not(IGNORE), 0);
        Ok(())
    }

    #[test]
    fn test_length_mismatch() {
        let result = vote_voxel_labels([2, 2, 2], IGNORE, &[[0, 0, 0]], &[1, 2]);
        assert_eq!(
            result,
            Err(VotingError::LengthMismatch {
                indices: 1,
                labels: 2
            })
        );
    }

    #[test]
    fn test_index_out_of_bounds() {
        let result = vote_voxel_labels([2, 2, 2], IGNORE, &[[0, 2, 0]], &[1]);
        assert!(matches!(result, Err(VotingError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_grid_layout_row_major() {
        let mut grid = VoxelGrid::filled([2, 3, 4], 0);
        assert!(grid.set([1, 2, 3], 9));
        assert!(!grid.set([2, 0, 0], 9));
        assert_eq!(grid.as_slice()[23], 9);
        assert_eq!(grid.get([1, 2, 3]), Some(9));
        assert_eq!(grid.get([0, 3, 0]), None);
    }
}
