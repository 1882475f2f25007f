//! Visualization of labeled scans and voxel grids.
//!
//! Renders PNG images with the plotters bitmap backend. Nothing here draws
//! text, so no font backend is needed.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::remap::{LabelSchema, RemapTable};
use crate::processors::voting::VoxelGrid;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to draw: every point or voxel is ignored")]
    NothingToDraw,

    #[error("{coords} points but {labels} labels")]
    LengthMismatch { coords: usize, labels: usize },
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1920;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 1080;

/// Fallback colors for classes without a schema color.
const CLASS_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (255, 255, 51),  // Yellow
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Color of points and voxels carrying the ignore label.
const IGNORE_COLOR: RGBColor = RGBColor(200, 200, 200);

/// Color per training id.
#[derive(Debug, Clone, Default)]
pub struct LabelPalette {
    colors: Vec<Option<[u8; 3]>>,
}

impl LabelPalette {
    /// Colors taken from the schema's color map (converted to RGB).
    pub fn from_schema(schema: &LabelSchema, table: &RemapTable) -> Self {
        let colors = (0..table.num_classes())
            .map(|t| schema.class_color(table, t as u8))
            .collect();
        Self { colors }
    }

    pub fn color(&self, label: u8) -> RGBColor {
        match self.colors.get(label as usize).copied().flatten() {
            Some([r, g, b]) => RGBColor(r, g, b),
            None => {
                let (r, g, b) = CLASS_COLORS[label as usize % CLASS_COLORS.len()];
                RGBColor(r, g, b)
            }
        }
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Label of the highest non-ignored voxel in every `(i, j)` column.
pub fn top_down_labels(grid: &VoxelGrid, ignore: u8) -> Vec<Vec<Option<u8>>> {
    let [gi, gj, gk] = grid.grid_size();
    (0..gi)
        .map(|i| {
            (0..gj)
                .map(|j| {
                    (0..gk)
                        .rev()
                        .filter_map(|k| grid.get([i, j, k]))
                        .find(|&label| label != ignore)
                })
                .collect()
        })
        .collect()
}

/// Render a bird's-eye view of a voxel grid.
///
/// Rows of the image follow the first grid axis and columns the second;
/// each cell is `cell_px` pixels square.
pub fn plot_voxel_bev(
    output_path: &Path,
    grid: &VoxelGrid,
    ignore: u8,
    palette: &LabelPalette,
    cell_px: u32,
) -> Result<()> {
    if grid.count_not(ignore) == 0 {
        return Err(VisualizationError::NothingToDraw);
    }

    let cell_px = cell_px.max(1);
    let [gi, gj, _] = grid.grid_size();
    let size = (gj as u32 * cell_px, gi as u32 * cell_px);
    let columns = top_down_labels(grid, ignore);

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let px = cell_px as i32;
    for (i, row) in columns.iter().enumerate() {
        for (j, label) in row.iter().enumerate() {
            let Some(label) = *label else {
                continue;
            };
            let (x0, y0) = (j as i32 * px, i as i32 * px);
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + px, y0 + px)],
                palette.color(label).filled(),
            ))
            .map_err(plot_err)?;
        }
    }

    root.present().map_err(plot_err)?;
    log::info!("saved voxel view to {}", output_path.display());
    Ok(())
}

/// Plot a 2D scatter (x vs y) of a scan colored by training label.
pub fn plot_labeled_scan(
    output_path: &Path,
    coords: &[[f32; 3]],
    labels: &[u8],
    ignore: u8,
    palette: &LabelPalette,
    max_points: usize,
) -> Result<()> {
    if coords.len() != labels.len() {
        return Err(VisualizationError::LengthMismatch {
            coords: coords.len(),
            labels: labels.len(),
        });
    }
    if coords.is_empty() {
        return Err(VisualizationError::NothingToDraw);
    }

    let n = coords.len();
    let step = (n / max_points.max(1)).max(1);

    let points: Vec<(f32, f32, RGBColor)> = (0..n)
        .step_by(step)
        .map(|i| {
            let color = if labels[i] == ignore {
                IGNORE_COLOR
            } else {
                palette.color(labels[i])
            };
            (coords[i][0], coords[i][1], color)
        })
        .collect();

    let (x_min, x_max, y_min, y_max) = compute_bounds(&points);
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT))
        .into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(plot_err)?;

    // Ignored points first so labeled points stay on top
    let (ignored, labeled): (Vec<_>, Vec<_>) = points
        .into_iter()
        .partition(|&(_, _, color)| color == IGNORE_COLOR);
    chart
        .draw_series(
            ignored
                .into_iter()
                .chain(labeled)
                .map(|(x, y, color)| Circle::new((x, y), 2, color.filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    log::info!("saved scan view to {}", output_path.display());
    Ok(())
}

/// Compute the bounds (min/max) for x and y coordinates.
fn compute_bounds(points: &[(f32, f32, RGBColor)]) -> (f32, f32, f32, f32) {
    let mut x_min = f32::MAX;
    let mut x_max = f32::MIN;
    let mut y_min = f32::MAX;
    let mut y_max = f32::MIN;

    for &(x, y, _) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if (x_max - x_min).abs() < f32::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    if (y_max - y_min).abs() < f32::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_top_down_labels_pick_highest_voxel() {
        let mut grid = VoxelGrid::filled([2, 2, 3], 0);
        grid.set([0, 0, 0], 4);
        grid.set([0, 0, 2], 7);
        grid.set([1, 1, 1], 5);

        let columns = top_down_labels(&grid, 0);
        assert_eq!(columns[0][0], Some(7));
        assert_eq!(columns[0][1], None);
        assert_eq!(columns[1][1], Some(5));
    }

    #[test]
    fn test_palette_fallback() {
        let palette = LabelPalette::default();
        assert_eq!(palette.color(0), RGBColor(228, 26, 28));
        assert_eq!(
            palette.color(CLASS_COLORS.len() as u8),
            palette.color(0)
        );
    }

    #[test]
    fn test_palette_from_schema() {
        let schema = LabelSchema::from_yaml_str(
            "learning_map: {0: 0, 10: 1}\ncolor_map: {10: [245, 150, 100]}\n",
        )
        .unwrap();
        let table = RemapTable::from_schema(&schema, Some(0)).unwrap();
        let palette = LabelPalette::from_schema(&schema, &table);
        assert_eq!(palette.color(1), RGBColor(100, 150, 245));
    }

    #[test]
    fn test_plot_voxel_bev_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bev.png");
        let mut grid = VoxelGrid::filled([4, 6, 2], 0);
        grid.set([1, 2, 1], 3);

        plot_voxel_bev(&path, &grid, 0, &LabelPalette::default(), 4).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_voxel_bev_empty_grid() {
        let dir = tempdir().unwrap();
        let grid = VoxelGrid::filled([2, 2, 2], 0);
        let result = plot_voxel_bev(&dir.path().join("x.png"), &grid, 0, &LabelPalette::default(), 4);
        assert!(matches!(result, Err(VisualizationError::NothingToDraw)));
    }

    #[test]
    fn test_plot_labeled_scan_length_mismatch() {
        let dir = tempdir().unwrap();
        let result = plot_labeled_scan(
            &dir.path().join("x.png"),
            &[[0.0; 3]],
            &[1, 2],
            0,
            &LabelPalette::default(),
            100,
        );
        assert!(matches!(result, Err(VisualizationError::LengthMismatch { .. })));
    }

    #[test]
    fn test_plot_labeled_scan_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.png");
        let coords = [
            [0.0, 0.0, 0.0],
            [1.0, 2.0, 0.5],
            [-3.0, 4.0, 1.0],
            [2.5, -1.0, 0.0],
        ];

        plot_labeled_scan(&path, &coords, &[0, 1, 2, 0], 0, &LabelPalette::default(), 100)
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_labeled_scan_flat_extent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.png");
        // Every point shares y, so the y range is padded out
        let coords = [[0.0, 1.0, 0.0], [5.0, 1.0, 0.0], [9.0, 1.0, 0.0]];

        plot_labeled_scan(&path, &coords, &[3, 3, 0], 0, &LabelPalette::default(), 2)
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_compute_bounds_pads_degenerate_axis() {
        let points = [(2.0, 1.0, IGNORE_COLOR), (2.0, 3.0, IGNORE_COLOR)];
        assert_eq!(compute_bounds(&points), (1.0, 3.0, 1.0, 3.0));
    }
}
