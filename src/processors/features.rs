//! Per-point feature vectors.
//!
//! The layout is fixed by configuration, so each one has its own typed
//! storage instead of a ragged row type:
//!
//! | Layout          | Columns                                              | Width |
//! |-----------------|------------------------------------------------------|-------|
//! | Cartesian       | offset(3), coordinate(3), reflectance                | 7     |
//! | PolarExtended   | offset(3), coordinate(3), reflectance, cartesian x/y | 9     |
//! | PolarReduced    | cartesian x/y, reflectance                           | 3     |
//! | Spherical       | row, col, depth, coordinate(3), reflectance          | 7     |
//!
//! `offset` is the vector from the center of a point's voxel to the point,
//! in projected coordinates.

use thiserror::Error;

use crate::config::ProjectionType;

use super::grid::{GridIndex, VolumeBounds};
use super::projection::ProjectedCloud;

/// Errors that can occur while assembling features.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("feature layout {layout:?} cannot be built from a {projection} projection")]
    LayoutMismatch {
        layout: FeatureLayout,
        projection: ProjectionType,
    },

    #[error("feature layout {0:?} needs volume bounds")]
    MissingBounds(FeatureLayout),

    #[error("array length mismatch: {points} points, {other} {what}")]
    LengthMismatch {
        points: usize,
        other: usize,
        what: &'static str,
    },
}

/// Result type for feature operations.
pub type Result<T> = std::result::Result<T, FeatureError>;

/// Feature layout selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureLayout {
    Cartesian,
    PolarExtended,
    PolarReduced,
    Spherical,
}

impl FeatureLayout {
    /// Layout for a projection and the extended-feature flag.
    ///
    /// The flag only affects the polar projection.
    pub fn select(projection: ProjectionType, extended: bool) -> Self {
        match (projection, extended) {
            (ProjectionType::Cartesian, _) => FeatureLayout::Cartesian,
            (ProjectionType::Polar, true) => FeatureLayout::PolarExtended,
            (ProjectionType::Polar, false) => FeatureLayout::PolarReduced,
            (ProjectionType::Spherical, _) => FeatureLayout::Spherical,
        }
    }

    /// Values per point.
    pub fn width(&self) -> usize {
        self.column_names().len()
    }

    /// Column names in storage order.
    pub fn column_names(&self) -> &'static [&'static str] {
        match self {
            FeatureLayout::Cartesian => &[
                "offset_x", "offset_y", "offset_z", "x", "y", "z", "reflectance",
            ],
            FeatureLayout::PolarExtended => &[
                "offset_rho",
                "offset_theta",
                "offset_z",
                "rho",
                "theta",
                "z",
                "reflectance",
                "x",
                "y",
            ],
            FeatureLayout::PolarReduced => &["x", "y", "reflectance"],
            FeatureLayout::Spherical => &["row", "col", "depth", "x", "y", "z", "reflectance"],
        }
    }
}

/// Feature rows of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum PointFeatures {
    Cartesian(Vec<[f32; 7]>),
    PolarExtended(Vec<[f32; 9]>),
    PolarReduced(Vec<[f32; 3]>),
    Spherical(Vec<[f32; 7]>),
}

impl PointFeatures {
    pub fn layout(&self) -> FeatureLayout {
        match self {
            PointFeatures::Cartesian(_) => FeatureLayout::Cartesian,
            PointFeatures::PolarExtended(_) => FeatureLayout::PolarExtended,
            PointFeatures::PolarReduced(_) => FeatureLayout::PolarReduced,
            PointFeatures::Spherical(_) => FeatureLayout::Spherical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PointFeatures::Cartesian(rows) | PointFeatures::Spherical(rows) => rows.len(),
            PointFeatures::PolarExtended(rows) => rows.len(),
            PointFeatures::PolarReduced(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values per point.
    pub fn width(&self) -> usize {
        self.layout().width()
    }

    /// Feature row of point `i`.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        match self {
            PointFeatures::Cartesian(rows) | PointFeatures::Spherical(rows) => {
                rows.get(i).map(|r| r.as_slice())
            }
            PointFeatures::PolarExtended(rows) => rows.get(i).map(|r| r.as_slice()),
            PointFeatures::PolarReduced(rows) => rows.get(i).map(|r| r.as_slice()),
        }
    }

    /// Row-major `[N, width]` buffer.
    pub fn to_flat(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.len() * self.width());
        for i in 0..self.len() {
            if let Some(row) = self.row(i) {
                flat.extend_from_slice(row);
            }
        }
        flat
    }
}

fn projection_of(projected: &ProjectedCloud) -> ProjectionType {
    match projected {
        ProjectedCloud::Cartesian { .. } => ProjectionType::Cartesian,
        ProjectedCloud::Polar { .. } => ProjectionType::Polar,
        ProjectedCloud::Spherical { .. } => ProjectionType::Spherical,
    }
}

/// Offset of `p` from the center of its voxel.
#[inline]
fn offset(bounds: &VolumeBounds, index: GridIndex, p: [f32; 3]) -> [f32; 3] {
    let center = bounds.voxel_center(index);
    [p[0] - center[0], p[1] - center[1], p[2] - center[2]]
}

/// Assembles feature rows in a fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBuilder {
    layout: FeatureLayout,
}

impl FeatureBuilder {
    pub fn new(layout: FeatureLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    /// Build one feature row per point.
    ///
    /// `bounds` is required by the offset-based layouts (cartesian and
    /// extended polar); the others ignore it.
    ///
    /// # Arguments
    ///
    /// * `projected` - Projected coordinates of every point
    /// * `reflectance` - Per-point reflectance
    /// * `indices` - Grid index of every point
    /// * `bounds` - Volume bounds used for gridding, if any
    ///
    /// # Returns
    ///
    /// `PointFeatures` with `layout().width()` columns per point.
    pub fn build(
        &self,
        projected: &ProjectedCloud,
        reflectance: &[f32],
        indices: &[GridIndex],
        bounds: Option<&VolumeBounds>,
    ) -> Result<PointFeatures> {
        let n = projected.len();
        if reflectance.len() != n {
            return Err(FeatureError::LengthMismatch {
                points: n,
                other: reflectance.len(),
                what: "reflectance values",
            });
        }
        if indices.len() != n {
            return Err(FeatureError::LengthMismatch {
                points: n,
                other: indices.len(),
                what: "grid indices",
            });
        }

        let mismatch = || FeatureError::LayoutMismatch {
            layout: self.layout,
            projection: projection_of(projected),
        };
        let bounds_for = |layout| bounds.ok_or(FeatureError::MissingBounds(layout));

        let features = match (self.layout, projected) {
            (FeatureLayout::Cartesian, ProjectedCloud::Cartesian { coords }) => {
                let bounds = bounds_for(self.layout)?;
                PointFeatures::Cartesian(
                    coords
                        .iter()
                        .zip(indices)
                        .zip(reflectance)
                        .map(|((&p, &idx), &r)| {
                            let o = offset(bounds, idx, p);
                            [o[0], o[1], o[2], p[0], p[1], p[2], r]
                        })
                        .collect(),
                )
            }
            (FeatureLayout::PolarExtended, ProjectedCloud::Polar { coords, cartesian_xy }) => {
                let bounds = bounds_for(self.layout)?;
                PointFeatures::PolarExtended(
                    coords
                        .iter()
                        .zip(indices)
                        .zip(reflectance)
                        .zip(cartesian_xy)
                        .map(|(((&p, &idx), &r), &[x, y])| {
                            let o = offset(bounds, idx, p);
                            [o[0], o[1], o[2], p[0], p[1], p[2], r, x, y]
                        })
                        .collect(),
                )
            }
            (FeatureLayout::PolarReduced, ProjectedCloud::Polar { cartesian_xy, .. }) => {
                PointFeatures::PolarReduced(
                    cartesian_xy
                        .iter()
                        .zip(reflectance)
                        .map(|(&[x, y], &r)| [x, y, r])
                        .collect(),
                )
            }
            (FeatureLayout::Spherical, ProjectedCloud::Spherical { coords, image }) => {
                PointFeatures::Spherical(
                    coords
                        .iter()
                        .enumerate()
                        .map(|(i, &p)| {
                            [
                                image.rows[i],
                                image.cols[i],
                                image.depth[i],
                                p[0],
                                p[1],
                                p[2],
                                reflectance[i],
                            ]
                        })
                        .collect(),
                )
            }
            _ => return Err(mismatch()),
        };

        Ok(features)
    }
}

impl From<FeatureLayout> for FeatureBuilder {
    fn from(layout: FeatureLayout) -> Self {
        Self::new(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::projection::{Projection, SphericalParams};

    fn unit_bounds() -> VolumeBounds {
        VolumeBounds::new([0.0; 3], [4.0; 3], [5, 5, 5]).unwrap()
    }

    #[test]
    fn test_layout_selection_and_width() {
        assert_eq!(
            FeatureLayout::select(ProjectionType::Cartesian, false).width(),
            7
        );
        assert_eq!(FeatureLayout::select(ProjectionType::Polar, true).width(), 9);
        assert_eq!(FeatureLayout::select(ProjectionType::Polar, false).width(), 3);
        assert_eq!(
            FeatureLayout::select(ProjectionType::Spherical, true).width(),
            7
        );
    }

    #[test]
    fn test_cartesian_offsets() -> Result<()> {
        let projected = Projection::Cartesian.project(vec![[1.25, 0.0, 3.9]]);
        let bounds = unit_bounds();
        let indices = vec![bounds.index_of([1.25, 0.0, 3.9])];
        let features = FeatureBuilder::new(FeatureLayout::Cartesian).build(
            &projected,
            &[0.3],
            &indices,
            Some(&bounds),
        )?;

        // voxel size 1: indices (1, 0, 3), centers (1.5, 0.5, 3.5)
        let row = features.row(0).unwrap();
        let expected = [-0.25, -0.5, 0.4, 1.25, 0.0, 3.9, 0.3];
        for (a, b) in row.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5, "{:?}", row);
        }
        Ok(())
    }

    #[test]
    fn test_polar_extended_appends_cartesian_xy() -> Result<()> {
        let projected = Projection::Polar.project(vec![[3.0, 4.0, 1.0]]);
        let bounds = VolumeBounds::new([0.0, -3.2, -2.0], [10.0, 3.2, 2.0], [11, 33, 5]).unwrap();
        let indices: Vec<_> = projected.coords().iter().map(|&p| bounds.index_of(p)).collect();

        let features = FeatureBuilder::new(FeatureLayout::PolarExtended).build(
            &projected,
            &[0.7],
            &indices,
            Some(&bounds),
        )?;
        assert_eq!(features.width(), 9);
        let row = features.row(0).unwrap();
        assert!((row[3] - 5.0).abs() < 1e-6);
        assert_eq!(row[6], 0.7);
        assert_eq!(&row[7..], &[3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_polar_reduced_needs_no_bounds() -> Result<()> {
        let projected = Projection::Polar.project(vec![[3.0, 4.0, 1.0], [-1.0, 2.0, 0.0]]);
        let features = FeatureBuilder::new(FeatureLayout::PolarReduced).build(
            &projected,
            &[0.1, 0.2],
            &[[0, 0, 0], [0, 0, 0]],
            None,
        )?;
        assert_eq!(features.to_flat(), vec![3.0, 4.0, 0.1, -1.0, 2.0, 0.2]);
        Ok(())
    }

    #[test]
    fn test_spherical_rows() -> Result<()> {
        let params = SphericalParams::new(3.0, -25.0, [32, 64, 2]);
        let projected = Projection::Spherical(params).project(vec![[10.0, 0.0, 0.0]]);
        let indices = match &projected {
            ProjectedCloud::Spherical { image, .. } => image.indices.clone(),
            _ => unreachable!(),
        };
        let features =
            FeatureBuilder::new(FeatureLayout::Spherical).build(&projected, &[0.5], &indices, None)?;
        let row = features.row(0).unwrap();
        assert_eq!(row[1], 32.0);
        assert_eq!(row[2], 10.0);
        assert_eq!(&row[3..], &[10.0, 0.0, 0.0, 0.5]);
        Ok(())
    }

    #[test]
    fn test_layout_projection_mismatch() {
        let projected = Projection::Cartesian.project(vec![[0.0; 3]]);
        let result = FeatureBuilder::new(FeatureLayout::PolarReduced).build(
            &projected,
            &[0.0],
            &[[0, 0, 0]],
            None,
        );
        assert_eq!(
            result,
            Err(FeatureError::LayoutMismatch {
                layout: FeatureLayout::PolarReduced,
                projection: ProjectionType::Cartesian
            })
        );
    }

    #[test]
    fn test_missing_bounds() {
        let projected = Projection::Cartesian.project(vec![[0.0; 3]]);
        let result =
            FeatureBuilder::new(FeatureLayout::Cartesian).build(&projected, &[0.0], &[[0, 0, 0]], None);
        assert_eq!(result, Err(FeatureError::MissingBounds(FeatureLayout::Cartesian)));
    }

    #[test]
    fn test_length_mismatch() {
        let projected = Projection::Cartesian.project(vec![[0.0; 3]; 2]);
        let result = FeatureBuilder::new(FeatureLayout::Cartesian).build(
            &projected,
            &[0.0],
            &[[0, 0, 0]; 2],
            Some(&unit_bounds()),
        );
        assert!(matches!(result, Err(FeatureError::LengthMismatch { points: 2, other: 1, .. })));
    }
}
