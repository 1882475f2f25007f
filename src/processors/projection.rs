//! Projection of cartesian scan coordinates into gridding space.
//!
//! Three projections are supported:
//! - Cartesian: identity
//! - Polar: (rho, theta, z)
//! - Spherical: range-image (row, col) plus a quantized depth bin
//!
//! The spherical projection produces its grid index directly, so it carries
//! the per-point image coordinates alongside the untouched cartesian input.

use std::f32::consts::PI;

use crate::config::{PipelineConfig, ProjectionType};
use crate::core::transforms::cartesian_to_polar;

use super::grid::GridIndex;

/// Field of view and image size of the spherical projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalParams {
    /// Upper vertical FOV bound in radians.
    pub fov_up: f32,
    /// Lower vertical FOV bound in radians (typically negative).
    pub fov_down: f32,
    /// Image rows (H).
    pub height: usize,
    /// Image columns (W).
    pub width: usize,
    /// Depth bins (D).
    pub depth_bins: usize,
}

impl SphericalParams {
    /// Build from FOV bounds in degrees and an `(H, W, D)` grid size.
    pub fn new(fov_up_deg: f32, fov_down_deg: f32, grid_size: [usize; 3]) -> Self {
        Self {
            fov_up: fov_up_deg.to_radians(),
            fov_down: fov_down_deg.to_radians(),
            height: grid_size[0],
            width: grid_size[1],
            depth_bins: grid_size[2],
        }
    }

    /// Total vertical field of view in radians.
    #[inline]
    pub fn fov(&self) -> f32 {
        self.fov_down.abs() + self.fov_up.abs()
    }
}

/// Range-image coordinates of every point.
#[derive(Debug, Clone, Default)]
pub struct SphericalImage {
    /// Continuous image row of each point (before flooring).
    pub rows: Vec<f32>,
    /// Continuous image column of each point (before flooring).
    pub cols: Vec<f32>,
    /// Euclidean distance of each point from the sensor.
    pub depth: Vec<f32>,
    /// (row, col, depth bin) of each point, clamped to the image.
    pub indices: Vec<GridIndex>,
}

/// Scan coordinates after projection.
#[derive(Debug, Clone)]
pub enum ProjectedCloud {
    Cartesian {
        coords: Vec<[f32; 3]>,
    },
    Polar {
        /// (rho, theta, z)
        coords: Vec<[f32; 3]>,
        /// Cartesian (x, y) captured before projection
        cartesian_xy: Vec<[f32; 2]>,
    },
    Spherical {
        /// Cartesian input coordinates
        coords: Vec<[f32; 3]>,
        image: SphericalImage,
    },
}

impl ProjectedCloud {
    /// Coordinates used for gridding and as point features.
    pub fn coords(&self) -> &[[f32; 3]] {
        match self {
            ProjectedCloud::Cartesian { coords }
            | ProjectedCloud::Polar { coords, .. }
            | ProjectedCloud::Spherical { coords, .. } => coords,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coords().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords().is_empty()
    }
}

/// Active projection, chosen once from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Cartesian,
    Polar,
    Spherical(SphericalParams),
}

impl Projection {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.voxel.projection_type {
            ProjectionType::Cartesian => Projection::Cartesian,
            ProjectionType::Polar => Projection::Polar,
            ProjectionType::Spherical => Projection::Spherical(SphericalParams::new(
                config.spherical.fov_up,
                config.spherical.fov_down,
                config.voxel.grid_size,
            )),
        }
    }

    pub fn kind(&self) -> ProjectionType {
        match self {
            Projection::Cartesian => ProjectionType::Cartesian,
            Projection::Polar => ProjectionType::Polar,
            Projection::Spherical(_) => ProjectionType::Spherical,
        }
    }

    /// Project cartesian coordinates. Point order and count are preserved.
    ///
    /// # Arguments
    ///
    /// * `coords` - Augmented (x, y, z) coordinates, consumed
    ///
    /// # Returns
    ///
    /// The projected cloud; polar keeps the pre-projection (x, y) for the
    /// extended feature layouts.
    pub fn project(&self, coords: Vec<[f32; 3]>) -> ProjectedCloud {
        match self {
            Projection::Cartesian => ProjectedCloud::Cartesian { coords },
            Projection::Polar => {
                let cartesian_xy = coords.iter().map(|&[x, y, _]| [x, y]).collect();
                ProjectedCloud::Polar {
                    coords: cartesian_to_polar(&coords),
                    cartesian_xy,
                }
            }
            Projection::Spherical(params) => {
                let image = spherical_image(&coords, params);
                ProjectedCloud::Spherical { coords, image }
            }
        }
    }
}

/// Floor `value` and clamp it into `[0, len - 1]`.
#[inline]
fn clamp_index(value: f32, len: usize) -> usize {
    (value.floor().max(0.0) as usize).min(len.saturating_sub(1))
}

/// Depth thresholds splitting `[min, max]` into `bins` equal-width bins.
fn depth_thresholds(depth: &[f32], bins: usize) -> Vec<f32> {
    let (min, max) = depth
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    if bins < 2 || !(max > min) {
        return Vec::new();
    }
    let step = (max - min) / bins as f32;
    (1..bins).map(|i| min + step * i as f32).collect()
}

/// Compute range-image coordinates for every point.
///
/// Depth bins are equal-width over the sample's own depth range, so the
/// nearest point always lands in bin 0 and, when depths differ, the
/// farthest in the last bin.
///
/// # Arguments
///
/// * `coords` - Cartesian (x, y, z) coordinates
/// * `params` - Vertical field of view and image dimensions (H, W, D)
///
/// # Returns
///
/// A `SphericalImage` with continuous row/col, depth and the clamped
/// (row, col, depth bin) index of each point, in input order.
///
/// # Example
///
/// ```ignore
/// let params = SphericalParams::new(3.0, -25.0, [64, 2048, 16]);
/// let image = spherical_image(&[[10.0, 0.0, 0.0], [0.0, 5.0, -1.0]], &params);
/// assert_eq!(image.indices.len(), 2);
/// ```
pub fn spherical_image(coords: &[[f32; 3]], params: &SphericalParams) -> SphericalImage {
    let n = coords.len();
    let fov = params.fov();
    let fov_down = params.fov_down.abs();
    let height = params.height as f32;
    let width = params.width as f32;

    let mut image = SphericalImage {
        rows: Vec::with_capacity(n),
        cols: Vec::with_capacity(n),
        depth: Vec::with_capacity(n),
        indices: Vec::with_capacity(n),
    };

    for &[x, y, z] in coords {
        let depth = (x * x + y * y + z * z).sqrt();
        let yaw = -y.atan2(x);
        // Points at the sensor origin sit on the horizon
        let pitch = if depth > 0.0 {
            (z / depth).clamp(-1.0, 1.0).asin()
        } else {
            0.0
        };

        image.cols.push(0.5 * (yaw / PI + 1.0) * width);
        image.rows.push((1.0 - (pitch + fov_down) / fov) * height);
        image.depth.push(depth);
    }

    let thresholds = depth_thresholds(&image.depth, params.depth_bins);
    image.indices = image
        .rows
        .iter()
        .zip(&image.cols)
        .zip(&image.depth)
        .map(|((&row, &col), &d)| {
            [
                clamp_index(row, params.height),
                clamp_index(col, params.width),
                thresholds.partition_point(|&t| t < d),
            ]
        })
        .collect();

    image
}
