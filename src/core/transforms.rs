//! Coordinate transformations and random augmentation.
//!
//! This module provides the cartesian/polar conversions shared by the
//! projection stage, and the flip/rotate augmentation applied to scan
//! coordinates before projection.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AugmentationConfig;

/// Golden-ratio increment used to spread per-sample seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Convert cartesian (x, y, z) to polar (rho, theta, z).
///
/// `theta` lies in `[-pi, pi]` as returned by `atan2`.
pub fn cartesian_to_polar(coords: &[[f32; 3]]) -> Vec<[f32; 3]> {
    coords
        .iter()
        .map(|&[x, y, z]| [x.hypot(y), y.atan2(x), z])
        .collect()
}

/// Convert polar (rho, theta, z) back to cartesian (x, y, z).
pub fn polar_to_cartesian(coords: &[[f32; 3]]) -> Vec<[f32; 3]> {
    coords
        .iter()
        .map(|&[rho, theta, z]| {
            let (sin_t, cos_t) = theta.sin_cos();
            [rho * cos_t, rho * sin_t, z]
        })
        .collect()
}

/// Mirror x and/or y in place.
pub fn flip_coords(coords: &mut [[f32; 3]], flip_x: bool, flip_y: bool) {
    if !flip_x && !flip_y {
        return;
    }
    for p in coords.iter_mut() {
        if flip_x {
            p[0] = -p[0];
        }
        if flip_y {
            p[1] = -p[1];
        }
    }
}

/// Rotate coordinates in place about the z axis by `angle` radians.
pub fn rotate_coords(coords: &mut [[f32; 3]], angle: f32) {
    let (sin_a, cos_a) = angle.sin_cos();
    for p in coords.iter_mut() {
        let [x, y, _] = *p;
        p[0] = x * cos_a - y * sin_a;
        p[1] = x * sin_a + y * cos_a;
    }
}

/// Random draws made by one [`Augmentor::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AugmentRecord {
    pub flip_x: bool,
    pub flip_y: bool,
    /// Rotation angle in radians, if rotation is enabled.
    pub angle: Option<f32>,
}

/// Randomized flip/rotation of scan coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Augmentor {
    flip: bool,
    rotate: bool,
}

impl Augmentor {
    pub fn new(flip: bool, rotate: bool) -> Self {
        Self { flip, rotate }
    }

    pub fn from_config(config: &AugmentationConfig) -> Self {
        Self::new(config.flip, config.rotate)
    }

    /// Returns true if no augmentation is enabled.
    pub fn is_identity(&self) -> bool {
        !self.flip && !self.rotate
    }

    /// Apply the enabled augmentations in place.
    ///
    /// Each flip axis is drawn independently with probability 0.5; the
    /// rotation angle is uniform in `[0, 2pi)`. Only coordinates are
    /// touched, so reflectance stays aligned with its point.
    pub fn apply<R: Rng + ?Sized>(&self, coords: &mut [[f32; 3]], rng: &mut R) -> AugmentRecord {
        let mut record = AugmentRecord::default();

        if self.flip {
            record.flip_x = rng.gen_bool(0.5);
            record.flip_y = rng.gen_bool(0.5);
            flip_coords(coords, record.flip_x, record.flip_y);
        }

        if self.rotate {
            let angle = rng.gen_range(0.0..TAU);
            rotate_coords(coords, angle);
            record.angle = Some(angle);
        }

        record
    }
}

/// Random source for one sample.
///
/// With a base seed the stream depends only on `(seed, index)`, so results
/// are reproducible regardless of which worker handles the sample.
pub fn sample_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(SEED_STRIDE)),
        None => StdRng::from_entropy(),
    }
}
