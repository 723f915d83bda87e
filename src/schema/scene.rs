//! Synthetic scenes for exercising the deconvolution engine.
//!
//! A scene is a flat background with a handful of beads, imaged through a
//! model PSF and optionally corrupted by Poisson shot noise.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::compute::{Shape, Volume};

use super::ConfigError;

/// Complete synthetic scene specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Volume height (outermost axis).
    pub height: usize,
    /// Volume width.
    pub width: usize,
    /// Volume depth (contiguous axis).
    pub depth: usize,
    /// Flat background level of the object.
    pub background: f32,
    /// Point-like objects added on top of the background.
    pub beads: Vec<Bead>,
    /// PSF used to blur the object.
    pub psf: PsfModel,
    /// Optional shot noise applied after blurring.
    #[serde(default)]
    pub noise: Option<NoiseConfig>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            height: 32,
            width: 32,
            depth: 16,
            background: 1.0,
            beads: vec![
                Bead {
                    position: (10, 12, 8),
                    amplitude: 50.0,
                    radius: 0.0,
                },
                Bead {
                    position: (20, 18, 6),
                    amplitude: 30.0,
                    radius: 1.0,
                },
            ],
            psf: PsfModel::Gaussian {
                size: (9, 9, 9),
                sigma: (1.2, 1.2, 2.0),
            },
            noise: Some(NoiseConfig {
                photons: 100.0,
                seed: 42,
            }),
        }
    }
}

/// A single bead in the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    /// Voxel position `(h, w, d)`.
    pub position: (usize, usize, usize),
    /// Peak amplitude above background.
    pub amplitude: f32,
    /// Gaussian radius in voxels; 0 places all mass on one voxel.
    #[serde(default)]
    pub radius: f32,
}

/// Model point-spread functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PsfModel {
    /// Anisotropic Gaussian.
    Gaussian {
        /// Kernel size `(h, w, d)`.
        size: (usize, usize, usize),
        /// Standard deviation per axis, in voxels.
        sigma: (f32, f32, f32),
    },
    /// Uniform averaging box.
    Box { size: (usize, usize, usize) },
    /// Separable binomial weights, a centre-weighted average.
    Binomial { size: (usize, usize, usize) },
}

impl PsfModel {
    /// Kernel shape described by this model.
    pub fn shape(&self) -> Shape {
        let (h, w, d) = match self {
            PsfModel::Gaussian { size, .. } => *size,
            PsfModel::Box { size } => *size,
            PsfModel::Binomial { size } => *size,
        };
        Shape::new(h, w, d)
    }
}

/// Poisson shot noise parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Expected photon count per unit intensity.
    pub photons: f32,
    /// Random seed.
    pub seed: u64,
}

impl SceneConfig {
    /// Shape of the generated volumes.
    pub fn shape(&self) -> Shape {
        Shape::new(self.height, self.width, self.depth)
    }

    /// Validate scene parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shape().is_empty() {
            return Err(ConfigError::InvalidDimensions);
        }
        if !self.background.is_finite() || self.background < 0.0 {
            return Err(ConfigError::InvalidBackground(self.background));
        }
        if self.psf.shape().is_empty() {
            return Err(ConfigError::InvalidPsfSize);
        }
        if let PsfModel::Gaussian { sigma, .. } = &self.psf {
            let (sh, sw, sd) = *sigma;
            if [sh, sw, sd].iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(ConfigError::InvalidSigma);
            }
        }
        for (i, bead) in self.beads.iter().enumerate() {
            let (h, w, d) = bead.position;
            if h >= self.height || w >= self.width || d >= self.depth {
                return Err(ConfigError::BeadOutOfBounds { bead: i });
            }
            if !bead.amplitude.is_finite() || bead.amplitude < 0.0 {
                return Err(ConfigError::InvalidBeadAmplitude { bead: i });
            }
        }
        if let Some(noise) = &self.noise
            && (!noise.photons.is_finite() || noise.photons <= 0.0)
        {
            return Err(ConfigError::InvalidPhotons(noise.photons));
        }
        Ok(())
    }

    /// Generate the ground-truth object.
    pub fn object(&self) -> Volume {
        let mut volume = Volume::filled(self.shape(), self.background);
        for bead in &self.beads {
            apply_bead(&mut volume, bead);
        }
        volume
    }
}

fn apply_bead(volume: &mut Volume, bead: &Bead) {
    let (bh, bw, bd) = bead.position;

    if bead.radius <= 0.0 {
        let current = volume.get(bh, bw, bd);
        volume.set(bh, bw, bd, current + bead.amplitude);
        return;
    }

    let shape = volume.shape();
    let two_sigma_sq = 2.0 * bead.radius * bead.radius;
    let data = volume.as_mut_slice();

    for h in 0..shape.height {
        for w in 0..shape.width {
            for d in 0..shape.depth {
                let dh = h as f32 - bh as f32;
                let dw = w as f32 - bw as f32;
                let dd = d as f32 - bd as f32;
                let dist_sq = dh * dh + dw * dw + dd * dd;
                data[shape.index(h, w, d)] += bead.amplitude * (-dist_sq / two_sigma_sq).exp();
            }
        }
    }
}

/// Replace every sample with a Poisson draw at `photons` counts per unit
/// intensity, rescaled back to intensity units.
pub fn apply_shot_noise(volume: &mut Volume, noise: &NoiseConfig) {
    let mut rng = StdRng::seed_from_u64(noise.seed);
    let photons = noise.photons as f64;

    for v in volume.as_mut_slice() {
        let expected = (*v as f64).max(0.0) * photons;
        let counts = match Poisson::new(expected) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => 0.0,
        };
        *v = (counts / photons) as f32;
    }
}
