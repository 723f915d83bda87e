//! Configuration types for deconvolution runs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level deconvolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeconvConfig {
    /// Number of Richardson-Lucy iterations.
    pub iterations: usize,
    /// Regularisation weight. Recorded with the run; the unconstrained
    /// update does not use it.
    #[serde(default)]
    pub lambda: f32,
    /// How forward/adjoint convolutions are evaluated.
    #[serde(default)]
    pub operator: OperatorKind,
    /// Boundary handling for the direct operator.
    #[serde(default)]
    pub boundary: Boundary,
    /// Initial object estimate.
    #[serde(default)]
    pub start_guess: StartGuess,
    /// Publish a copy of the estimate to the monitor after every iteration.
    #[serde(default)]
    pub snapshot_estimate: bool,
}

impl Default for DeconvConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            lambda: 1e-2,
            operator: OperatorKind::default(),
            boundary: Boundary::default(),
            start_guess: StartGuess::default(),
            snapshot_estimate: false,
        }
    }
}

/// Forward/adjoint evaluation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Spatial convolution with the unpadded kernel. Best for small PSFs.
    Direct,
    /// Frequency-domain multiplication, fresh FFT plans on every call.
    Fourier,
    /// Frequency-domain multiplication with cached plans and buffers.
    #[default]
    CachedFourier,
}

/// Out-of-volume sample handling for spatial convolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// Mirror about the edge, repeating the edge sample (`d c b a | a b c d`).
    #[default]
    Reflect,
    /// Wrap around, matching the circular convolution of the FFT operators.
    Periodic,
}

/// Initial estimate for the multiplicative update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartGuess {
    /// Flat field at the mean of the data.
    #[default]
    Mean,
    /// The measured data itself.
    Data,
}

impl DeconvConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(ConfigError::InvalidLambda(self.lambda));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Iteration count must be positive")]
    ZeroIterations,
    #[error("Regularisation weight must be finite and non-negative, got {0}")]
    InvalidLambda(f32),
    #[error("Volume dimensions (height, width, depth) must be non-zero")]
    InvalidDimensions,
    #[error("PSF dimensions must be non-zero")]
    InvalidPsfSize,
    #[error("PSF sigma must be positive on every axis")]
    InvalidSigma,
    #[error("Background must be finite and non-negative, got {0}")]
    InvalidBackground(f32),
    #[error("Bead {bead} lies outside the volume")]
    BeadOutOfBounds { bead: usize },
    #[error("Bead {bead} has a negative or non-finite amplitude")]
    InvalidBeadAmplitude { bead: usize },
    #[error("Photon count must be positive, got {0}")]
    InvalidPhotons(f32),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
