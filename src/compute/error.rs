//! Error types for the deconvolution engine.

use super::Shape;

/// Errors raised while configuring an operator or running the solver.
#[derive(Debug, thiserror::Error)]
pub enum DeconvError {
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },
    #[error("Volume of shape {shape} needs {expected} samples, got {actual}")]
    LengthMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },
    #[error("Volume shape {0} has a zero-sized axis")]
    EmptyAxis(Shape),
    #[error("PSF must be finite and non-negative with a positive sum (sum = {sum})")]
    InvalidPsf { sum: f64 },
    #[error("Data must be finite and non-negative (voxel {index} = {value})")]
    InvalidData { index: usize, value: f32 },
    #[error("Operator has not been configured, call compute() first")]
    NotConfigured,
    #[error("Iteration count must be positive")]
    ZeroIterations,
    #[error(
        "Forward projection is degenerate at iteration {iteration}, voxel {position:?} (value {value})"
    )]
    DegenerateForward {
        iteration: usize,
        index: usize,
        position: (usize, usize, usize),
        value: f32,
    },
    #[error("FFT failed: {0}")]
    Transform(#[from] realfft::FftError),
}
