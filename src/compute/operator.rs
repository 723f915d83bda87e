//! Forward/adjoint convolution operators used by the solver.

use crate::schema::{Boundary, OperatorKind};

use super::{CachedFourierOperator, DeconvError, DirectOperator, FourierOperator, Shape, Volume};

/// A blurring operator and its adjoint, bound to one PSF and data shape.
///
/// `compute` must succeed before `forward` or `adjoint` are called. Both
/// take flat slices of exactly `shape().len()` samples in C order.
pub trait ConvolutionOperator: Send {
    /// Prepare the operator for `psf` applied to volumes of `shape`.
    fn compute(&mut self, psf: &Volume, shape: Shape) -> Result<(), DeconvError>;

    /// Shape bound by the last successful `compute`.
    fn shape(&self) -> Option<Shape>;

    /// Blur `input` with the PSF.
    fn forward(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError>;

    /// Apply the transpose of [`forward`](Self::forward).
    fn adjoint(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Build an unconfigured operator of the given kind.
pub fn build_operator(kind: OperatorKind, boundary: Boundary) -> Box<dyn ConvolutionOperator> {
    match kind {
        OperatorKind::Direct => Box::new(DirectOperator::new(boundary)),
        OperatorKind::Fourier => Box::new(FourierOperator::new()),
        OperatorKind::CachedFourier => Box::new(CachedFourierOperator::new()),
    }
}

/// Fail unless an operator bound to `bound` can process `len` samples.
pub(crate) fn check_io(
    bound: Option<Shape>,
    input: &[f32],
    output: &[f32],
) -> Result<Shape, DeconvError> {
    let shape = bound.ok_or(DeconvError::NotConfigured)?;
    for len in [input.len(), output.len()] {
        if len != shape.len() {
            return Err(DeconvError::LengthMismatch {
                shape,
                expected: shape.len(),
                actual: len,
            });
        }
    }
    Ok(shape)
}
