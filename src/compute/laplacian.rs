//! Discrete 3D Laplacian for smoothness regularisation.

use super::{DeconvError, Shape, Volume};
use super::operator::check_io;

/// Seven-point Laplacian stencil with zero boundary.
///
/// Centre weight -6, each of the six face neighbours +1. Neighbours that
/// fall outside the volume contribute nothing, which keeps the operator
/// symmetric: `forward` and `adjoint` are the same map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Laplacian3D {
    shape: Shape,
}

impl Laplacian3D {
    pub fn new(shape: Shape) -> Result<Self, DeconvError> {
        shape.ensure_non_empty()?;
        Ok(Self { shape })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn forward(&self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        let shape = check_io(Some(self.shape), input, output)?;
        let Shape {
            height,
            width,
            depth,
        } = shape;
        let stride_h = width * depth;
        let stride_w = depth;

        for h in 0..height {
            for w in 0..width {
                for d in 0..depth {
                    let idx = shape.index(h, w, d);
                    let mut acc = -6.0 * input[idx];

                    if h > 0 {
                        acc += input[idx - stride_h];
                    }
                    if h + 1 < height {
                        acc += input[idx + stride_h];
                    }
                    if w > 0 {
                        acc += input[idx - stride_w];
                    }
                    if w + 1 < width {
                        acc += input[idx + stride_w];
                    }
                    if d > 0 {
                        acc += input[idx - 1];
                    }
                    if d + 1 < depth {
                        acc += input[idx + 1];
                    }

                    output[idx] = acc;
                }
            }
        }
        Ok(())
    }

    pub fn adjoint(&self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.forward(input, output)
    }

    /// Apply the stencil to a whole volume.
    pub fn apply(&self, volume: &Volume) -> Result<Volume, DeconvError> {
        if volume.shape() != self.shape {
            return Err(DeconvError::ShapeMismatch {
                expected: self.shape,
                actual: volume.shape(),
            });
        }
        let mut output = vec![0.0f32; self.shape.len()];
        self.forward(volume.as_slice(), &mut output)?;
        Volume::new(self.shape, output)
    }
}
