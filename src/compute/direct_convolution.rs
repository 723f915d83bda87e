//! Direct spatial convolution for small PSFs.
//!
//! The forward operator convolves with the kernel and the adjoint
//! correlates with it, both centred on kernel voxel `size / 2`. Cost is
//! O(N * K) for N voxels and K kernel taps, which beats the FFT path when
//! the PSF support is only a few voxels across.

use rayon::prelude::*;

use crate::schema::Boundary;

use super::operator::check_io;
use super::{ConvolutionOperator, DeconvError, Shape, Volume, psf};

/// Convolution or correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `out[i] = sum_k w[k] * in[i - (k - c)]`
    Convolve,
    /// `out[i] = sum_k w[k] * in[i + (k - c)]`
    Correlate,
}

/// Map a possibly out-of-range coordinate back into `0..n`.
#[inline]
fn resolve(i: isize, n: usize, boundary: Boundary) -> usize {
    match boundary {
        Boundary::Periodic => i.rem_euclid(n as isize) as usize,
        Boundary::Reflect => {
            let period = 2 * n as isize;
            let m = i.rem_euclid(period) as usize;
            if m < n { m } else { 2 * n - 1 - m }
        }
    }
}

/// Source coordinate for every (output coordinate, kernel tap) pair on one axis,
/// stored as `table[i * taps + t]`.
fn axis_table(n: usize, taps: usize, boundary: Boundary, direction: Direction) -> Vec<usize> {
    let center = (taps / 2) as isize;
    let mut table = Vec::with_capacity(n * taps);
    for i in 0..n {
        for t in 0..taps {
            let offset = t as isize - center;
            let src = match direction {
                Direction::Convolve => i as isize - offset,
                Direction::Correlate => i as isize + offset,
            };
            table.push(resolve(src, n, boundary));
        }
    }
    table
}

/// Convolve or correlate `input` with `kernel` into a pre-allocated buffer.
///
/// Height planes are processed in parallel; every voxel sums its taps in
/// the same order regardless of scheduling.
pub fn convolve_direct_into(
    input: &[f32],
    shape: Shape,
    kernel: &Volume,
    boundary: Boundary,
    direction: Direction,
    output: &mut [f32],
) {
    assert_eq!(input.len(), shape.len());
    assert_eq!(output.len(), shape.len());

    let kshape = kernel.shape();
    let k_data = kernel.as_slice();
    let table_h = axis_table(shape.height, kshape.height, boundary, direction);
    let table_w = axis_table(shape.width, kshape.width, boundary, direction);
    let table_d = axis_table(shape.depth, kshape.depth, boundary, direction);

    let plane = shape.width * shape.depth;

    output
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(h, out_plane)| {
            let rows_h = &table_h[h * kshape.height..(h + 1) * kshape.height];
            for w in 0..shape.width {
                let rows_w = &table_w[w * kshape.width..(w + 1) * kshape.width];
                for d in 0..shape.depth {
                    let rows_d = &table_d[d * kshape.depth..(d + 1) * kshape.depth];
                    let mut sum = 0.0f32;

                    for (kh, &sh) in rows_h.iter().enumerate() {
                        for (kw, &sw) in rows_w.iter().enumerate() {
                            let k_row = kshape.index(kh, kw, 0);
                            let in_row = shape.index(sh, sw, 0);
                            for (kd, &sd) in rows_d.iter().enumerate() {
                                let k_val = k_data[k_row + kd];
                                if k_val == 0.0 {
                                    continue;
                                }
                                sum += input[in_row + sd] * k_val;
                            }
                        }
                    }

                    out_plane[w * shape.depth + d] = sum;
                }
            }
        });
}

/// Convolve `input` with `kernel`, allocating the output.
pub fn convolve_direct(
    input: &[f32],
    shape: Shape,
    kernel: &Volume,
    boundary: Boundary,
) -> Vec<f32> {
    let mut output = vec![0.0f32; shape.len()];
    convolve_direct_into(input, shape, kernel, boundary, Direction::Convolve, &mut output);
    output
}

/// Forward/adjoint operator evaluated by spatial convolution.
///
/// The kernel is used at its own size; it is not padded to the data shape.
pub struct DirectOperator {
    boundary: Boundary,
    kernel: Option<Volume>,
    shape: Option<Shape>,
}

impl DirectOperator {
    pub fn new(boundary: Boundary) -> Self {
        Self {
            boundary,
            kernel: None,
            shape: None,
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn apply(
        &self,
        input: &[f32],
        output: &mut [f32],
        direction: Direction,
    ) -> Result<(), DeconvError> {
        let shape = check_io(self.shape, input, output)?;
        let kernel = self.kernel.as_ref().ok_or(DeconvError::NotConfigured)?;
        convolve_direct_into(input, shape, kernel, self.boundary, direction, output);
        Ok(())
    }
}

impl ConvolutionOperator for DirectOperator {
    fn compute(&mut self, psf_volume: &Volume, shape: Shape) -> Result<(), DeconvError> {
        shape.ensure_non_empty()?;
        let kernel = psf::normalize(psf_volume)?;

        if !psf::is_point_symmetric(&kernel, 1e-6) {
            log::warn!(
                "Direct operator kernel {} is not point-symmetric; adjoint uses correlation",
                kernel.shape()
            );
        }
        log::debug!(
            "Direct operator configured: kernel {} on {} ({:?} boundary)",
            kernel.shape(),
            shape,
            self.boundary
        );

        self.kernel = Some(kernel);
        self.shape = Some(shape);
        Ok(())
    }

    fn shape(&self) -> Option<Shape> {
        self.shape
    }

    fn forward(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Convolve)
    }

    fn adjoint(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Correlate)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
