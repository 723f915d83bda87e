//! Point-spread function helpers.
//!
//! Model PSFs are centred on voxel `size / 2` along each axis, the same
//! origin convention used by the padding utility and the operators.

use crate::schema::PsfModel;

use super::{DeconvError, Shape, Volume};

/// Scale `psf` to unit sum.
///
/// Fails if any sample is negative or non-finite, or if the sum is not
/// positive.
pub fn normalize(psf: &Volume) -> Result<Volume, DeconvError> {
    psf.shape().ensure_non_empty()?;

    let sum = psf.sum();
    if psf.find_invalid().is_some() || !sum.is_finite() || sum <= 0.0 {
        return Err(DeconvError::InvalidPsf { sum });
    }

    let inv_sum = (1.0 / sum) as f32;
    let data = psf.as_slice().iter().map(|&v| v * inv_sum).collect();
    Volume::new(psf.shape(), data)
}

/// Point reflection through the centre voxel.
///
/// Along an axis of length `n` sample `i` takes the value of sample
/// `(2 * (n / 2) - i) mod n`. For odd `n` this is plain reversal; for even
/// `n` the centre `n / 2` stays fixed and sample 0 maps onto itself.
///
/// Plain reversal on an even axis would shift the adjoint kernel by one
/// voxel against the `ifftshift` origin; this mapping is the exact
/// transpose of the centred forward convolution on every axis length.
pub fn point_reflect(kernel: &Volume) -> Volume {
    let shape = kernel.shape();
    let reflect = |i: usize, n: usize| (2 * (n / 2) + n - i) % n;

    Volume::from_fn(shape, |h, w, d| {
        kernel.get(
            reflect(h, shape.height),
            reflect(w, shape.width),
            reflect(d, shape.depth),
        )
    })
}

/// True if the kernel equals its point reflection within `tolerance`.
pub fn is_point_symmetric(kernel: &Volume, tolerance: f32) -> bool {
    let reflected = point_reflect(kernel);
    kernel
        .as_slice()
        .iter()
        .zip(reflected.as_slice())
        .all(|(a, b)| (a - b).abs() <= tolerance)
}

/// Generate a unit-sum PSF from a model description.
///
/// Fails with [`DeconvError::EmptyAxis`] for a zero-sized kernel and with
/// [`DeconvError::InvalidPsf`] when the model produces no usable weights,
/// e.g. a zero Gaussian sigma.
pub fn from_model(model: &PsfModel) -> Result<Volume, DeconvError> {
    let shape = model.shape();
    shape.ensure_non_empty()?;

    let raw = match model {
        PsfModel::Gaussian { sigma, .. } => {
            let (ch, cw, cd) = shape.center();
            let (sh, sw, sd) = *sigma;
            Volume::from_fn(shape, |h, w, d| {
                let dh = (h as f32 - ch as f32) / sh;
                let dw = (w as f32 - cw as f32) / sw;
                let dd = (d as f32 - cd as f32) / sd;
                (-0.5 * (dh * dh + dw * dw + dd * dd)).exp()
            })
        }
        PsfModel::Box { .. } => Volume::filled(shape, 1.0),
        PsfModel::Binomial { .. } => {
            let bh = binomial_row(shape.height);
            let bw = binomial_row(shape.width);
            let bd = binomial_row(shape.depth);
            Volume::from_fn(shape, |h, w, d| bh[h] * bw[w] * bd[d])
        }
    };

    normalize(&raw)
}

/// Unit impulse on the centre voxel.
pub fn delta(shape: Shape) -> Volume {
    let mut volume = Volume::zeros(shape);
    if !shape.is_empty() {
        let (h, w, d) = shape.center();
        volume.set(h, w, d, 1.0);
    }
    volume
}

/// Row `n - 1` of Pascal's triangle.
fn binomial_row(n: usize) -> Vec<f32> {
    let mut row = vec![1.0f32; n];
    for k in 1..n {
        row[k] = row[k - 1] * (n - k) as f32 / k as f32;
    }
    row
}
