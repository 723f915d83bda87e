//! Frequency-domain forward/adjoint operators.
//!
//! Both operators convolve circularly through the FFT and re-centre the
//! result with an `ifftshift`, so a kernel whose origin sits on voxel
//! `shape / 2` after padding blurs without displacement. The transfer
//! functions are divided by the element count up front, which makes
//! multiply-then-inverse-transform reproduce unscaled spatial convolution.

use num_complex::Complex;

use super::operator::check_io;
use super::{
    CachedRealFft3D, ConvolutionOperator, DeconvError, Fft3D, Shape, Volume, ifftshift_into,
    pad_or_crop, psf,
};

/// Normalised, reconciled PSF and its point reflection.
fn prepare_kernels(psf_volume: &Volume, shape: Shape) -> Result<(Volume, Volume), DeconvError> {
    shape.ensure_non_empty()?;
    let normalized = psf::normalize(psf_volume)?;
    let kernel = pad_or_crop(&normalized, shape)?;
    let reflected = psf::point_reflect(&kernel);
    Ok((kernel, reflected))
}

/// Which transfer function to multiply by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Adjoint,
}

/// Transfer functions computed over the full complex spectrum.
struct FullOtf {
    shape: Shape,
    forward: Vec<Complex<f32>>,
    adjoint: Vec<Complex<f32>>,
}

/// Frequency-domain operator that plans and allocates on every call.
///
/// Simple and stateless apart from the transfer functions; prefer
/// [`CachedFourierOperator`] for runs of more than a few iterations.
#[derive(Default)]
pub struct FourierOperator {
    otf: Option<FullOtf>,
}

impl FourierOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(
        &self,
        input: &[f32],
        output: &mut [f32],
        direction: Direction,
    ) -> Result<(), DeconvError> {
        let shape = check_io(self.shape(), input, output)?;
        let otf = self.otf.as_ref().ok_or(DeconvError::NotConfigured)?;
        let transfer = match direction {
            Direction::Forward => &otf.forward,
            Direction::Adjoint => &otf.adjoint,
        };

        let fft = Fft3D::new(shape);
        let mut spectrum = fft.forward(input);
        for (bin, h) in spectrum.iter_mut().zip(transfer.iter()) {
            *bin *= h;
        }
        let blurred = fft.inverse(&mut spectrum);

        ifftshift_into(&blurred, output, shape);
        Ok(())
    }
}

impl ConvolutionOperator for FourierOperator {
    fn compute(&mut self, psf_volume: &Volume, shape: Shape) -> Result<(), DeconvError> {
        let (kernel, reflected) = prepare_kernels(psf_volume, shape)?;
        let fft = Fft3D::new(shape);
        let scale = 1.0 / shape.len() as f32;

        let mut forward = fft.forward(kernel.as_slice());
        let mut adjoint = fft.forward(reflected.as_slice());
        forward.iter_mut().for_each(|c| *c *= scale);
        adjoint.iter_mut().for_each(|c| *c *= scale);

        log::debug!("Fourier operator configured for {}", shape);
        self.otf = Some(FullOtf {
            shape,
            forward,
            adjoint,
        });
        Ok(())
    }

    fn shape(&self) -> Option<Shape> {
        self.otf.as_ref().map(|otf| otf.shape)
    }

    fn forward(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Forward)
    }

    fn adjoint(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Adjoint)
    }

    fn name(&self) -> &'static str {
        "fourier"
    }
}

/// Plans, buffers and half-spectrum transfer functions for one shape.
struct CachedState {
    fft: CachedRealFft3D,
    forward: Vec<Complex<f32>>,
    adjoint: Vec<Complex<f32>>,
}

/// Frequency-domain operator with transform plans and working buffers
/// created once in `compute` and reused by every call.
///
/// Everything is released when the operator is dropped or reconfigured.
#[derive(Default)]
pub struct CachedFourierOperator {
    state: Option<CachedState>,
}

impl CachedFourierOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        direction: Direction,
    ) -> Result<(), DeconvError> {
        let shape = check_io(self.shape(), input, output)?;
        let state = self.state.as_mut().ok_or(DeconvError::NotConfigured)?;
        let transfer = match direction {
            Direction::Forward => &state.forward,
            Direction::Adjoint => &state.adjoint,
        };

        state.fft.spatial_mut().copy_from_slice(input);
        state.fft.forward()?;
        for (bin, h) in state.fft.spectrum_mut().iter_mut().zip(transfer.iter()) {
            *bin *= h;
        }
        state.fft.inverse()?;

        ifftshift_into(state.fft.spatial(), output, shape);
        Ok(())
    }
}

/// Half-spectrum transfer function of `kernel`, scaled by `1 / len`.
fn half_spectrum(
    fft: &mut CachedRealFft3D,
    kernel: &Volume,
) -> Result<Vec<Complex<f32>>, DeconvError> {
    let scale = 1.0 / kernel.len() as f32;
    fft.spatial_mut().copy_from_slice(kernel.as_slice());
    fft.forward()?;
    Ok(fft.spectrum().iter().map(|&c| c * scale).collect())
}

impl ConvolutionOperator for CachedFourierOperator {
    fn compute(&mut self, psf_volume: &Volume, shape: Shape) -> Result<(), DeconvError> {
        let (kernel, reflected) = prepare_kernels(psf_volume, shape)?;

        // Drop the previous plans before allocating new ones.
        self.state = None;
        let mut fft = CachedRealFft3D::new(shape);
        let forward = half_spectrum(&mut fft, &kernel)?;
        let adjoint = half_spectrum(&mut fft, &reflected)?;

        log::debug!(
            "Cached Fourier operator configured for {} ({} bins per transfer function)",
            shape,
            forward.len()
        );
        self.state = Some(CachedState {
            fft,
            forward,
            adjoint,
        });
        Ok(())
    }

    fn shape(&self) -> Option<Shape> {
        self.state.as_ref().map(|state| state.fft.shape())
    }

    fn forward(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Forward)
    }

    fn adjoint(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), DeconvError> {
        self.apply(input, output, Direction::Adjoint)
    }

    fn name(&self) -> &'static str {
        "cached-fourier"
    }
}
