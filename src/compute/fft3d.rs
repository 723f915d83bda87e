//! 3D FFTs over volumes in `(height, width, depth)` C order.
//!
//! The 3D transform is performed as separable 1D transforms along each axis.
//! Neither direction is normalised: a forward transform followed by an
//! inverse one scales the data by the element count.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};

use super::{DeconvError, Shape};

/// Run `fft` over every line of an `[outer][n][inner]` array along the middle axis.
///
/// `line` must hold at least `n` samples and `scratch` must satisfy the
/// plan's in-place scratch length.
fn process_axis(
    data: &mut [Complex<f32>],
    outer: usize,
    n: usize,
    inner: usize,
    fft: &dyn Fft<f32>,
    line: &mut [Complex<f32>],
    scratch: &mut [Complex<f32>],
) {
    if inner == 1 {
        for row in data.chunks_exact_mut(n) {
            fft.process_with_scratch(row, scratch);
        }
        return;
    }

    for o in 0..outer {
        let base = o * n * inner;
        for i in 0..inner {
            // Extract line
            for k in 0..n {
                line[k] = data[base + k * inner + i];
            }
            fft.process_with_scratch(&mut line[..n], scratch);
            // Write back
            for k in 0..n {
                data[base + k * inner + i] = line[k];
            }
        }
    }
}

/// Circularly shift `src` so that sample `n / 2` of every axis lands on 0.
///
/// Equivalent to numpy's `ifftshift`.
pub fn ifftshift_into(src: &[f32], dst: &mut [f32], shape: Shape) {
    assert_eq!(src.len(), shape.len());
    assert_eq!(dst.len(), shape.len());

    let Shape {
        height,
        width,
        depth,
    } = shape;
    let (sh, sw, sd) = shape.center();

    for h in 0..height {
        let src_h = (h + sh) % height;
        for w in 0..width {
            let src_w = (w + sw) % width;
            let dst_row = shape.index(h, w, 0);
            let src_row = shape.index(src_h, src_w, 0);
            // Depth is contiguous: the shift is a rotation of the row.
            let split = depth - sd;
            dst[dst_row..dst_row + split].copy_from_slice(&src[src_row + sd..src_row + depth]);
            dst[dst_row + split..dst_row + depth].copy_from_slice(&src[src_row..src_row + sd]);
        }
    }
}

/// Basic full-spectrum 3D FFT (plans and buffers allocated on each call).
pub struct Fft3D {
    shape: Shape,
}

impl Fft3D {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }

    /// Forward transform of real-valued input.
    pub fn forward(&self, input: &[f32]) -> Vec<Complex<f32>> {
        assert_eq!(input.len(), self.shape.len());

        let mut data: Vec<Complex<f32>> = input.iter().map(|&x| Complex::new(x, 0.0)).collect();

        let mut planner = FftPlanner::new();
        let fft_h = planner.plan_fft_forward(self.shape.height);
        let fft_w = planner.plan_fft_forward(self.shape.width);
        let fft_d = planner.plan_fft_forward(self.shape.depth);
        self.transform(&mut data, [fft_h, fft_w, fft_d]);

        data
    }

    /// Inverse transform, keeping the real part.
    ///
    /// The imaginary part is dropped unchecked; for spectra of real data
    /// multiplied by a Hermitian filter it is round-off noise.
    pub fn inverse(&self, spectrum: &mut [Complex<f32>]) -> Vec<f32> {
        assert_eq!(spectrum.len(), self.shape.len());

        let mut planner = FftPlanner::new();
        let ifft_h = planner.plan_fft_inverse(self.shape.height);
        let ifft_w = planner.plan_fft_inverse(self.shape.width);
        let ifft_d = planner.plan_fft_inverse(self.shape.depth);
        self.transform(spectrum, [ifft_h, ifft_w, ifft_d]);

        spectrum.iter().map(|c| c.re).collect()
    }

    fn transform(&self, data: &mut [Complex<f32>], plans: [Arc<dyn Fft<f32>>; 3]) {
        let Shape {
            height,
            width,
            depth,
        } = self.shape;
        let [plan_h, plan_w, plan_d] = plans;

        let scratch_len = plan_h
            .get_inplace_scratch_len()
            .max(plan_w.get_inplace_scratch_len())
            .max(plan_d.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];
        let mut line = vec![Complex::new(0.0, 0.0); height.max(width)];

        // Depth axis (contiguous)
        process_axis(data, height * width, depth, 1, plan_d.as_ref(), &mut line, &mut scratch);
        // Width axis
        process_axis(data, height, width, depth, plan_w.as_ref(), &mut line, &mut scratch);
        // Height axis
        process_axis(data, 1, height, width * depth, plan_h.as_ref(), &mut line, &mut scratch);
    }
}

/// Real-input 3D FFT with plans and working buffers allocated once.
///
/// The depth axis uses a real-to-complex plan, so the spectrum holds
/// `height * width * (depth / 2 + 1)` bins. Callers write into
/// [`spatial_mut`](Self::spatial_mut), run [`forward`](Self::forward),
/// edit [`spectrum_mut`](Self::spectrum_mut), then run
/// [`inverse`](Self::inverse) and read [`spatial`](Self::spatial).
pub struct CachedRealFft3D {
    shape: Shape,
    half_depth: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    fft_w: Arc<dyn Fft<f32>>,
    fft_h: Arc<dyn Fft<f32>>,
    ifft_w: Arc<dyn Fft<f32>>,
    ifft_h: Arc<dyn Fft<f32>>,
    spatial: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    line: Vec<Complex<f32>>,
    r2c_scratch: Vec<Complex<f32>>,
    c2r_scratch: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl CachedRealFft3D {
    /// Plan all transforms and allocate buffers for `shape`.
    pub fn new(shape: Shape) -> Self {
        let half_depth = shape.depth / 2 + 1;

        let mut real_planner = RealFftPlanner::<f32>::new();
        let r2c = real_planner.plan_fft_forward(shape.depth);
        let c2r = real_planner.plan_fft_inverse(shape.depth);

        let mut planner = FftPlanner::new();
        let fft_w = planner.plan_fft_forward(shape.width);
        let fft_h = planner.plan_fft_forward(shape.height);
        let ifft_w = planner.plan_fft_inverse(shape.width);
        let ifft_h = planner.plan_fft_inverse(shape.height);

        let scratch_len = fft_w
            .get_inplace_scratch_len()
            .max(fft_h.get_inplace_scratch_len())
            .max(ifft_w.get_inplace_scratch_len())
            .max(ifft_h.get_inplace_scratch_len());

        let r2c_scratch = r2c.make_scratch_vec();
        let c2r_scratch = c2r.make_scratch_vec();
        let spectrum_len = shape.height * shape.width * half_depth;

        log::debug!(
            "Planned cached real 3D FFT for {} ({} spectrum bins)",
            shape,
            spectrum_len
        );

        Self {
            shape,
            half_depth,
            r2c,
            c2r,
            fft_w,
            fft_h,
            ifft_w,
            ifft_h,
            spatial: vec![0.0; shape.len()],
            spectrum: vec![Complex::new(0.0, 0.0); spectrum_len],
            line: vec![Complex::new(0.0, 0.0); shape.height.max(shape.width)],
            r2c_scratch,
            c2r_scratch,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of spectrum bins, `height * width * (depth / 2 + 1)`.
    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.spectrum.len()
    }

    #[inline]
    pub fn spatial(&self) -> &[f32] {
        &self.spatial
    }

    #[inline]
    pub fn spatial_mut(&mut self) -> &mut [f32] {
        &mut self.spatial
    }

    #[inline]
    pub fn spectrum(&self) -> &[Complex<f32>] {
        &self.spectrum
    }

    #[inline]
    pub fn spectrum_mut(&mut self) -> &mut [Complex<f32>] {
        &mut self.spectrum
    }

    /// Transform the spatial buffer into the spectrum buffer.
    ///
    /// The spatial buffer is used as scratch and is left unspecified.
    pub fn forward(&mut self) -> Result<(), DeconvError> {
        let Shape {
            height,
            width,
            depth,
        } = self.shape;
        let half = self.half_depth;

        // Depth axis: real to complex, line by line.
        for (line, bins) in self
            .spatial
            .chunks_exact_mut(depth)
            .zip(self.spectrum.chunks_exact_mut(half))
        {
            self.r2c
                .process_with_scratch(line, bins, &mut self.r2c_scratch)?;
        }

        // Width axis
        process_axis(
            &mut self.spectrum,
            height,
            width,
            half,
            self.fft_w.as_ref(),
            &mut self.line,
            &mut self.scratch,
        );
        // Height axis
        process_axis(
            &mut self.spectrum,
            1,
            height,
            width * half,
            self.fft_h.as_ref(),
            &mut self.line,
            &mut self.scratch,
        );

        Ok(())
    }

    /// Transform the spectrum buffer back into the spatial buffer.
    ///
    /// The spectrum buffer is used as scratch and is left unspecified.
    pub fn inverse(&mut self) -> Result<(), DeconvError> {
        let Shape {
            height,
            width,
            depth,
        } = self.shape;
        let half = self.half_depth;

        // Height axis
        process_axis(
            &mut self.spectrum,
            1,
            height,
            width * half,
            self.ifft_h.as_ref(),
            &mut self.line,
            &mut self.scratch,
        );
        // Width axis
        process_axis(
            &mut self.spectrum,
            height,
            width,
            half,
            self.ifft_w.as_ref(),
            &mut self.line,
            &mut self.scratch,
        );

        // Depth axis: complex to real. The DC (and Nyquist, for even depth)
        // bins of a real signal are real; clear their round-off imaginary part.
        for (bins, line) in self
            .spectrum
            .chunks_exact_mut(half)
            .zip(self.spatial.chunks_exact_mut(depth))
        {
            bins[0].im = 0.0;
            if depth % 2 == 0 {
                bins[half - 1].im = 0.0;
            }
            self.c2r
                .process_with_scratch(bins, line, &mut self.c2r_scratch)?;
        }

        Ok(())
    }
}
