//! Compute module - Numerical core of the deconvolution engine.

mod direct_convolution;
mod error;
mod fft3d;
mod fourier;
mod laplacian;
mod monitor;
mod operator;
mod padding;
mod solver;
mod volume;

pub mod psf;

pub use direct_convolution::*;
pub use error::*;
pub use fft3d::*;
pub use fourier::*;
pub use laplacian::*;
pub use monitor::*;
pub use operator::*;
pub use padding::*;
pub use solver::*;
pub use volume::*;
