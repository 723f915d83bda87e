//! deconv3d - Richardson-Lucy deconvolution of 3D volumes.
//!
//! This crate restores volumes blurred by a known point-spread function
//! with the multiplicative Richardson-Lucy update, using interchangeable
//! forward/adjoint operators.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Run configuration and synthetic test scenes
//! - `compute`: Numerical core (volumes, padding, FFTs, operators, solver)
//!
//! # Example
//!
//! ```rust,no_run
//! use deconv3d::{
//!     compute::{RichardsonLucy, Shape, Volume, build_operator, psf},
//!     schema::{Boundary, OperatorKind, PsfModel},
//! };
//!
//! let shape = Shape::new(32, 32, 16);
//! let data = Volume::filled(shape, 1.0);
//! let kernel = psf::from_model(&PsfModel::Binomial { size: (3, 3, 3) })?;
//!
//! let mut operator = build_operator(OperatorKind::CachedFourier, Boundary::Reflect);
//! operator.compute(&kernel, shape)?;
//!
//! let mut solver = RichardsonLucy::new(operator);
//! let outcome = solver.deconv(&data, 0.0, 20)?;
//!
//! println!("Final residual norm: {:?}", outcome.residual_norms.last());
//! # Ok::<(), deconv3d::compute::DeconvError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{
    ConvolutionOperator, DeconvError, DeconvOutcome, RichardsonLucy, Shape, SolverMonitor, Volume,
};
pub use schema::{DeconvConfig, OperatorKind, SceneConfig};
