//! Schema module - Configuration and synthetic scene types for deconvolution runs.

mod config;
mod scene;

pub use config::*;
pub use scene::*;
