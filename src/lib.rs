//! Phase-space initial conditions for tracer particles in a Hernquist potential, drawn by
//! ensemble MCMC from the isotropic or radially anisotropic equilibrium distribution function.

pub mod config;
pub mod constants;
pub mod core;
pub mod distributions;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod stats;
pub mod tracers;

pub use error::{Result, TracerError};
pub use tracers::{sample, SampleSet, TracerSampler};
