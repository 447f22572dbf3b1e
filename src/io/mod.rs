//! Persistence of sampled tracers.

#[cfg(feature = "csv")]
pub mod csv;
