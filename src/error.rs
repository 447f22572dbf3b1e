//! Error types for hernquist-tracers.
//!
//! Numeric domain problems inside the distribution functions are never errors:
//! they are absorbed by [`crate::constants::LOG_PROB_FLOOR`]. Everything here is
//! structural and aborts a run before (or instead of) returning samples.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Distribution function not recognised: '{0}' (expected 'isotropic' or 'anisotropic')")]
    InvalidVariant(String),

    #[error("Sample size {n} must be a positive multiple of the walker count {n_walkers}")]
    PreconditionViolation { n: usize, n_walkers: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TracerError>;
