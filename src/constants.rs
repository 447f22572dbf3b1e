//! Physical constants in the galactic unit system used throughout the crate.
//!
//! Lengths are in kiloparsecs, velocities in km/s and masses in solar masses, so
//! `G * M / r` comes out in (km/s)².

/// Gravitational constant in kpc (km/s)² / M_sun.
pub const G: f64 = 4.300_917_270e-6;

pub use std::f64::consts::PI;

/// Floor log-probability assigned to points outside the support of a DF.
///
/// Large and finite, so an ensemble sampler rejects such proposals through its
/// ordinary acceptance test.
pub const LOG_PROB_FLOOR: f64 = -1e20;
