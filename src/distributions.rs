/*!
Hernquist potential, its equilibrium distribution functions, and the [`Target`] trait
through which samplers consume them.

A phase-space point is a slice `[x, y, z, vx, vy, vz]` in kpc and km/s. The distribution
functions return the natural log of the *unnormalized* phase-space density. Points that
cannot carry probability mass (unbound, deeper than the potential allows, or with zero
angular momentum for the anisotropic model) get [`LOG_PROB_FLOOR`] instead of an error, so
an MCMC sampler rejects them through its ordinary acceptance test.

# Examples

```rust
use hernquist_tracers::distributions::{DfVariant, Hernquist, HernquistDf, Target};

let halo = Hernquist::new(1e11, 10.0).unwrap();
let df = HernquistDf::new(halo, "isotropic".parse::<DfVariant>().unwrap());

// A slow particle at one scale radius is bound.
let lp = df.unnorm_log_prob(&[10.0, 0.0, 0.0, 0.0, 50.0, 0.0]);
assert!(lp.is_finite() && lp > -1e19);

// A particle moving at 1000 km/s is not.
let lp = df.unnorm_log_prob(&[10.0, 0.0, 0.0, 0.0, 1000.0, 0.0]);
assert_eq!(lp, hernquist_tracers::constants::LOG_PROB_FLOOR);
```
*/

use std::f64::consts::SQRT_2;
use std::fmt;
use std::str::FromStr;

use crate::constants::{G, LOG_PROB_FLOOR, PI};
use crate::error::{Result, TracerError};

/// Dimension of a phase-space point.
pub const NDIM: usize = 6;

/// A trait for continuous target distributions from which we want to sample.
pub trait Target {
    /// Returns the log of the unnormalized density for state `theta`.
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64;
}

/**
Spherical Hernquist potential `Φ(r) = -G M / (r + a)`.

Both parameters are validated on construction and fixed afterwards.

```rust
use hernquist_tracers::distributions::Hernquist;

let halo = Hernquist::new(1e12, 20.0).unwrap();
// Half of the mass lies within (1 + √2) a.
let r_half = halo.half_mass_radius();
assert!((halo.radial_cdf(r_half) - 0.5).abs() < 1e-12);

assert!(Hernquist::new(-1.0, 20.0).is_err());
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hernquist {
    mass: f64,
    scale_radius: f64,
}

impl Hernquist {
    /// Creates a potential with total mass `mass` (M_sun) and scale radius `scale_radius` (kpc).
    pub fn new(mass: f64, scale_radius: f64) -> Result<Self> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(TracerError::InvalidParameter(format!(
                "Hernquist mass must be positive and finite, got {mass}"
            )));
        }
        if !(scale_radius.is_finite() && scale_radius > 0.0) {
            return Err(TracerError::InvalidParameter(format!(
                "Hernquist scale radius must be positive and finite, got {scale_radius}"
            )));
        }
        Ok(Self { mass, scale_radius })
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn scale_radius(&self) -> f64 {
        self.scale_radius
    }

    /// `G M` in kpc (km/s)².
    pub fn gm(&self) -> f64 {
        G * self.mass
    }

    /// Characteristic velocity `sqrt(G M / a)`; also the depth of the potential well
    /// expressed as a speed.
    pub fn velocity_scale(&self) -> f64 {
        (self.gm() / self.scale_radius).sqrt()
    }

    pub fn potential(&self, r: f64) -> f64 {
        -self.gm() / (r + self.scale_radius)
    }

    /// Mass density `M a / (2π r (r + a)³)`.
    pub fn density(&self, r: f64) -> f64 {
        let a = self.scale_radius;
        self.mass * a / (2.0 * PI * r * (r + a).powi(3))
    }

    pub fn enclosed_mass(&self, r: f64) -> f64 {
        self.mass * self.radial_cdf(r)
    }

    /// Fraction of the total mass inside radius `r`, `r² / (r + a)²`.
    pub fn radial_cdf(&self, r: f64) -> f64 {
        if r <= 0.0 {
            return 0.0;
        }
        let ratio = r / (r + self.scale_radius);
        ratio * ratio
    }

    /// Inverts [`Hernquist::radial_cdf`]: the radius enclosing a mass fraction `u ∈ [0, 1)`.
    pub fn sample_radius(&self, u: f64) -> f64 {
        let s = u.sqrt();
        self.scale_radius * s / (1.0 - s)
    }

    pub fn half_mass_radius(&self) -> f64 {
        (1.0 + SQRT_2) * self.scale_radius
    }

    /// Specific energy `½|v|² + Φ(r)` of a phase-space point; NaN unless `point` has
    /// exactly [`NDIM`] components.
    pub fn binding_energy(&self, point: &[f64]) -> f64 {
        let &[x, y, z, vx, vy, vz] = point else {
            return f64::NAN;
        };
        let r = (x * x + y * y + z * z).sqrt();
        0.5 * (vx * vx + vy * vy + vz * vz) + self.potential(r)
    }

    /// Energy in units of the well depth, `E / (G M / a)`. Bound orbits lie in `(-1, 0)`.
    pub fn normalized_energy(&self, point: &[f64]) -> f64 {
        self.binding_energy(point) / (self.gm() / self.scale_radius)
    }
}

/// Which closed-form Hernquist distribution function governs a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfVariant {
    /// Energy-only DF obtained by Eddington inversion.
    Isotropic,
    /// Fully radially anisotropic DF, `f ∝ E² / L`.
    Anisotropic,
}

impl DfVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            DfVariant::Isotropic => "isotropic",
            DfVariant::Anisotropic => "anisotropic",
        }
    }
}

impl fmt::Display for DfVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DfVariant {
    type Err = TracerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isotropic" => Ok(DfVariant::Isotropic),
            "anisotropic" => Ok(DfVariant::Anisotropic),
            _ => Err(TracerError::InvalidVariant(s.to_string())),
        }
    }
}

/// A Hernquist distribution function bound to one potential and one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HernquistDf {
    pub potential: Hernquist,
    pub variant: DfVariant,
}

impl HernquistDf {
    pub fn new(potential: Hernquist, variant: DfVariant) -> Self {
        Self { potential, variant }
    }
}

impl Target for HernquistDf {
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        log_density(
            theta,
            self.potential.mass,
            self.potential.scale_radius,
            self.variant,
        )
    }
}

/// Log of the unnormalized phase-space density of `point` under the chosen variant.
///
/// Never panics: malformed points, points with `E / (G M / a)` outside `(-1, 0)`, and
/// zero angular momentum under the anisotropic model all map to [`LOG_PROB_FLOOR`].
pub fn log_density(point: &[f64], mass: f64, scale_radius: f64, variant: DfVariant) -> f64 {
    let &[x, y, z, vx, vy, vz] = point else {
        return LOG_PROB_FLOOR;
    };
    let gm = G * mass;
    let r = (x * x + y * y + z * z).sqrt();
    let v2 = vx * vx + vy * vy + vz * vz;
    let energy = 0.5 * v2 - gm / (r + scale_radius);
    let x_e = energy / (gm / scale_radius);

    // Also rejects NaN.
    if !(x_e < 0.0 && x_e > -1.0) {
        return LOG_PROB_FLOOR;
    }

    let lnf = match variant {
        DfVariant::Isotropic => isotropic_log_df(-x_e, gm, scale_radius),
        DfVariant::Anisotropic => {
            let (lx, ly, lz) = (y * vz - z * vy, z * vx - x * vz, x * vy - y * vx);
            let l = (lx * lx + ly * ly + lz * lz).sqrt();
            if !(l > 0.0) {
                return LOG_PROB_FLOOR;
            }
            anisotropic_log_df(energy, l, gm, scale_radius)
        }
    };

    if lnf.is_finite() {
        lnf
    } else {
        LOG_PROB_FLOOR
    }
}

/// `B = -E / (G M / a)` in `(0, 1)`.
fn isotropic_log_df(b: f64, gm: f64, a: f64) -> f64 {
    let prefactor = b.sqrt() / (1.0 - b).powi(2)
        / (SQRT_2 * (2.0 * PI).powi(3) * (gm * a).powf(1.5));
    let term1 = (1.0 - 2.0 * b) * (8.0 * b * b - 8.0 * b - 3.0);
    let term2 = 3.0 * b.sqrt().asin() / (b * (1.0 - b)).sqrt();
    // Cancellation between the terms for very weakly bound orbits can leave a
    // non-positive sum; the caller floors the resulting NaN / -inf.
    (prefactor * (term1 + term2)).ln()
}

/// `ln(3a / (4π³) · E² / ((G M)³ L))`, evaluated in log space.
fn anisotropic_log_df(energy: f64, l: f64, gm: f64, a: f64) -> f64 {
    let log_prefactor = (3.0 * a / (4.0 * PI.powi(3))).ln();
    log_prefactor + 2.0 * energy.abs().ln() - 3.0 * gm.ln() - l.ln()
}
