//! Configuration: sampler tuning and the TOML run file read by the CLI.
//!
//! `SamplerConfig::default()` is the reference configuration (50 walkers, 1000 burn-in
//! iterations, thinning by 50). A run file names a potential and any number of tracer
//! populations, each sampled independently:
//!
//! ```toml
//! seed = 42
//!
//! [potential]
//! mass = 1e11
//! scale_radius = 10.0
//!
//! [[population]]
//! name = "dark_matter"
//! n = 5000
//! df = "isotropic"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distributions::{DfVariant, Hernquist, NDIM};
use crate::error::{Result, TracerError};

/// Tuning of the sampling controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of ensemble walkers. Every sample size must be a multiple of it.
    pub n_walkers: usize,

    /// Burn-in iterations, discarded.
    pub n_burnin: usize,

    /// Keep one production iteration in `thin`.
    pub thin: usize,

    /// Half-width of the initial position box, in units of the scale radius.
    pub position_spread: f64,

    /// Half-width of the initial velocity box, in units of `sqrt(G M / a) / sqrt(3)`.
    pub velocity_spread: f64,

    /// Stretch-move scale parameter.
    pub stretch_scale: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_walkers: 50,
            n_burnin: 1000,
            thin: 50,
            position_spread: 0.3,
            velocity_spread: 0.5,
            stretch_scale: 2.0,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_walkers < 2 * NDIM || self.n_walkers % 2 != 0 {
            return Err(TracerError::InvalidParameter(format!(
                "n_walkers must be even and at least {}, got {}",
                2 * NDIM,
                self.n_walkers
            )));
        }
        if self.thin == 0 {
            return Err(TracerError::InvalidParameter(
                "thin must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("position_spread", self.position_spread),
            ("velocity_spread", self.velocity_spread),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TracerError::InvalidParameter(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !(self.stretch_scale.is_finite() && self.stretch_scale > 1.0) {
            return Err(TracerError::InvalidParameter(format!(
                "stretch_scale must be finite and > 1, got {}",
                self.stretch_scale
            )));
        }
        Ok(())
    }

    /// Progress interval during burn-in: fifty reports per phase.
    pub fn burnin_interval(&self) -> usize {
        (self.n_burnin / 50).max(1)
    }

    /// Production iterations needed for `n` retained samples.
    pub fn production_iterations(&self, n: usize) -> usize {
        n / self.n_walkers * self.thin
    }
}

/// Errors reading a run file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid run file: {0}")]
    Invalid(String),
}

/// Potential section of a run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialConfig {
    /// Total mass in M_sun.
    pub mass: f64,
    /// Scale radius in kpc.
    pub scale_radius: f64,
}

/// One tracer population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub name: String,
    pub n: usize,
    #[serde(default = "default_df")]
    pub df: String,
    /// Overrides the potential's mass for this population.
    #[serde(default)]
    pub mass: Option<f64>,
    /// Overrides the potential's scale radius for this population.
    #[serde(default)]
    pub scale_radius: Option<f64>,
}

fn default_df() -> String {
    DfVariant::Isotropic.as_str().to_string()
}

/// Output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Top-level run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Seed for the whole run; population `i` uses `seed + i`.
    #[serde(default)]
    pub seed: Option<u64>,

    pub potential: PotentialConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(rename = "population", default)]
    pub populations: Vec<PopulationConfig>,

    #[serde(default)]
    pub output: OutputConfig,
}

/// A population with its potential and variant resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    pub name: String,
    pub n: usize,
    pub potential: Hernquist,
    pub variant: DfVariant,
}

/// Example run file printed by `hernquist-tracers example`.
pub const EXAMPLE_RUN_FILE: &str = r#"# Tracer initial conditions in a Milky-Way-like Hernquist halo.
seed = 42

[potential]
mass = 1e12          # M_sun
scale_radius = 20.0  # kpc

[sampler]
n_walkers = 50
n_burnin = 1000
thin = 50

[[population]]
name = "dark_matter"
n = 5000
df = "isotropic"

[[population]]
name = "stars"
n = 2000
df = "anisotropic"
scale_radius = 5.0

[output]
dir = "ics"
"#;

impl RunConfig {
    /// Load a run file from disk.
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Parse a run file; `origin` only labels errors.
    pub fn from_toml_str(content: &str, origin: &Path) -> std::result::Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_owned(),
            source: e,
        })
    }

    /// Validates the whole file and resolves every population.
    ///
    /// Fails on the first bad population with the same error `sample` would give.
    pub fn populations(&self) -> Result<Vec<Population>> {
        self.sampler.validate()?;
        if self.populations.is_empty() {
            return Err(ConfigError::Invalid("no [[population]] entries".to_string()).into());
        }
        let mut names = std::collections::HashSet::new();
        self.populations
            .iter()
            .map(|p| -> Result<Population> {
                if p.name.trim().is_empty() {
                    return Err(ConfigError::Invalid("population name is empty".to_string()).into());
                }
                if !names.insert(p.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate population name '{}'",
                        p.name
                    ))
                    .into());
                }
                let variant: DfVariant = p.df.parse()?;
                if p.n == 0 || p.n % self.sampler.n_walkers != 0 {
                    return Err(TracerError::PreconditionViolation {
                        n: p.n,
                        n_walkers: self.sampler.n_walkers,
                    });
                }
                let potential = Hernquist::new(
                    p.mass.unwrap_or(self.potential.mass),
                    p.scale_radius.unwrap_or(self.potential.scale_radius),
                )?;
                Ok(Population {
                    name: p.name.clone(),
                    n: p.n,
                    potential,
                    variant,
                })
            })
            .collect()
    }

    /// Seed for population `index`, if the run is seeded.
    pub fn population_seed(&self, index: usize) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(index as u64))
    }
}
