/*!
# Affine-Invariant Ensemble Sampler

Goodman & Weare (2010) stretch-move sampler implementing [`EnsembleSampler`].

The ensemble is split into two halves. Each half is updated in turn using the other as the
complementary ensemble: walker `X_k` proposes `Y = X_j + z (X_k - X_j)` with `X_j` drawn
from the complementary half and `z ~ g(z) ∝ 1/sqrt(z)` on `[1/s, s]`, and accepts with
probability `min(1, z^(d-1) p(Y) / p(X_k))`.

Proposals are drawn sequentially from the sampler's seeded RNG, then the target is evaluated
for the whole half in parallel with rayon, so a run is reproducible for a given seed
regardless of the thread count.

## Example Usage

```rust
use hernquist_tracers::core::EnsembleSampler;
use hernquist_tracers::distributions::{DfVariant, Hernquist, HernquistDf};
use hernquist_tracers::ensemble::AffineInvariantSampler;
use ndarray::Array2;

let df = HernquistDf::new(Hernquist::new(1e11, 10.0).unwrap(), DfVariant::Isotropic);
let mut sampler = AffineInvariantSampler::new(df, 12, 6).unwrap().set_seed(42);

// Components within ±5 kpc and ±50 km/s: every walker starts bound.
let p0 = Array2::from_shape_fn((12, 6), |(k, j)| {
    let offset = ((7 * k + 3 * j) % 11) as f64 - 5.0;
    if j < 3 { offset } else { 10.0 * offset }
});
sampler.advance(p0.view(), 20, 5, &mut |_, _| {}).unwrap();
assert_eq!(sampler.chain().unwrap().dim(), (12, 4, 6));
```
*/

use std::ops::Range;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rayon::prelude::*;

use crate::core::EnsembleSampler;
use crate::distributions::Target;
use crate::error::{Result, TracerError};

/// Stretch-move proposal with scale parameter `s > 1`; 2.0 is the usual choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    pub scale: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { scale: 2.0 }
    }
}

impl StretchMove {
    pub fn new(scale: f64) -> Result<Self> {
        if !(scale > 1.0 && scale.is_finite()) {
            return Err(TracerError::InvalidParameter(format!(
                "Stretch move scale must be finite and > 1, got {scale}"
            )));
        }
        Ok(Self { scale })
    }

    /// Draws `z` from `g(z) ∝ 1/sqrt(z)` on `[1/s, s]` by inverting its CDF.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        ((self.scale - 1.0) * u + 1.0).powi(2) / self.scale
    }

    /// Log acceptance ratio `(d - 1) ln z + ln p(Y) - ln p(X)`.
    ///
    /// Non-finite proposal densities give `-inf`, i.e. certain rejection.
    pub fn log_acceptance(&self, z: f64, n_dim: usize, log_prob_old: f64, log_prob_new: f64) -> f64 {
        if !log_prob_new.is_finite() {
            return f64::NEG_INFINITY;
        }
        (n_dim as f64 - 1.0) * z.ln() + (log_prob_new - log_prob_old)
    }
}

/// The ensemble sampler.
///
/// Holds the target, the walker positions with their cached log-densities, the retained
/// chain, and a seeded RNG. Construct with [`AffineInvariantSampler::new`] and make it
/// reproducible with [`AffineInvariantSampler::set_seed`].
#[derive(Debug, Clone)]
pub struct AffineInvariantSampler<D> {
    /// The target distribution we want to sample from.
    pub target: D,
    /// The stretch proposal.
    pub stretch: StretchMove,
    /// The random seed the RNG was created from.
    pub seed: u64,
    positions: Array2<f64>,
    log_probs: Array1<f64>,
    n_accepted: Array1<usize>,
    n_proposed: Array1<usize>,
    stored: Vec<Array2<f64>>,
    rng: SmallRng,
}

impl<D> AffineInvariantSampler<D>
where
    D: Target + Sync,
{
    /// Creates a sampler for `n_walkers` walkers in `n_dim` dimensions.
    ///
    /// `n_walkers` must be even and at least `2 * n_dim`. Walkers start at the origin until
    /// [`EnsembleSampler::set_walkers`] or [`EnsembleSampler::advance`] places them.
    pub fn new(target: D, n_walkers: usize, n_dim: usize) -> Result<Self> {
        if n_dim == 0 {
            return Err(TracerError::InvalidParameter(
                "Ensemble dimension must be positive".to_string(),
            ));
        }
        if n_walkers < 2 * n_dim || n_walkers % 2 != 0 {
            return Err(TracerError::InvalidParameter(format!(
                "Need an even number of walkers, at least twice the dimension {n_dim}; got {n_walkers}"
            )));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            stretch: StretchMove::default(),
            seed,
            positions: Array2::zeros((n_walkers, n_dim)),
            log_probs: Array1::from_elem(n_walkers, f64::NEG_INFINITY),
            n_accepted: Array1::zeros(n_walkers),
            n_proposed: Array1::zeros(n_walkers),
            stored: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Reseeds the sampler's RNG.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_stretch(mut self, stretch: StretchMove) -> Self {
        self.stretch = stretch;
        self
    }

    /// Cached log-densities of the current walker positions.
    pub fn log_probs(&self) -> &Array1<f64> {
        &self.log_probs
    }

    /// Accepted over proposed moves, pooled over walkers.
    pub fn mean_acceptance_rate(&self) -> f64 {
        let proposed: usize = self.n_proposed.sum();
        if proposed == 0 {
            return 0.0;
        }
        self.n_accepted.sum() as f64 / proposed as f64
    }

    /// Updates the walkers in `active` with stretch moves against `complementary`.
    fn update_half(&mut self, active: Range<usize>, complementary: Range<usize>) {
        let n_dim = self.positions.ncols();

        let proposals: Vec<(Array1<f64>, f64)> = active
            .clone()
            .map(|k| {
                let z = self.stretch.sample_z(&mut self.rng);
                let j = self.rng.gen_range(complementary.clone());
                let current = self.positions.row(k);
                let other = self.positions.row(j);
                let proposal = &other + &((&current - &other) * z);
                (proposal, z)
            })
            .collect();

        let target = &self.target;
        let proposal_lps: Vec<f64> = proposals
            .par_iter()
            .map(|(proposal, _)| eval_log_prob(target, proposal.view()))
            .collect();

        for ((k, (proposal, z)), lp_new) in active.zip(proposals).zip(proposal_lps) {
            let log_ratio = self
                .stretch
                .log_acceptance(z, n_dim, self.log_probs[k], lp_new);
            self.n_proposed[k] += 1;
            let u: f64 = self.rng.gen();
            if log_ratio > u.ln() {
                self.positions.row_mut(k).assign(&proposal);
                self.log_probs[k] = lp_new;
                self.n_accepted[k] += 1;
            }
        }
    }
}

impl<D> EnsembleSampler for AffineInvariantSampler<D>
where
    D: Target + Sync,
{
    fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    fn n_dim(&self) -> usize {
        self.positions.ncols()
    }

    fn set_walkers(&mut self, positions: ArrayView2<f64>) -> Result<()> {
        if positions.dim() != self.positions.dim() {
            return Err(TracerError::Sampling(format!(
                "Initial walker positions must be shaped {:?}, got {:?}",
                self.positions.dim(),
                positions.dim()
            )));
        }
        self.positions.assign(&positions);

        let target = &self.target;
        let rows: Vec<ArrayView1<f64>> = self.positions.outer_iter().collect();
        let lps: Vec<f64> = rows
            .par_iter()
            .map(|row| eval_log_prob(target, row.view()))
            .collect();
        self.log_probs = Array1::from_vec(lps);
        Ok(())
    }

    fn step(&mut self) -> &Array2<f64> {
        let n = self.positions.nrows();
        let half = n / 2;
        self.update_half(0..half, half..n);
        self.update_half(half..n, 0..half);
        &self.positions
    }

    fn current_state(&self) -> &Array2<f64> {
        &self.positions
    }

    fn record(&mut self) {
        self.stored.push(self.positions.clone());
    }

    fn reset(&mut self) {
        self.stored.clear();
        self.n_accepted.fill(0);
        self.n_proposed.fill(0);
    }

    fn chain(&self) -> Result<Array3<f64>> {
        let (n_walkers, n_dim) = self.positions.dim();
        let views: Vec<ArrayView2<f64>> = self.stored.iter().map(|s| s.view()).collect();
        if views.is_empty() {
            return Ok(Array3::zeros((n_walkers, 0, n_dim)));
        }
        ndarray::stack(Axis(1), &views)
            .map_err(|e| TracerError::Sampling(format!("Stacking the retained states failed: {e}")))
    }

    fn acceptance_fraction(&self) -> Array1<f64> {
        self.n_accepted
            .iter()
            .zip(self.n_proposed.iter())
            .map(|(&a, &p)| if p > 0 { a as f64 / p as f64 } else { 0.0 })
            .collect()
    }
}

fn eval_log_prob<D: Target>(target: &D, theta: ArrayView1<f64>) -> f64 {
    match theta.as_slice() {
        Some(slice) => target.unnorm_log_prob(slice),
        None => target.unnorm_log_prob(&theta.to_vec()),
    }
}
