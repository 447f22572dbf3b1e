//! Chain diagnostics: a running potential scale reduction factor over the walkers of an
//! ensemble, plus a few summary helpers used in run reports.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

use crate::error::{Result, TracerError};

/// Running Gelman–Rubin statistic where every walker is treated as one chain.
///
/// Feed it the ensemble state after each iteration with [`RhatMulti::step`]; the means
/// and mean squares are updated online so no chain history is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_walkers x n_params
    mean_sq: Array2<f64>, // n_walkers x n_params
}

impl RhatMulti {
    pub fn new(n_walkers: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::zeros((n_walkers, n_params)),
            mean_sq: Array2::zeros((n_walkers, n_params)),
        }
    }

    pub fn n_steps(&self) -> usize {
        self.n
    }

    pub fn step(&mut self, state: ArrayView2<f64>) -> Result<()> {
        if state.dim() != self.mean.dim() {
            return Err(TracerError::Sampling(format!(
                "R-hat tracker expects states shaped {:?}, got {:?}",
                self.mean.dim(),
                state.dim()
            )));
        }
        self.n += 1;
        let n = self.n as f64;

        self.mean = (&self.mean * (n - 1.0) + &state) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &state.mapv(|x| x * x)) / n;
        Ok(())
    }

    /// R-hat per parameter.
    pub fn all(&self) -> Result<Array1<f64>> {
        let n_walkers = self.mean.nrows() as f64;
        if self.n < 2 || n_walkers < 2.0 {
            return Err(TracerError::Sampling(
                "R-hat needs at least two steps and two walkers".to_string(),
            ));
        }
        let mean_chain = self
            .mean
            .mean_axis(Axis(0))
            .ok_or_else(|| TracerError::Sampling("Mean across walkers failed".to_string()))?;
        let n = self.n as f64;
        let fac = n / (n_walkers - 1.0);
        let between = (&self.mean - &mean_chain.insert_axis(Axis(0)))
            .mapv(|x| x * x)
            .sum_axis(Axis(0))
            * fac;
        let sm2 = (&self.mean_sq - &self.mean.mapv(|x| x * x)) * n / (n - 1.0);
        let within = sm2.mean_axis(Axis(0)).ok_or_else(|| {
            TracerError::Sampling("Mean across walkers of variances failed".to_string())
        })?;
        let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
        Ok((var / within).mapv(f64::sqrt))
    }

    /// Largest R-hat across parameters; NaN entries (zero within-walker variance) are skipped.
    pub fn max(&self) -> Result<f64> {
        let max = *self.all()?.max_skipnan();
        if max.is_finite() {
            Ok(max)
        } else {
            Err(TracerError::Sampling(
                "R-hat undefined for every parameter".to_string(),
            ))
        }
    }
}

/// Median of a slice of finite values; `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}
