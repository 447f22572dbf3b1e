//! The capabilities the sampling controller consumes: an ensemble MCMC engine and a
//! progress reporter.
//!
//! Anything implementing [`EnsembleSampler`] can drive a run; the crate ships the
//! stretch-move engine in [`crate::ensemble`], and tests substitute fakes.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, Array3, ArrayView2};

use crate::error::{Result, TracerError};

/// A multi-walker MCMC engine.
///
/// Implementors provide single iterations ([`EnsembleSampler::step`]) and chain storage
/// ([`EnsembleSampler::record`]); [`EnsembleSampler::advance`] composes them into a
/// thinned run.
pub trait EnsembleSampler {
    fn n_walkers(&self) -> usize;

    fn n_dim(&self) -> usize;

    /// Places the walkers at `positions`, shaped `(n_walkers, n_dim)`.
    fn set_walkers(&mut self, positions: ArrayView2<f64>) -> Result<()>;

    /// Does one iteration of the ensemble, returning the new walker positions.
    fn step(&mut self) -> &Array2<f64>;

    /// Current walker positions without stepping.
    fn current_state(&self) -> &Array2<f64>;

    /// Appends the current walker positions to the retained chain.
    fn record(&mut self);

    /// Clears the retained chain and acceptance counters. Walker positions are kept,
    /// but callers pass the next starting point to `advance` explicitly.
    fn reset(&mut self);

    /// Retained states shaped `(n_walkers, n_stored, n_dim)`. Fails with
    /// [`TracerError::Sampling`] if the retained states cannot be stacked.
    fn chain(&self) -> Result<Array3<f64>>;

    /// Retained states flattened walker-major, shaped `(n_walkers * n_stored, n_dim)`.
    fn flatchain(&self) -> Result<Array2<f64>> {
        let chain = self.chain()?;
        let (n_walkers, n_stored, n_dim) = chain.dim();
        chain
            .to_shape((n_walkers * n_stored, n_dim))
            .map(|flat| flat.to_owned())
            .map_err(|e| TracerError::Sampling(format!("Flattening the chain failed: {e}")))
    }

    /// Fraction of accepted proposals per walker since the last reset.
    fn acceptance_fraction(&self) -> Array1<f64>;

    /// Runs `iterations` steps from `initial`, retaining iteration `i` when `i % thin == 0`.
    ///
    /// `on_iteration` sees the iteration index and the walker positions after it.
    fn advance(
        &mut self,
        initial: ArrayView2<f64>,
        iterations: usize,
        thin: usize,
        on_iteration: &mut dyn FnMut(usize, ArrayView2<f64>),
    ) -> Result<()> {
        if thin == 0 {
            return Err(TracerError::InvalidParameter(
                "Thinning factor must be at least 1".to_string(),
            ));
        }
        self.set_walkers(initial)?;
        for i in 0..iterations {
            self.step();
            if i % thin == 0 {
                self.record();
            }
            on_iteration(i, self.current_state().view());
        }
        Ok(())
    }
}

/// Stage of a sampling run, passed to progress reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BurnIn,
    Production,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::BurnIn => "burn-in",
            Phase::Production => "sampling",
        }
    }
}

/// Observes a run. Reporters must not influence sampling.
pub trait ProgressReporter {
    fn begin(&mut self, _phase: Phase, _total: usize) {}

    /// Called once per iteration; implementations emit output every `interval` iterations.
    fn report(&mut self, current: usize, total: usize, interval: usize);

    fn finish(&mut self, _phase: Phase) {}
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&mut self, _current: usize, _total: usize, _interval: usize) {}
}

/// Terminal progress bar.
#[derive(Debug, Default)]
pub struct ProgressBarReporter {
    pb: Option<ProgressBar>,
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn begin(&mut self, phase: Phase, total: usize) {
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_prefix(phase.label());
        self.pb = Some(pb);
    }

    fn report(&mut self, current: usize, total: usize, interval: usize) {
        if let Some(pb) = &self.pb {
            if current % interval.max(1) == 0 || current + 1 == total {
                pb.set_position(current as u64 + 1);
            }
        }
    }

    fn finish(&mut self, _phase: Phase) {
        if let Some(pb) = self.pb.take() {
            pb.finish_with_message("Done!");
        }
    }
}

/// Emits one `tracing` event every `interval` iterations.
#[derive(Debug, Clone, Copy)]
pub struct LogReporter {
    phase: Phase,
}

impl Default for LogReporter {
    fn default() -> Self {
        Self {
            phase: Phase::BurnIn,
        }
    }
}

impl ProgressReporter for LogReporter {
    fn begin(&mut self, phase: Phase, _total: usize) {
        self.phase = phase;
    }

    fn report(&mut self, current: usize, total: usize, interval: usize) {
        if current % interval.max(1) == 0 {
            let percent = 100.0 * current as f64 / total.max(1) as f64;
            tracing::debug!(
                phase = self.phase.label(),
                current,
                total,
                "{:.0}% complete",
                percent
            );
        }
    }
}
