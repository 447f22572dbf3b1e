/*!
Draws tracer particles from a Hernquist distribution function.

The controller places `n_walkers` walkers in a small box around the centre of the potential,
burns the ensemble in, resets it, and runs a thinned production phase whose flat chain
becomes the sample. Any [`EnsembleSampler`] can do the stepping; [`TracerSampler::run`]
uses the built-in [`AffineInvariantSampler`].

# Examples

```rust
use hernquist_tracers::config::SamplerConfig;
use hernquist_tracers::core::SilentReporter;
use hernquist_tracers::distributions::{DfVariant, Hernquist};
use hernquist_tracers::tracers::TracerSampler;

let config = SamplerConfig {
    n_walkers: 12,
    n_burnin: 100,
    thin: 5,
    ..SamplerConfig::default()
};
let halo = Hernquist::new(1e11, 10.0).unwrap();
let sample = TracerSampler::new(config)
    .with_seed(7)
    .run(48, &halo, DfVariant::Isotropic, &mut SilentReporter)
    .unwrap();

assert_eq!(sample.positions.dim(), (48, 3));
assert_eq!(sample.velocities.dim(), (48, 3));
```
*/

use ndarray::prelude::*;
use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::Uniform;

use crate::config::SamplerConfig;
use crate::core::{EnsembleSampler, LogReporter, Phase, ProgressReporter};
use crate::distributions::{DfVariant, Hernquist, HernquistDf, NDIM};
use crate::ensemble::{AffineInvariantSampler, StretchMove};
use crate::error::{Result, TracerError};
use crate::stats::RhatMulti;

/// Sampled tracers: row `i` of `positions` (kpc) and `velocities` (km/s) is one particle.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub positions: Array2<f64>,
    pub velocities: Array2<f64>,
}

impl SampleSet {
    /// Splits rows `[x, y, z, vx, vy, vz]` into positions and velocities.
    pub fn from_flatchain(flat: ArrayView2<f64>) -> Result<Self> {
        if flat.ncols() != NDIM {
            return Err(TracerError::Sampling(format!(
                "Expected {NDIM} phase-space columns, got {}",
                flat.ncols()
            )));
        }
        Ok(Self {
            positions: flat.slice(s![.., 0..3]).to_owned(),
            velocities: flat.slice(s![.., 3..NDIM]).to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.positions.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Galactocentric distance of every particle.
    pub fn radii(&self) -> Array1<f64> {
        row_norms(self.positions.view())
    }

    pub fn speeds(&self) -> Array1<f64> {
        row_norms(self.velocities.view())
    }

    /// Specific energy `½|v|² + Φ(r)` of every particle in `potential`.
    pub fn specific_energies(&self, potential: &Hernquist) -> Array1<f64> {
        self.radii()
            .iter()
            .zip(self.speeds().iter())
            .map(|(&r, &v)| 0.5 * v * v + potential.potential(r))
            .collect()
    }

    /// Magnitude of the specific angular momentum `|r × v|` of every particle.
    pub fn angular_momenta(&self) -> Array1<f64> {
        self.positions
            .outer_iter()
            .zip(self.velocities.outer_iter())
            .map(|(r, v)| {
                let lx = r[1] * v[2] - r[2] * v[1];
                let ly = r[2] * v[0] - r[0] * v[2];
                let lz = r[0] * v[1] - r[1] * v[0];
                (lx * lx + ly * ly + lz * lz).sqrt()
            })
            .collect()
    }

    /// Velocity anisotropy `β = 1 - <v_t²> / (2 <v_r²>)`: 0 for isotropic orbits, 1 for
    /// purely radial ones. NaN when no particle has a radial velocity.
    pub fn anisotropy(&self) -> f64 {
        let (mut radial, mut tangential) = (0.0, 0.0);
        for (r, v) in self.positions.outer_iter().zip(self.velocities.outer_iter()) {
            let dist = r.dot(&r).sqrt();
            if dist == 0.0 {
                continue;
            }
            let v_r = r.dot(&v) / dist;
            radial += v_r * v_r;
            tangential += v.dot(&v) - v_r * v_r;
        }
        if radial > 0.0 {
            1.0 - tangential / (2.0 * radial)
        } else {
            f64::NAN
        }
    }

    /// Fraction of particles with `E / (G M / a)` strictly inside `(-1, 0)`.
    pub fn bound_fraction(&self, potential: &Hernquist) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let depth = potential.gm() / potential.scale_radius();
        let bound = self
            .specific_energies(potential)
            .iter()
            .filter(|&&e| {
                let x = e / depth;
                -1.0 < x && x < 0.0
            })
            .count();
        bound as f64 / self.len() as f64
    }
}

fn row_norms(rows: ArrayView2<f64>) -> Array1<f64> {
    rows.map_axis(Axis(1), |row| row.dot(&row).sqrt())
}

/// Burn-in / reset / production controller.
#[derive(Debug, Clone, Default)]
pub struct TracerSampler {
    config: SamplerConfig,
    seed: Option<u64>,
}

impl TracerSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config, seed: None }
    }

    /// Makes the run reproducible. Without a seed one is drawn and logged.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Samples `n` tracers of `potential` under `variant` with the stretch-move sampler.
    ///
    /// The initial ensemble is drawn from the run seed and the sampler's own RNG from
    /// `seed + 1`.
    pub fn run(
        &self,
        n: usize,
        potential: &Hernquist,
        variant: DfVariant,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<SampleSet> {
        let stretch = StretchMove::new(self.config.stretch_scale)?;
        let seed = self.resolve_seed();
        let df = HernquistDf::new(*potential, variant);
        self.execute(
            n,
            df,
            seed,
            |df, n_walkers, n_dim| {
                Ok(AffineInvariantSampler::new(df, n_walkers, n_dim)?
                    .set_seed(seed.wrapping_add(1))
                    .with_stretch(stretch))
            },
            reporter,
        )
    }

    /// Like [`TracerSampler::run`], with the ensemble engine built by `make_sampler`
    /// from the DF, the walker count and the dimension.
    pub fn run_with<E, F>(
        &self,
        n: usize,
        df: HernquistDf,
        make_sampler: F,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<SampleSet>
    where
        E: EnsembleSampler,
        F: FnOnce(HernquistDf, usize, usize) -> Result<E>,
    {
        let seed = self.resolve_seed();
        self.execute(n, df, seed, make_sampler, reporter)
    }

    fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = thread_rng().gen::<u64>();
                tracing::info!(seed, "no seed given, drew one");
                seed
            }
        }
    }

    fn execute<E, F>(
        &self,
        n: usize,
        df: HernquistDf,
        seed: u64,
        make_sampler: F,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<SampleSet>
    where
        E: EnsembleSampler,
        F: FnOnce(HernquistDf, usize, usize) -> Result<E>,
    {
        let cfg = &self.config;
        cfg.validate()?;
        let n_walkers = cfg.n_walkers;
        if n == 0 || n % n_walkers != 0 {
            return Err(TracerError::PreconditionViolation { n, n_walkers });
        }

        let mut sampler = make_sampler(df, n_walkers, NDIM)?;
        if sampler.n_walkers() != n_walkers || sampler.n_dim() != NDIM {
            return Err(TracerError::Sampling(format!(
                "Sampler has {} walkers in {} dimensions, expected {n_walkers} in {NDIM}",
                sampler.n_walkers(),
                sampler.n_dim()
            )));
        }

        let mut rng = SmallRng::seed_from_u64(seed);
        let p0 = self.initial_ensemble(&df.potential, &mut rng);

        let start = if cfg.n_burnin > 0 {
            tracing::info!(
                seed,
                variant = %df.variant,
                n_walkers,
                n_burnin = cfg.n_burnin,
                "burning in"
            );
            run_phase(
                &mut sampler,
                Phase::BurnIn,
                p0.view(),
                cfg.n_burnin,
                1,
                cfg.burnin_interval(),
                reporter,
            )?;
            last_state(&sampler.chain()?)?
        } else {
            p0
        };
        sampler.reset();

        let n_iter = cfg.production_iterations(n);
        tracing::info!(n, n_iter, thin = cfg.thin, "taking final sample");
        run_phase(
            &mut sampler,
            Phase::Production,
            start.view(),
            n_iter,
            cfg.thin,
            (n_iter / 100).max(1),
            reporter,
        )?;

        let flat = sampler.flatchain()?;
        if flat.nrows() != n {
            return Err(TracerError::Sampling(format!(
                "Flat chain has {} rows, expected {n}",
                flat.nrows()
            )));
        }
        SampleSet::from_flatchain(flat.view())
    }

    /// Walkers uniform in the box `[-σ, σ]` per component, with `σ = 0.3 a` in position
    /// and `0.5 sqrt(G M / a) / sqrt(3)` in velocity for the default spreads.
    fn initial_ensemble(&self, potential: &Hernquist, rng: &mut SmallRng) -> Array2<f64> {
        let pos_sigma = self.config.position_spread * potential.scale_radius();
        let vel_sigma = self.config.velocity_spread * potential.velocity_scale() / 3f64.sqrt();
        let sigma = [
            pos_sigma, pos_sigma, pos_sigma, vel_sigma, vel_sigma, vel_sigma,
        ];
        let unit = Uniform::new(0.0, 1.0);
        let mut p0 = Array2::zeros((self.config.n_walkers, NDIM));
        for mut walker in p0.outer_iter_mut() {
            for (x, &s) in walker.iter_mut().zip(sigma.iter()) {
                *x = -s + 2.0 * s * unit.sample(rng);
            }
        }
        p0
    }
}

/// Advances `sampler` through one phase, tracking R-hat and reporting progress.
fn run_phase<E: EnsembleSampler>(
    sampler: &mut E,
    phase: Phase,
    initial: ArrayView2<f64>,
    iterations: usize,
    thin: usize,
    interval: usize,
    reporter: &mut dyn ProgressReporter,
) -> Result<()> {
    let mut rhat = RhatMulti::new(sampler.n_walkers(), sampler.n_dim());
    let mut tracking_error = None;

    reporter.begin(phase, iterations);
    sampler.advance(initial, iterations, thin, &mut |i, state| {
        reporter.report(i, iterations, interval);
        if let Err(e) = rhat.step(state) {
            tracking_error.get_or_insert(e);
        }
    })?;
    reporter.finish(phase);

    if let Some(e) = tracking_error {
        return Err(e);
    }

    let mean_acceptance = sampler.acceptance_fraction().mean().unwrap_or(0.0);
    let max_rhat = rhat.max().ok();
    tracing::info!(
        phase = phase.label(),
        mean_acceptance,
        max_rhat = ?max_rhat,
        "phase complete"
    );
    Ok(())
}

/// `chain[:, -1, :]`.
fn last_state(chain: &Array3<f64>) -> Result<Array2<f64>> {
    let n_stored = chain.len_of(Axis(1));
    if n_stored == 0 {
        return Err(TracerError::Sampling(
            "No states retained during burn-in".to_string(),
        ));
    }
    Ok(chain.index_axis(Axis(1), n_stored - 1).to_owned())
}

/// Samples `n` tracers with the default configuration, naming the DF by string.
///
/// The DF name is checked before anything else, so an unknown name fails fast with
/// [`TracerError::InvalidVariant`].
pub fn sample(
    n: usize,
    mass: f64,
    scale_radius: f64,
    df: &str,
    seed: Option<u64>,
) -> Result<SampleSet> {
    let variant: DfVariant = df.parse()?;
    let potential = Hernquist::new(mass, scale_radius)?;
    let mut sampler = TracerSampler::new(SamplerConfig::default());
    if let Some(seed) = seed {
        sampler = sampler.with_seed(seed);
    }
    sampler.run(n, &potential, variant, &mut LogReporter::default())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::core::SilentReporter;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        SetWalkers(Array2<f64>),
        Step,
        Record,
        Reset,
    }

    /// Moves every walker by +1 in every coordinate per step and logs what it is asked to do.
    struct Recorder {
        state: Array2<f64>,
        stored: Vec<Array2<f64>>,
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl EnsembleSampler for Recorder {
        fn n_walkers(&self) -> usize {
            self.state.nrows()
        }
        fn n_dim(&self) -> usize {
            self.state.ncols()
        }
        fn set_walkers(&mut self, positions: ArrayView2<f64>) -> Result<()> {
            self.state.assign(&positions);
            self.events
                .borrow_mut()
                .push(Event::SetWalkers(positions.to_owned()));
            Ok(())
        }
        fn step(&mut self) -> &Array2<f64> {
            self.state += 1.0;
            self.events.borrow_mut().push(Event::Step);
            &self.state
        }
        fn current_state(&self) -> &Array2<f64> {
            &self.state
        }
        fn record(&mut self) {
            self.stored.push(self.state.clone());
            self.events.borrow_mut().push(Event::Record);
        }
        fn reset(&mut self) {
            self.stored.clear();
            self.events.borrow_mut().push(Event::Reset);
        }
        fn chain(&self) -> Result<Array3<f64>> {
            let views: Vec<_> = self.stored.iter().map(|s| s.view()).collect();
            if views.is_empty() {
                return Ok(Array3::zeros((self.n_walkers(), 0, self.n_dim())));
            }
            ndarray::stack(Axis(1), &views).map_err(|e| TracerError::Sampling(e.to_string()))
        }
        fn acceptance_fraction(&self) -> Array1<f64> {
            Array1::from_elem(self.n_walkers(), 0.5)
        }
    }

    #[derive(Default)]
    struct CountingReporter {
        begun: Vec<(Phase, usize)>,
        finished: Vec<Phase>,
        reports: usize,
        intervals: Vec<usize>,
    }

    impl ProgressReporter for CountingReporter {
        fn begin(&mut self, phase: Phase, total: usize) {
            self.begun.push((phase, total));
        }
        fn report(&mut self, _current: usize, _total: usize, interval: usize) {
            self.reports += 1;
            if self.intervals.last() != Some(&interval) {
                self.intervals.push(interval);
            }
        }
        fn finish(&mut self, phase: Phase) {
            self.finished.push(phase);
        }
    }

    fn halo() -> Hernquist {
        Hernquist::new(1e11, 10.0).unwrap()
    }

    fn small_config() -> SamplerConfig {
        SamplerConfig {
            n_walkers: 12,
            n_burnin: 100,
            thin: 4,
            ..SamplerConfig::default()
        }
    }

    fn run_recorded(
        config: SamplerConfig,
        n: usize,
        reporter: &mut dyn ProgressReporter,
    ) -> (Result<SampleSet>, Vec<Event>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        let df = HernquistDf::new(halo(), DfVariant::Isotropic);
        let result = TracerSampler::new(config).with_seed(3).run_with(
            n,
            df,
            move |_, n_walkers, n_dim| {
                Ok(Recorder {
                    state: Array2::zeros((n_walkers, n_dim)),
                    stored: Vec::new(),
                    events: log,
                })
            },
            reporter,
        );
        let events = events.borrow().clone();
        (result, events)
    }

    #[test]
    fn controller_runs_burn_in_reset_then_production() {
        let config = small_config();
        let n = 36;
        let mut reporter = CountingReporter::default();
        let (result, events) = run_recorded(config.clone(), n, &mut reporter);
        let sample = result.unwrap();

        let set_at: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::SetWalkers(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set_at.len(), 2);
        let reset_at: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == Event::Reset)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reset_at.len(), 1);
        assert!(set_at[0] < reset_at[0] && reset_at[0] < set_at[1]);

        let count = |range: &[Event], wanted: &Event| range.iter().filter(|e| *e == wanted).count();
        let burn_in = &events[set_at[0]..reset_at[0]];
        assert_eq!(count(burn_in, &Event::Step), config.n_burnin);
        assert_eq!(count(burn_in, &Event::Record), config.n_burnin);

        let production = &events[set_at[1]..];
        let n_iter = n / config.n_walkers * config.thin;
        assert_eq!(count(production, &Event::Step), n_iter);
        assert_eq!(count(production, &Event::Record), n / config.n_walkers);

        // Production starts where burn-in ended: p0 moved by n_burnin unit steps.
        let (Event::SetWalkers(p0), Event::SetWalkers(p1)) = (&events[set_at[0]], &events[set_at[1]])
        else {
            unreachable!()
        };
        assert_abs_diff_eq!(*p1, p0 + config.n_burnin as f64, epsilon = 1e-9);

        assert_eq!(sample.len(), n);
        assert_eq!(
            reporter.begun,
            vec![(Phase::BurnIn, config.n_burnin), (Phase::Production, n_iter)]
        );
        assert_eq!(reporter.finished, vec![Phase::BurnIn, Phase::Production]);
        assert_eq!(reporter.reports, config.n_burnin + n_iter);
        assert_eq!(reporter.intervals, vec![2, 1]);
    }

    #[test]
    fn flat_chain_is_split_walker_major() {
        let config = small_config();
        let (result, events) = run_recorded(config.clone(), 24, &mut SilentReporter);
        let sample = result.unwrap();
        let Some(Event::SetWalkers(start)) = events
            .iter()
            .filter(|e| matches!(e, Event::SetWalkers(_)))
            .nth(1)
        else {
            panic!("production never started");
        };
        // Walker 0 keeps iterations 0 and 4 of production, then walker 1 follows.
        assert_abs_diff_eq!(sample.positions[[0, 0]], start[[0, 0]] + 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.positions[[1, 0]], start[[0, 0]] + 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.velocities[[2, 2]], start[[1, 5]] + 1.0, epsilon = 1e-9);
    }

    #[test]
    fn initial_ensemble_fills_the_box() {
        let (_, events) = run_recorded(small_config(), 12, &mut SilentReporter);
        let Some(Event::SetWalkers(p0)) = events.first() else {
            panic!("no initial ensemble");
        };
        let pos_sigma = 0.3 * 10.0;
        let vel_sigma = 0.5 * halo().velocity_scale() / 3f64.sqrt();
        assert!(p0.slice(s![.., 0..3]).iter().all(|x| x.abs() <= pos_sigma));
        assert!(p0.slice(s![.., 3..6]).iter().all(|v| v.abs() <= vel_sigma));
        assert!(p0.iter().any(|x| *x < 0.0) && p0.iter().any(|x| *x > 0.0));
    }

    #[test]
    fn skips_burn_in_when_disabled() {
        let config = SamplerConfig {
            n_burnin: 0,
            ..small_config()
        };
        let (result, events) = run_recorded(config, 12, &mut SilentReporter);
        assert_eq!(result.unwrap().len(), 12);
        // Reset still separates the (empty) burn-in from production.
        assert_eq!(events[0], Event::Reset);
        assert!(matches!(events[1], Event::SetWalkers(_)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::SetWalkers(_)))
                .count(),
            1
        );
    }

    #[test]
    fn rejects_sizes_that_are_not_walker_multiples() {
        for n in [0, 13, 1001] {
            let (result, events) = run_recorded(small_config(), n, &mut SilentReporter);
            assert!(matches!(
                result,
                Err(TracerError::PreconditionViolation { n_walkers: 12, .. })
            ));
            assert!(events.is_empty(), "no sampler work before the check");
        }
    }

    #[test]
    fn rejects_a_mis_sized_sampler() {
        let df = HernquistDf::new(halo(), DfVariant::Isotropic);
        let res = TracerSampler::new(small_config()).run_with(
            24,
            df,
            |_, _, n_dim| {
                Ok(Recorder {
                    state: Array2::zeros((10, n_dim)),
                    stored: Vec::new(),
                    events: Rc::default(),
                })
            },
            &mut SilentReporter,
        );
        assert!(matches!(res, Err(TracerError::Sampling(_))));
    }

    #[test]
    fn string_entry_point_checks_the_variant_first() {
        // An invalid potential would also fail; the variant is reported.
        let res = sample(1001, -1.0, 10.0, "maxwellian", Some(1));
        assert!(matches!(res, Err(TracerError::InvalidVariant(ref s)) if s == "maxwellian"));
        let res = sample(1001, 1e11, 10.0, "isotropic", Some(1));
        assert!(matches!(
            res,
            Err(TracerError::PreconditionViolation { n: 1001, n_walkers: 50 })
        ));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = |seed| {
            TracerSampler::new(small_config())
                .with_seed(seed)
                .run(24, &halo(), DfVariant::Anisotropic, &mut SilentReporter)
                .unwrap()
        };
        let a = run(11);
        assert_eq!(a, run(11));
        assert_ne!(a, run(12));
    }

    #[test]
    fn anisotropy_of_radial_and_tangential_orbits() {
        let radial = SampleSet {
            positions: array![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            velocities: array![[3.0, 0.0, 0.0], [0.0, -1.0, 0.0]],
        };
        assert_eq!(radial.anisotropy(), 1.0);

        // Equal radial and per-axis tangential dispersion.
        let isotropic = SampleSet {
            positions: array![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            velocities: array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        };
        assert_abs_diff_eq!(isotropic.anisotropy(), 0.0, epsilon = 1e-12);

        let circular = SampleSet {
            positions: array![[1.0, 0.0, 0.0]],
            velocities: array![[0.0, 1.0, 0.0]],
        };
        assert!(circular.anisotropy().is_nan());
    }

    #[test]
    fn config_is_kept() {
        assert_eq!(TracerSampler::default().config(), &SamplerConfig::default());
        let sampler = TracerSampler::new(small_config()).with_seed(1);
        assert_eq!(sampler.config().n_walkers, 12);
    }

    #[test]
    fn sample_set_helpers() {
        let set = SampleSet::from_flatchain(
            array![
                [3.0, 4.0, 0.0, 0.0, 0.0, 2.0],
                [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ]
            .view(),
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
        assert_eq!(set.radii(), array![5.0, 1.0]);
        assert_eq!(set.speeds(), array![2.0, 1.0]);
        assert_abs_diff_eq!(set.angular_momenta(), array![10.0, 1.0], epsilon = 1e-12);

        let h = halo();
        let energies = set.specific_energies(&h);
        assert_abs_diff_eq!(energies[0], 2.0 + h.potential(5.0), epsilon = 1e-9);
        assert_eq!(set.bound_fraction(&h), 1.0);

        assert!(SampleSet::from_flatchain(Array2::<f64>::zeros((2, 4)).view()).is_err());
    }
}
