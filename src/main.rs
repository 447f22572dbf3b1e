//! hernquist-tracers CLI - sample tracer initial conditions for every population in a run file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hernquist_tracers::config::{Population, RunConfig, EXAMPLE_RUN_FILE};
use hernquist_tracers::core::{LogReporter, ProgressBarReporter, ProgressReporter};
use hernquist_tracers::ks_test::one_sample_ks_test;
use hernquist_tracers::stats::median;
use hernquist_tracers::{SampleSet, TracerSampler};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "hernquist-tracers")]
#[command(version)]
#[command(about = "Sample tracer positions and velocities from Hernquist distribution functions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample every population in the run file and write one CSV per population
    Sample {
        /// Path to the run file
        #[arg(short, long, default_value = "run.toml")]
        config: PathBuf,

        /// Output directory, overriding [output].dir
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Seed, overriding the run file's
        #[arg(long)]
        seed: Option<u64>,

        /// Log progress instead of drawing progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Validate a run file
    Validate {
        /// Path to the run file
        #[arg(short, long, default_value = "run.toml")]
        config: PathBuf,
    },

    /// Show an example run file
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn load(path: &Path) -> Result<(RunConfig, Vec<Population>)> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("Failed to load run file from {:?}", path))?;
    let populations = config
        .populations()
        .with_context(|| format!("Invalid run file {:?}", path))?;
    Ok((config, populations))
}

fn summarize(pop: &Population, set: &SampleSet) {
    let mut radii = set.radii().to_vec();
    let median_radius = median(&radii).unwrap_or(f64::NAN);
    info!(
        population = %pop.name,
        median_radius,
        half_mass_radius = pop.potential.half_mass_radius(),
        bound_fraction = set.bound_fraction(&pop.potential),
        anisotropy = set.anisotropy(),
        "sample summary"
    );
    match one_sample_ks_test(&mut radii, |r| pop.potential.radial_cdf(r), 0.01) {
        Ok(ks) if ks.is_rejected => warn!(
            population = %pop.name,
            statistic = ks.statistic,
            p_value = ks.p_value,
            "radii deviate from the Hernquist profile; consider a longer burn-in"
        ),
        Ok(ks) => info!(
            population = %pop.name,
            statistic = ks.statistic,
            p_value = ks.p_value,
            "radii consistent with the Hernquist profile"
        ),
        Err(e) => warn!(population = %pop.name, "KS check skipped: {e}"),
    }
}

#[cfg(feature = "csv")]
fn write(set: &SampleSet, out_dir: &Path, name: &str) -> Result<()> {
    let path = out_dir.join(format!("{name}.csv"));
    hernquist_tracers::io::csv::save_sample_set(set, &path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Wrote {} tracers to {:?}", set.len(), path);
    Ok(())
}

#[cfg(not(feature = "csv"))]
fn write(_set: &SampleSet, _out_dir: &Path, name: &str) -> Result<()> {
    warn!("Built without the csv feature; population '{name}' not written");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            println!("{EXAMPLE_RUN_FILE}");
        }

        Commands::Validate { config } => {
            let (run, populations) = load(&config)?;
            info!("Run file is valid");
            info!(
                "  Potential: M = {:e} M_sun, a = {} kpc",
                run.potential.mass, run.potential.scale_radius
            );
            info!(
                "  Sampler: {} walkers, {} burn-in iterations, thin {}",
                run.sampler.n_walkers, run.sampler.n_burnin, run.sampler.thin
            );
            for pop in &populations {
                info!("  Population '{}': {} tracers, {} DF", pop.name, pop.n, pop.variant);
            }
        }

        Commands::Sample {
            config,
            out_dir,
            seed,
            quiet,
        } => {
            let (run, populations) = load(&config)?;
            let out_dir = out_dir.unwrap_or_else(|| run.output.dir.clone());
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

            for (i, pop) in populations.iter().enumerate() {
                let mut sampler = TracerSampler::new(run.sampler.clone());
                let pop_seed = seed
                    .map(|s| s.wrapping_add(i as u64))
                    .or_else(|| run.population_seed(i));
                if let Some(s) = pop_seed {
                    sampler = sampler.with_seed(s);
                }

                let mut reporter: Box<dyn ProgressReporter> = if quiet {
                    Box::new(LogReporter::default())
                } else {
                    Box::new(ProgressBarReporter::new())
                };

                info!(
                    "Sampling population '{}': {} tracers, {} DF",
                    pop.name, pop.n, pop.variant
                );
                let set = sampler
                    .run(pop.n, &pop.potential, pop.variant, reporter.as_mut())
                    .with_context(|| format!("Sampling population '{}' failed", pop.name))?;

                summarize(pop, &set);
                write(&set, &out_dir, &pop.name)?;
            }
        }
    }

    Ok(())
}
