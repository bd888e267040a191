//! Experiment Runner for Spectral Density Estimation.
//!
//! This executable runs stochastic Lanczos quadrature on either a synthetic diagonal operator
//! with a known spectrum or a sparse symmetric matrix read from a triplet file, and writes
//! the estimated density curve as CSV. For synthetic operators the exact trace is logged
//! next to the SLQ trace estimate.

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use slq_spectrum::{
    Oracle, SlqEstimator,
    config::{DensityConfig, GridSpec, LanczosConfig, SeedSequence, SlqConfig},
    density::{Bandwidth, Normalization},
    utils::{data_loader::load_symmetric_triplets, perf, scenarios::Scenario},
};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

/// Scaling of the written curve.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum NormalizationArg {
    /// The curve integrates to one.
    Unit,
    /// The curve integrates to the dimension n.
    SpectralMass,
    /// The plain average of the smoothed quadrature rules.
    Raw,
}

impl From<NormalizationArg> for Normalization {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::Unit => Normalization::Unit,
            NormalizationArg::SpectralMass => Normalization::SpectralMass,
            NormalizationArg::Raw => Normalization::Raw,
        }
    }
}

/// Command-line arguments for the density runner.
#[derive(Parser, Debug)]
#[clap(
    name = "density-runner",
    about = "Estimates the spectral density of a symmetric operator with stochastic Lanczos quadrature."
)]
struct DensityArgs {
    /// Synthetic spectrum to analyse. Ignored when --matrix is given.
    #[clap(long, value_enum, default_value_t = Scenario::HessianLike)]
    scenario: Scenario,
    /// Triplet file of a sparse symmetric matrix.
    #[clap(long, value_name = "PATH")]
    matrix: Option<PathBuf>,
    /// Dimension of the synthetic operator.
    #[clap(long, default_value_t = 2000)]
    n: usize,
    /// Number of Lanczos steps per run.
    #[clap(long, default_value_t = 90)]
    order: usize,
    /// Number of independent probe runs.
    #[clap(long, default_value_t = 10)]
    runs: usize,
    /// Seed of the first run; run k uses seed + k.
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Number of grid points.
    #[clap(long, default_value_t = 10000)]
    grid_len: usize,
    /// Lower end of a fixed grid. Requires --grid-max.
    #[clap(long, requires = "grid_max", allow_hyphen_values = true)]
    grid_min: Option<f64>,
    /// Upper end of a fixed grid. Requires --grid-min.
    #[clap(long, requires = "grid_min", allow_hyphen_values = true)]
    grid_max: Option<f64>,
    /// Fixed Gaussian bandwidth. By default sigma^2 = 1e-5 * max(1, Ritz range width).
    #[clap(long)]
    sigma: Option<f64>,
    #[clap(long, value_enum, default_value_t = NormalizationArg::Unit)]
    normalization: NormalizationArg,
    /// Run the probes one after the other instead of on the thread pool.
    #[clap(long)]
    sequential: bool,
    /// Path to the output CSV file where the density curve will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// A single point of the density curve.
#[derive(Debug, Serialize)]
struct DensityPoint {
    x: f64,
    density: f64,
}

fn build_config(args: &DensityArgs) -> SlqConfig {
    let grid = match (args.grid_min, args.grid_max) {
        (Some(min), Some(max)) => GridSpec::Fixed {
            min,
            max,
            len: args.grid_len,
        },
        _ => GridSpec::Auto {
            len: args.grid_len,
            margin: 0.01,
        },
    };
    let bandwidth = args
        .sigma
        .map(|sigma| Bandwidth::Fixed { sigma })
        .unwrap_or_default();
    SlqConfig {
        lanczos: LanczosConfig::with_order(args.order),
        density: DensityConfig {
            grid,
            bandwidth,
            normalization: args.normalization.into(),
        },
        num_runs: args.runs,
        seeds: SeedSequence::from_base(args.seed),
        parallel: !args.sequential,
        skip_failed_runs: false,
    }
}

/// Runs the estimate and writes the curve, returning the SLQ trace estimate.
fn run_estimate<O: Oracle + Sync>(oracle: &O, args: &DensityArgs) -> Result<f64> {
    let config = build_config(args);
    let total = config.num_runs;
    let done = AtomicUsize::new(0);
    let mut estimator =
        SlqEstimator::new(oracle.dim(), config)?.with_progress(move |report| {
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(step) = report.breakdown {
                log::info!(
                    "Run {} broke down at step {step}; the tridiagonal matrix is exact.",
                    report.run
                );
            }
            log::info!("Completed {finished}/{total} runs.");
        });

    let start = Instant::now();
    let estimate = estimator.run(oracle)?;
    log::info!(
        "Averaged {} runs in {:.3}s with sigma = {:.4e}.",
        estimate.num_runs,
        start.elapsed().as_secs_f64(),
        estimate.sigma
    );
    if let Some((lo, hi)) = estimator.spectral_range() {
        log::info!("Ritz values span [{lo:.6e}, {hi:.6e}].");
    }

    let mut writer = csv::Writer::from_path(&args.output)?;
    for (&x, &density) in estimate.grid.iter().zip(&estimate.density) {
        writer.serialize(DensityPoint { x, density })?;
    }
    writer.flush()?;

    match estimator.trace_estimate() {
        Some(trace) => Ok(trace),
        None => bail!("no completed runs to estimate the trace from"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = DensityArgs::parse();

    if let Some(path) = &args.matrix {
        log::info!("Loading matrix from {:?}...", path);
        let a = load_symmetric_triplets(path)?;
        log::info!(
            "Loaded {}x{} matrix with {} stored entries.",
            a.nrows(),
            a.ncols(),
            a.triplet_iter().count()
        );
        let trace = run_estimate(&a, &args)?;
        log::info!("SLQ trace estimate: {trace:.6e}.");
    } else {
        log::info!("Building {:?} scenario with n = {}.", args.scenario, args.n);
        let op = args.scenario.operator(args.n, args.seed);
        let trace = run_estimate(&op, &args)?;
        log::info!("SLQ trace estimate: {trace:.6e} (exact {:.6e}).", op.trace());
    }

    log::info!(
        "Density written to {:?}. Peak memory: {} KB.",
        &args.output,
        perf::get_peak_rss_kb()
    );
    Ok(())
}
