//! Experiment Runner for the Convergence of the Run Average.
//!
//! This executable measures how the variance of the density estimate decreases with the
//! number of averaged probe runs. For each run count it repeats the whole estimate over
//! independent seed blocks and records, on a fixed grid with a fixed bandwidth, the spread of
//! the density at a chosen point and the mean L1 distance to the exactly smoothed spectrum of
//! a synthetic operator.

use anyhow::{Result, ensure};
use clap::Parser;
use slq_spectrum::{
    config::{DensityConfig, GridSpec, SeedSequence},
    density::{Bandwidth, Normalization, gaussian_kernel, trapezoid},
    estimate_density,
    utils::scenarios::Scenario,
};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the convergence runner.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Measures the variance of SLQ density estimates as the number of runs grows."
)]
struct ConvergenceArgs {
    /// The synthetic spectrum to analyse.
    #[clap(long, value_enum)]
    scenario: Scenario,
    /// Dimension of the test operator.
    #[clap(long, default_value_t = 1000)]
    n: usize,
    /// Number of Lanczos steps per run.
    #[clap(long, default_value_t = 60)]
    order: usize,
    /// Largest number of runs; the runner doubles from 1 up to this value.
    #[clap(long, default_value_t = 64)]
    max_runs: usize,
    /// Independent repetitions per run count.
    #[clap(long, default_value_t = 30)]
    trials: usize,
    /// Gaussian bandwidth.
    #[clap(long, default_value_t = 0.05)]
    sigma: f64,
    /// Point at which the density variance is recorded.
    #[clap(long, default_value_t = 0.0, allow_hyphen_values = true)]
    probe_point: f64,
    /// Number of grid points.
    #[clap(long, default_value_t = 2001)]
    grid_len: usize,
    /// Base seed of the experiment.
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data in the output CSV file.
#[derive(Debug, Serialize)]
struct ConvergenceResult {
    num_runs: usize,
    trials: usize,
    /// Mean over trials of the density at the probe point.
    mean_at_point: f64,
    /// Unbiased variance over trials of the density at the probe point.
    variance_at_point: f64,
    /// Mean over trials of the L1 distance to the exactly smoothed spectrum.
    mean_l1_error: f64,
}

/// The exact eigenvalue distribution smoothed with the same kernel, `(1/n) Σ_j N(x - λ_j; σ)`.
fn exact_density(eigenvalues: &[f64], grid: &[f64], sigma: f64) -> Vec<f64> {
    let n = eigenvalues.len() as f64;
    grid.iter()
        .map(|&x| {
            eigenvalues
                .iter()
                .map(|&lambda| gaussian_kernel(x - lambda, sigma))
                .sum::<f64>()
                / n
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = ConvergenceArgs::parse();
    ensure!(args.trials >= 2, "at least two trials are needed for a variance");

    let op = args.scenario.operator(args.n, args.seed);
    let (lo, hi) = op
        .eigenvalues()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &e| {
            (lo.min(e), hi.max(e))
        });
    let pad = 5.0 * args.sigma;
    let density_config = DensityConfig {
        grid: GridSpec::Fixed {
            min: lo.min(args.probe_point) - pad,
            max: hi.max(args.probe_point) + pad,
            len: args.grid_len,
        },
        bandwidth: Bandwidth::Fixed { sigma: args.sigma },
        normalization: Normalization::Raw,
    };
    log::info!(
        "Convergence analysis on {:?} (n = {}, order = {}, sigma = {}).",
        args.scenario,
        args.n,
        args.order,
        args.sigma
    );

    let mut writer = csv::Writer::from_path(&args.output)?;
    let mut exact: Option<Vec<f64>> = None;

    let run_counts = std::iter::successors(Some(1usize), |&r| r.checked_mul(2))
        .take_while(|&r| r <= args.max_runs);
    for num_runs in run_counts {
        let mut at_point = Vec::with_capacity(args.trials);
        let mut l1_errors = Vec::with_capacity(args.trials);

        for trial in 0..args.trials {
            // Each trial owns a disjoint block of seeds.
            let seeds = SeedSequence::Arithmetic {
                base: args.seed.wrapping_add((trial as u64) << 32),
                stride: 1,
            };
            let estimate = estimate_density(
                &op,
                args.n,
                args.order,
                num_runs,
                seeds,
                density_config.clone(),
            )?;
            let reference = exact
                .get_or_insert_with(|| exact_density(op.eigenvalues(), &estimate.grid, args.sigma));

            let idx = estimate
                .grid
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    (a.1 - args.probe_point)
                        .abs()
                        .total_cmp(&(b.1 - args.probe_point).abs())
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            at_point.push(estimate.density[idx]);

            let abs_diff: Vec<f64> = estimate
                .density
                .iter()
                .zip(reference.iter())
                .map(|(a, b)| (a - b).abs())
                .collect();
            l1_errors.push(trapezoid(&estimate.grid, &abs_diff));
        }

        let trials = args.trials as f64;
        let mean_at_point = at_point.iter().sum::<f64>() / trials;
        let variance_at_point = at_point
            .iter()
            .map(|v| (v - mean_at_point).powi(2))
            .sum::<f64>()
            / (trials - 1.0);
        let mean_l1_error = l1_errors.iter().sum::<f64>() / trials;
        log::info!(
            "R = {num_runs}: variance at {} = {variance_at_point:.4e}, L1 error = {mean_l1_error:.4e}.",
            args.probe_point
        );

        writer.serialize(ConvergenceResult {
            num_runs,
            trials: args.trials,
            mean_at_point,
            variance_at_point,
            mean_l1_error,
        })?;
    }

    writer.flush()?;
    log::info!(
        "Convergence analysis complete. Results saved to {:?}.",
        &args.output
    );
    Ok(())
}
