//! Integration test suite for the aggregation of independent Lanczos runs.
//!
//! # Test Methodology
//!
//! The averaged density is a Monte Carlo estimate, so its properties are checked
//! statistically where they are random and exactly where they are not:
//! 1.  **Variance:** averaging `R` runs divides the variance at a grid point by `R`.
//! 2.  **Determinism:** the estimate depends only on the seeds, not on the order in which
//!     the runs finished, the thread pool, or how the runs were split into batches.
//! 3.  **Failure handling:** oracle failures and cancellations either abort the batch and
//!     leave the estimator untouched, or are recorded and skipped when so configured.
//! 4.  **Normalization and mass:** the curve integrates to the requested total and places
//!     the mass of each eigenvalue cluster where it belongs.

use anyhow::{Result, ensure};
use faer::{Col, ColRef};
use slq_spectrum::{
    DensityEstimate, SlqErrorKind, SlqEstimator, estimate_density,
    algorithms::CancelToken,
    config::{DensityConfig, GridSpec, LanczosConfig, SeedSequence, SlqConfig},
    density::{Bandwidth, Normalization, trapezoid},
    operator::{DiagonalOperator, FnOracle, Oracle},
    utils::scenarios::Scenario,
};
use std::convert::Infallible;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

#[derive(Debug, thiserror::Error)]
#[error("simulated oracle failure on call {0}")]
struct SimulatedFailure(usize);

fn fixed_density(min: f64, max: f64, len: usize, sigma: f64) -> DensityConfig {
    DensityConfig {
        grid: GridSpec::Fixed { min, max, len },
        bandwidth: Bandwidth::Fixed { sigma },
        normalization: Normalization::Raw,
    }
}

fn slq_config(order: usize, num_runs: usize, density: DensityConfig) -> SlqConfig {
    SlqConfig {
        lanczos: LanczosConfig::with_order(order),
        density,
        num_runs,
        ..SlqConfig::default()
    }
}

fn sample_variance(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

#[test]
fn test_variance_decreases_with_number_of_runs() -> Result<()> {
    let n = 400;
    let op = Scenario::Uniform.operator(n, 0);
    let density = fixed_density(-1.5, 1.5, 301, 0.1);
    let probe = 150; // x = 0
    let trials = 40;

    let mut single = Vec::with_capacity(trials);
    let mut averaged = Vec::with_capacity(trials);
    for t in 0..trials as u64 {
        let one = estimate_density(&op, n, 20, 1, SeedSequence::from_base(t), density.clone())?;
        single.push(one.density[probe]);

        let sixteen = estimate_density(
            &op,
            n,
            20,
            16,
            SeedSequence::from_base(10_000 + 16 * t),
            density.clone(),
        )?;
        averaged.push(sixteen.density[probe]);
    }

    let ratio = sample_variance(&single) / sample_variance(&averaged);
    ensure!(
        (4.0..=64.0).contains(&ratio),
        "variance ratio between 1 and 16 runs is {ratio:.2}, expected about 16"
    );
    Ok(())
}

#[test]
fn test_incremental_extension_matches_single_batch() -> Result<()> {
    let n = 150;
    let op = Scenario::HessianLike.operator(n, 2);
    for grid in [
        GridSpec::Fixed {
            min: -1.0,
            max: 25.0,
            len: 500,
        },
        GridSpec::Auto {
            len: 500,
            margin: 0.1,
        },
    ] {
        let density = DensityConfig {
            grid,
            ..DensityConfig::default()
        };

        let mut batch = SlqEstimator::new(n, slq_config(25, 10, density.clone()))?;
        let expected = batch.run(&op)?;

        let mut incremental = SlqEstimator::new(n, slq_config(25, 4, density))?;
        incremental.run(&op)?;
        let actual = incremental.extend(&op, 6)?;

        ensure!(actual.num_runs == 10);
        ensure!(actual.grid.len() == expected.grid.len());
        for (a, b) in actual.grid.iter().zip(&expected.grid) {
            ensure!((a - b).abs() < 1e-12, "grids differ: {a} vs {b}");
        }
        for (a, b) in actual.density.iter().zip(&expected.density) {
            ensure!(
                (a - b).abs() <= 1e-12 * b.abs().max(1.0),
                "densities differ: {a} vs {b}"
            );
        }
        ensure!(incremental.trace_estimate() == batch.trace_estimate());
    }
    Ok(())
}

/// Runs sequential batches of the given sizes on `op`; every run after the fourth sees `10 op`.
fn run_amplified_after_fourth(
    op: &DiagonalOperator,
    batches: &[usize],
) -> Result<Vec<DensityEstimate>> {
    let amplified = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&amplified);
    let oracle = FnOracle::new(op.dim(), |v: ColRef<'_, f64>| {
        let scale = if amplified.load(Ordering::SeqCst) { 10.0 } else { 1.0 };
        Ok::<_, Infallible>(Col::from_fn(v.nrows(), |i| scale * op.eigenvalues()[i] * v[i]))
    });

    let density = DensityConfig {
        grid: GridSpec::Auto {
            len: 400,
            margin: 0.1,
        },
        ..DensityConfig::default()
    };
    let mut config = slq_config(20, batches[0], density);
    config.parallel = false;
    let mut estimator = SlqEstimator::new(op.dim(), config)?.with_progress(move |report| {
        if report.run == 3 {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let mut estimates = vec![estimator.run(&oracle)?];
    for &extra in &batches[1..] {
        estimates.push(estimator.extend(&oracle, extra)?);
    }
    Ok(estimates)
}

#[test]
fn test_widening_batch_rebuilds_grid_like_single_batch() -> Result<()> {
    let op = Scenario::HessianLike.operator(120, 3);
    let incremental = run_amplified_after_fourth(&op, &[4, 6])?;
    let single = run_amplified_after_fourth(&op, &[10])?;

    let first_max = incremental[0].grid[incremental[0].grid.len() - 1];
    let (actual, expected) = (&incremental[1], &single[0]);
    let final_max = actual.grid[actual.grid.len() - 1];
    // The largest eigenvalue is 20 before the switch and 200 after it.
    ensure!(
        final_max > 2.0 * first_max,
        "second batch did not widen the grid: {first_max} -> {final_max}"
    );
    ensure!(actual.num_runs == 10);
    ensure!(
        actual == expected,
        "incremental estimate differs from the single batch after a grid rebuild"
    );
    Ok(())
}

#[test]
fn test_parallel_and_sequential_runs_agree() -> Result<()> {
    let n = 200;
    let op = Scenario::Clustered.operator(n, 0);
    let mut parallel = slq_config(30, 12, fixed_density(-2.0, 4.0, 601, 0.05));
    let mut sequential = parallel.clone();
    parallel.parallel = true;
    sequential.parallel = false;

    let a = SlqEstimator::new(n, parallel)?.run(&op)?;
    let b = SlqEstimator::new(n, sequential)?.run(&op)?;
    ensure!(a == b, "parallel and sequential estimates differ");
    Ok(())
}

#[test]
fn test_failed_run_aborts_batch_without_changing_state() -> Result<()> {
    let n = 30;
    let inner = DiagonalOperator::new((1..=n).map(|i| i as f64).collect());
    let calls = AtomicUsize::new(0);
    let fail_on = AtomicUsize::new(usize::MAX);
    let flaky = FnOracle::new(n, |v: ColRef<'_, f64>| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        if call == fail_on.load(Ordering::SeqCst) {
            return Err(SimulatedFailure(call));
        }
        Ok(Col::from_fn(v.nrows(), |i| inner.eigenvalues()[i] * v[i]))
    });

    let mut config = slq_config(5, 2, fixed_density(0.0, 31.0, 311, 0.5));
    config.parallel = false;
    let mut estimator = SlqEstimator::new(n, config)?;
    let before = estimator.run(&flaky)?;

    // Second run of the next batch, third step.
    fail_on.store(calls.load(Ordering::SeqCst) + 5 + 2, Ordering::SeqCst);
    let err = match estimator.extend(&flaky, 3) {
        Ok(_) => anyhow::bail!("the failing batch was accepted"),
        Err(err) => err,
    };
    match err.kind() {
        SlqErrorKind::OracleFailure { step, source } => {
            ensure!(*step == 2, "failure reported at step {step}");
            ensure!(source.downcast_ref::<SimulatedFailure>().is_some());
        }
        other => anyhow::bail!("unexpected error kind: {other:?}"),
    }
    ensure!(err.failed_step() == Some(2));

    ensure!(estimator.completed_runs() == 2);
    ensure!(estimator.reports().len() == 2);
    ensure!(estimator.estimate()? == before);

    // The failed batch did not consume its seeds.
    fail_on.store(usize::MAX, Ordering::SeqCst);
    estimator.extend(&flaky, 1)?;
    ensure!(estimator.reports()[2].seed == 2);
    Ok(())
}

#[test]
fn test_skip_failed_runs_records_failures() -> Result<()> {
    let n = 25;
    let calls = AtomicUsize::new(0);
    // The first product fails and aborts run 0; later runs see a diagonal operator.
    let order = 4;
    let flaky = FnOracle::new(n, |v: ColRef<'_, f64>| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            return Err(SimulatedFailure(call));
        }
        Ok(Col::from_fn(v.nrows(), |i| (i + 1) as f64 * v[i]))
    });

    let mut config = slq_config(order, 5, fixed_density(0.0, 26.0, 261, 0.5));
    config.parallel = false;
    config.skip_failed_runs = true;
    let mut estimator = SlqEstimator::new(n, config)?;
    let estimate = estimator.run(&flaky)?;

    ensure!(estimate.num_runs == 4);
    ensure!(estimator.completed_runs() == 4);
    ensure!(estimator.reports().len() == 5);
    let failed = &estimator.reports()[0];
    ensure!(failed.steps == 0);
    ensure!(
        failed
            .failure
            .as_deref()
            .is_some_and(|msg| msg.contains("simulated oracle failure")),
        "failure message was {:?}",
        failed.failure
    );
    ensure!(estimator.reports()[1..].iter().all(|r| r.failure.is_none()));
    Ok(())
}

#[test]
fn test_all_runs_failing_is_an_error() -> Result<()> {
    let n = 10;
    let broken = FnOracle::new(n, |_: ColRef<'_, f64>| -> Result<Col<f64>, SimulatedFailure> {
        Err(SimulatedFailure(0))
    });
    let mut config = slq_config(3, 4, DensityConfig::default());
    config.skip_failed_runs = true;
    let mut estimator = SlqEstimator::new(n, config)?;
    let err = match estimator.run(&broken) {
        Ok(_) => anyhow::bail!("an estimate was produced without any successful run"),
        Err(err) => err,
    };
    ensure!(
        matches!(err.kind(), SlqErrorKind::NoSuccessfulRuns { attempted: 4 }),
        "unexpected error: {err}"
    );
    ensure!(estimator.reports().len() == 4);
    Ok(())
}

#[test]
fn test_non_finite_products_are_reported() -> Result<()> {
    let n = 10;
    let poisoned = FnOracle::new(n, |v: ColRef<'_, f64>| {
        Ok::<_, std::convert::Infallible>(Col::from_fn(v.nrows(), |i| {
            if i == 3 { f64::NAN } else { v[i] }
        }))
    });
    let mut estimator = SlqEstimator::new(n, slq_config(4, 2, DensityConfig::default()))?;
    let err = match estimator.run(&poisoned) {
        Ok(_) => anyhow::bail!("NaN products were accepted"),
        Err(err) => err,
    };
    ensure!(
        matches!(err.kind(), SlqErrorKind::NonFiniteValue { step: 0, .. }),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_cancellation_leaves_estimate_unchanged() -> Result<()> {
    let n = 80;
    let op = Scenario::Uniform.operator(n, 0);
    let token = CancelToken::new();
    let config = slq_config(10, 3, fixed_density(-1.5, 1.5, 301, 0.1));
    let mut estimator = SlqEstimator::new(n, config)?.with_cancel_token(token.clone());
    let before = estimator.run(&op)?;

    token.cancel();
    let err = match estimator.extend(&op, 4) {
        Ok(_) => anyhow::bail!("a cancelled batch was accepted"),
        Err(err) => err,
    };
    ensure!(matches!(err.kind(), SlqErrorKind::Cancelled { .. }));
    ensure!(estimator.completed_runs() == 3);
    ensure!(estimator.estimate()? == before);
    Ok(())
}

#[test]
fn test_normalizations_integrate_to_their_targets() -> Result<()> {
    let n = 120;
    let op = Scenario::HessianLike.operator(n, 9);
    for (normalization, target) in [
        (Normalization::Unit, 1.0),
        (Normalization::SpectralMass, n as f64),
    ] {
        let density = DensityConfig {
            normalization,
            ..DensityConfig::default()
        };
        let estimate = estimate_density(&op, n, 30, 5, SeedSequence::from_base(1), density)?;
        let mass = trapezoid(&estimate.grid, &estimate.density);
        ensure!(
            (mass - target).abs() < 1e-9 * target,
            "{normalization:?} curve integrates to {mass}, expected {target}"
        );
        ensure!(estimate.density.iter().all(|&y| y >= 0.0));
    }
    Ok(())
}

#[test]
fn test_estimate_places_cluster_mass() -> Result<()> {
    let n = 400;
    let op = Scenario::Clustered.operator(n, 0);
    let density = DensityConfig {
        grid: GridSpec::Fixed {
            min: -2.0,
            max: 4.0,
            len: 1201,
        },
        bandwidth: Bandwidth::Fixed { sigma: 0.05 },
        normalization: Normalization::Unit,
    };
    let estimate = estimate_density(&op, n, 30, 20, SeedSequence::from_base(3), density)?;

    let split = estimate
        .grid
        .iter()
        .position(|&x| x >= 1.0)
        .unwrap_or(estimate.grid.len());
    let left = trapezoid(&estimate.grid[..=split], &estimate.density[..=split]);
    ensure!(
        (left - 0.75).abs() < 0.05,
        "mass of the lower cluster is {left:.3}, expected 0.75"
    );

    // Both peaks sit on their clusters.
    let argmax = |range: std::ops::Range<usize>| {
        range
            .max_by(|&a, &b| estimate.density[a].total_cmp(&estimate.density[b]))
            .map(|i| estimate.grid[i])
            .unwrap_or(f64::NAN)
    };
    let low_peak = argmax(0..split);
    let high_peak = argmax(split..estimate.grid.len());
    ensure!((low_peak + 0.975).abs() < 0.1, "lower peak at {low_peak}");
    ensure!((high_peak - 3.025).abs() < 0.1, "upper peak at {high_peak}");
    Ok(())
}

#[test]
fn test_oracle_dimension_is_checked() -> Result<()> {
    let op = DiagonalOperator::new(vec![1.0; 5]);
    ensure!(op.dim() == 5);
    let result = estimate_density(
        &op,
        6,
        3,
        1,
        SeedSequence::default(),
        DensityConfig::default(),
    );
    ensure!(matches!(
        result.map_err(|e| e.into_kind()),
        Err(SlqErrorKind::InputError(_))
    ));
    Ok(())
}
