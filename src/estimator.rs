//! Aggregation of independent Lanczos runs into one spectral density estimate.
//!
//! [`SlqEstimator`] owns the Ritz pairs of every completed run (never the Krylov bases) and
//! a running average of their smoothed curves. Runs are added in batches with
//! [`SlqEstimator::extend`]; each batch executes its runs as independent tasks on the rayon
//! pool and folds the results in seed order, so the estimate does not depend on scheduling
//! and growing the number of runs never recomputes a completed run.
//!
//! A batch is committed atomically: if a run fails (and failures are not being skipped) or
//! is cancelled, or the density grid cannot be built, the estimator is left exactly as it was
//! before the call.

use crate::{
    algorithms::{CancelToken, RitzPairs, lanczos_standard, tridiag_to_ritz},
    config::{GridSpec, LanczosConfig, SlqConfig},
    density::{Grid, SpectralDensity, normalize, spectral_range},
    error::{SlqError, SlqErrorKind},
    operator::Oracle,
};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Diagnostic record of one run. Advisory only.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Position of the run in the seed sequence.
    pub run: usize,
    pub seed: u64,
    /// Completed Lanczos steps (0 if the run failed).
    pub steps: usize,
    pub breakdown: Option<usize>,
    pub elapsed: Duration,
    pub oracle_time: Duration,
    /// Error message of a skipped run.
    pub failure: Option<String>,
}

impl RunReport {
    /// Mean wall time of one oracle call.
    pub fn mean_oracle_time(&self) -> Option<Duration> {
        (self.steps > 0).then(|| self.oracle_time / self.steps as u32)
    }
}

/// A normalized density curve on its evaluation grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityEstimate {
    pub grid: Vec<f64>,
    pub density: Vec<f64>,
    /// Gaussian bandwidth used for smoothing.
    pub sigma: f64,
    /// Number of runs averaged into the curve.
    pub num_runs: usize,
}

type ProgressFn = dyn Fn(&RunReport) + Send + Sync;

struct RunOutcome {
    report: RunReport,
    result: Result<RitzPairs, SlqError>,
}

/// Stochastic Lanczos quadrature driver with incremental refinement.
pub struct SlqEstimator {
    dim: usize,
    config: SlqConfig,
    runs: Vec<RitzPairs>,
    reports: Vec<RunReport>,
    next_run: usize,
    density: Option<SpectralDensity>,
    cancel: Option<CancelToken>,
    progress: Option<Box<ProgressFn>>,
}

impl SlqEstimator {
    /// Creates an estimator for an operator of dimension `dim`.
    pub fn new(dim: usize, config: SlqConfig) -> Result<Self, SlqError> {
        if dim == 0 {
            return Err(SlqErrorKind::input("operator dimension must be positive").into());
        }
        config.validate()?;
        if let GridSpec::Fixed { min, max, len } = config.density.grid {
            Grid::uniform(min, max, len)?;
        }
        Ok(Self {
            dim,
            config,
            runs: Vec::new(),
            reports: Vec::new(),
            next_run: 0,
            density: None,
            cancel: None,
            progress: None,
        })
    }

    /// Runs observe `token` between steps.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Registers a callback invoked from the worker thread as each run finishes.
    pub fn with_progress(
        mut self,
        progress: impl Fn(&RunReport) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Executes the configured `num_runs` runs.
    pub fn run<O: Oracle + Sync + ?Sized>(
        &mut self,
        oracle: &O,
    ) -> Result<DensityEstimate, SlqError> {
        self.extend(oracle, self.config.num_runs)
    }

    /// Adds `extra_runs` runs, continuing the seed sequence where the previous batch stopped.
    pub fn extend<O: Oracle + Sync + ?Sized>(
        &mut self,
        oracle: &O,
        extra_runs: usize,
    ) -> Result<DensityEstimate, SlqError> {
        if extra_runs == 0 {
            return Err(SlqErrorKind::input("number of runs must be at least 1").into());
        }
        if oracle.dim() != self.dim {
            return Err(SlqErrorKind::input(format!(
                "oracle dimension {} does not match estimator dimension {}",
                oracle.dim(),
                self.dim
            ))
            .into());
        }

        let schedule = (self.next_run..self.next_run + extra_runs)
            .map(|run| {
                self.config.seeds.seed(run).map(|seed| (run, seed)).ok_or_else(|| {
                    SlqError::from(SlqErrorKind::input(format!(
                        "seed sequence exhausted at run {run}"
                    )))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Starting {} Lanczos runs of order {} on dimension {} ({}).",
            extra_runs,
            self.config.lanczos.order,
            self.dim,
            if self.config.parallel { "parallel" } else { "sequential" }
        );

        let lanczos = &self.config.lanczos;
        let cancel = self.cancel.as_ref();
        let progress = self.progress.as_deref();
        let outcomes: Vec<RunOutcome> = if self.config.parallel {
            schedule
                .par_iter()
                .map(|&(run, seed)| execute_run(oracle, run, seed, lanczos, cancel, progress))
                .collect()
        } else {
            schedule
                .iter()
                .map(|&(run, seed)| execute_run(oracle, run, seed, lanczos, cancel, progress))
                .collect()
        };

        let mut accepted = Vec::with_capacity(outcomes.len());
        let mut reports = Vec::with_capacity(outcomes.len());
        for RunOutcome { report, result } in outcomes {
            match result {
                Ok(ritz) => accepted.push(ritz),
                Err(err) => {
                    let cancelled = matches!(err.kind(), SlqErrorKind::Cancelled { .. });
                    if cancelled || !self.config.skip_failed_runs {
                        return Err(err);
                    }
                    log::warn!(
                        "Skipping failed run {} (seed {}): {err}",
                        report.run,
                        report.seed
                    );
                }
            }
            reports.push(report);
        }

        let folded = if accepted.is_empty() {
            None
        } else {
            Some(self.fold(&accepted)?)
        };
        self.next_run += extra_runs;
        self.reports.extend(reports);
        if let Some(density) = folded {
            self.runs.extend(accepted);
            self.density = Some(density);
        }

        if self.runs.is_empty() {
            return Err(SlqErrorKind::NoSuccessfulRuns {
                attempted: self.reports.len(),
            }
            .into());
        }
        self.estimate()
    }

    /// The grid and bandwidth for Ritz values spanning `range`.
    fn layout(&self, range: (f64, f64)) -> Result<(Grid, f64), SlqError> {
        let grid = match self.config.density.grid {
            GridSpec::Fixed { min, max, len } => Grid::uniform(min, max, len)?,
            GridSpec::Auto { len, margin } => Grid::around(range, margin, len)?,
        };
        let sigma = self.config.density.bandwidth.sigma(&grid, range);
        Ok((grid, sigma))
    }

    /// The running average after folding `batch` into the stored runs. The estimator itself
    /// is not modified.
    ///
    /// When the batch leaves the grid and bandwidth unchanged its curves are added to a copy
    /// of the current average; otherwise the average is recomputed from the stored Ritz pairs
    /// on the new grid.
    fn fold(&self, batch: &[RitzPairs]) -> Result<SpectralDensity, SlqError> {
        let range = spectral_range(self.runs.iter().chain(batch)).ok_or_else(|| {
            SlqError::from(SlqErrorKind::input("no Ritz values to build a grid from"))
        })?;
        let (grid, sigma) = self.layout(range)?;
        let mut density = match &self.density {
            Some(current) if *current.grid() == grid && current.sigma() == sigma => {
                current.clone()
            }
            _ => {
                log::debug!(
                    "Rebuilding density grid on [{:.4e}, {:.4e}] with sigma = {sigma:.4e}.",
                    grid.min(),
                    grid.max()
                );
                let mut density = SpectralDensity::new(grid, sigma);
                for ritz in &self.runs {
                    density.accumulate(ritz);
                }
                density
            }
        };
        for ritz in batch {
            density.accumulate(ritz);
        }
        Ok(density)
    }

    /// The current normalized estimate.
    pub fn estimate(&self) -> Result<DensityEstimate, SlqError> {
        let density = self
            .density
            .as_ref()
            .filter(|d| d.runs() > 0)
            .ok_or_else(|| {
                SlqError::from(SlqErrorKind::NoSuccessfulRuns {
                    attempted: self.reports.len(),
                })
            })?;
        let grid = density.grid().points().to_vec();
        let mut values = density.mean().to_vec();
        normalize(&mut values, &grid, self.config.density.normalization, self.dim);
        Ok(DensityEstimate {
            grid,
            density: values,
            sigma: density.sigma(),
            num_runs: density.runs(),
        })
    }

    /// SLQ estimate of `tr(H) = n · E[v^T H v]`.
    pub fn trace_estimate(&self) -> Option<f64> {
        if self.runs.is_empty() {
            return None;
        }
        let mean = self.runs.iter().map(|r| r.moment(1)).sum::<f64>() / self.runs.len() as f64;
        Some(self.dim as f64 * mean)
    }

    /// Smallest and largest Ritz value over all completed runs.
    pub fn spectral_range(&self) -> Option<(f64, f64)> {
        spectral_range(&self.runs)
    }

    pub fn ritz_pairs(&self) -> &[RitzPairs] {
        &self.runs
    }

    pub fn reports(&self) -> &[RunReport] {
        &self.reports
    }

    pub fn completed_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn config(&self) -> &SlqConfig {
        &self.config
    }
}

/// One independent task: a Lanczos run followed by its Ritz decomposition.
/// The basis is dropped as soon as the tridiagonal matrix exists.
fn execute_run<O: Oracle + ?Sized>(
    oracle: &O,
    run: usize,
    seed: u64,
    config: &LanczosConfig,
    cancel: Option<&CancelToken>,
    progress: Option<&ProgressFn>,
) -> RunOutcome {
    let start = Instant::now();
    let result = lanczos_standard(oracle, seed, config, cancel, None).and_then(|output| {
        let decomposition = output.decomposition;
        tridiag_to_ritz(&decomposition.tridiagonal).map(|ritz| (decomposition, ritz))
    });

    let mut report = RunReport {
        run,
        seed,
        steps: 0,
        breakdown: None,
        elapsed: start.elapsed(),
        oracle_time: Duration::ZERO,
        failure: None,
    };
    let result = match result {
        Ok((decomposition, ritz)) => {
            report.steps = decomposition.steps_taken;
            report.breakdown = decomposition.breakdown;
            report.oracle_time = decomposition.oracle_time;
            log::info!(
                "Run {run} (seed {seed}) finished: {} steps in {:?}, oracle {:?}.",
                report.steps,
                report.elapsed,
                report.oracle_time
            );
            Ok(ritz)
        }
        Err(err) => {
            report.failure = Some(err.to_string());
            Err(err)
        }
    };
    if let Some(cb) = progress {
        cb(&report);
    }
    RunOutcome { report, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedSequence;
    use crate::operator::{DiagonalOperator, FnOracle};
    use approx::assert_abs_diff_eq;
    use faer::{Col, ColRef};
    use std::convert::Infallible;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    fn config(order: usize, num_runs: usize) -> SlqConfig {
        let mut config = SlqConfig {
            num_runs,
            ..SlqConfig::default()
        };
        config.lanczos.order = order;
        config.density.grid = GridSpec::Auto {
            len: 400,
            margin: 0.5,
        };
        config
    }

    #[test]
    fn test_single_batch_reports_every_run() {
        let op = DiagonalOperator::new((0..60).map(|i| i as f64 * 0.1).collect());
        let mut estimator = SlqEstimator::new(60, config(15, 4)).unwrap();
        let estimate = estimator.run(&op).unwrap();

        assert_eq!(estimate.num_runs, 4);
        assert_eq!(estimate.grid.len(), 400);
        assert_eq!(estimator.reports().len(), 4);
        assert!(estimator.reports().iter().all(|r| r.steps == 15));
        let seeds: Vec<u64> = estimator.reports().iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_extend_continues_seed_sequence() {
        let op = DiagonalOperator::new((0..40).map(|i| i as f64).collect());
        let mut cfg = config(10, 2);
        cfg.seeds = SeedSequence::Arithmetic { base: 100, stride: 7 };
        let mut estimator = SlqEstimator::new(40, cfg).unwrap();
        estimator.run(&op).unwrap();
        let estimate = estimator.extend(&op, 3).unwrap();

        assert_eq!(estimate.num_runs, 5);
        let seeds: Vec<u64> = estimator.reports().iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 107, 114, 121, 128]);
    }

    #[test]
    fn test_progress_callback_is_invoked_per_run() {
        let op = DiagonalOperator::new((0..30).map(|i| i as f64).collect());
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let mut estimator = SlqEstimator::new(30, config(8, 6))
            .unwrap()
            .with_progress(move |_| {
                seen.fetch_add(1, Ordering::Relaxed);
            });
        estimator.run(&op).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_trace_estimate_is_exact_for_multiple_of_identity() {
        let op = DiagonalOperator::new(vec![2.5; 20]);
        let mut estimator = SlqEstimator::new(20, config(5, 3)).unwrap();
        estimator.run(&op).unwrap();
        assert_abs_diff_eq!(estimator.trace_estimate().unwrap(), 50.0, epsilon = 1e-9);
        // Every run breaks down immediately on a multiple of the identity.
        assert!(estimator.reports().iter().all(|r| r.breakdown == Some(0)));
    }

    #[test]
    fn test_large_multiple_of_identity_gets_automatic_grid() {
        let c = 1e16;
        let scaled = FnOracle::new(4, move |v: ColRef<'_, f64>| {
            Ok::<_, Infallible>(Col::from_fn(v.nrows(), |i| c * v[i]))
        });
        let mut cfg = SlqConfig {
            num_runs: 1,
            ..SlqConfig::default()
        };
        cfg.lanczos.order = 2;
        let mut estimator = SlqEstimator::new(4, cfg).unwrap();
        let estimate = estimator.run(&scaled).unwrap();

        assert_eq!(estimator.completed_runs(), 1);
        assert_eq!(estimate.grid.len(), 10_000);
        assert!(estimate.grid[0] < c && c < estimate.grid[estimate.grid.len() - 1]);
        assert!(estimate.density.iter().all(|y| y.is_finite()));
        let trace = estimator.trace_estimate().unwrap();
        assert_abs_diff_eq!(trace / (4.0 * c), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_grid_failure_leaves_estimator_unchanged() {
        let huge = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&huge);
        let oracle = FnOracle::new(1, move |v: ColRef<'_, f64>| {
            let c = if flag.load(Ordering::Relaxed) { 1e308 } else { 1.0 };
            Ok::<_, Infallible>(Col::from_fn(v.nrows(), |i| c * v[i]))
        });
        let mut cfg = config(1, 1);
        // Wide enough for the first run; pushes the grid of the second past f64::MAX.
        cfg.density.grid = GridSpec::Auto {
            len: 50,
            margin: 8e307,
        };
        let mut estimator = SlqEstimator::new(1, cfg).unwrap();
        let before = estimator.run(&oracle).unwrap();

        huge.store(true, Ordering::Relaxed);
        let err = estimator.extend(&oracle, 1).unwrap_err();
        assert!(matches!(err.kind(), SlqErrorKind::InputError(_)));
        assert_eq!(estimator.completed_runs(), 1);
        assert_eq!(estimator.reports().len(), 1);
        assert_eq!(estimator.estimate().unwrap(), before);

        // The failed batch did not consume a seed.
        huge.store(false, Ordering::Relaxed);
        let after = estimator.extend(&oracle, 1).unwrap();
        assert_eq!(after.num_runs, 2);
        assert_eq!(estimator.reports()[1].seed, 1);
    }

    #[test]
    fn test_exhausted_explicit_seeds_are_rejected() {
        let op = DiagonalOperator::new(vec![1.0, 2.0, 3.0]);
        let mut cfg = config(2, 3);
        cfg.seeds = SeedSequence::Explicit { seeds: vec![1, 2] };
        let mut estimator = SlqEstimator::new(3, cfg).unwrap();
        assert!(estimator.run(&op).is_err());
        assert_eq!(estimator.completed_runs(), 0);
    }

    #[test]
    fn test_dimension_checked_against_oracle() {
        let op = DiagonalOperator::new(vec![1.0, 2.0, 3.0]);
        let mut estimator = SlqEstimator::new(4, config(2, 1)).unwrap();
        let err = estimator.run(&op).unwrap_err();
        assert!(matches!(err.kind(), SlqErrorKind::InputError(_)));
    }
}
