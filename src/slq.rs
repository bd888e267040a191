//! This module provides the high-level API of the crate: single Lanczos runs, Ritz pairs,
//! smoothing, and the one-call spectral density estimate.

use crate::{
    algorithms::{LanczosDecomposition, LanczosOutput, lanczos_standard},
    config::{DensityConfig, LanczosConfig, SeedSequence, SlqConfig},
    error::{SlqError, SlqErrorKind},
    estimator::{DensityEstimate, SlqEstimator},
    operator::Oracle,
};

pub use crate::algorithms::ritz::tridiag_to_ritz;
pub use crate::density::smooth;

/// Runs `order` Lanczos steps on `oracle` from the probe drawn with `seed` and returns the
/// tridiagonal matrix. The Krylov basis is dropped before returning.
///
/// # Arguments
/// * `oracle`: The implicit symmetric operator.
/// * `n`: Operator dimension. Must equal `oracle.dim()`.
/// * `order`: Number of Lanczos steps, at most `n`.
/// * `seed`: Seed of the random probe vector.
pub fn lanczos<O: Oracle + ?Sized>(
    oracle: &O,
    n: usize,
    order: usize,
    seed: u64,
) -> Result<LanczosDecomposition, SlqError> {
    Ok(lanczos_with_basis(oracle, n, order, seed)?.decomposition)
}

/// Like [`lanczos`], but also returns the `n x m` orthonormal Krylov basis.
pub fn lanczos_with_basis<O: Oracle + ?Sized>(
    oracle: &O,
    n: usize,
    order: usize,
    seed: u64,
) -> Result<LanczosOutput, SlqError> {
    check_dimension(oracle, n)?;
    lanczos_standard(oracle, seed, &LanczosConfig::with_order(order), None, None)
}

/// Estimates the spectral density of `oracle` from `num_runs` independent probe runs.
///
/// Runs execute in parallel; the result does not depend on scheduling. For incremental
/// refinement, cancellation or progress reporting use [`SlqEstimator`] directly.
pub fn estimate_density<O: Oracle + Sync + ?Sized>(
    oracle: &O,
    n: usize,
    order: usize,
    num_runs: usize,
    seeds: SeedSequence,
    density: DensityConfig,
) -> Result<DensityEstimate, SlqError> {
    check_dimension(oracle, n)?;
    let config = SlqConfig {
        lanczos: LanczosConfig::with_order(order),
        density,
        num_runs,
        seeds,
        ..SlqConfig::default()
    };
    SlqEstimator::new(n, config)?.run(oracle)
}

fn check_dimension<O: Oracle + ?Sized>(oracle: &O, n: usize) -> Result<(), SlqError> {
    if oracle.dim() != n {
        return Err(SlqErrorKind::input(format!(
            "operator dimension is {} but n = {n} was given",
            oracle.dim()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DiagonalOperator;

    #[test]
    fn test_lanczos_rejects_wrong_dimension() {
        let op = DiagonalOperator::new(vec![1.0, 2.0]);
        let err = lanczos(&op, 3, 2, 0).unwrap_err();
        assert!(matches!(err.kind(), SlqErrorKind::InputError(_)));
    }

    #[test]
    fn test_lanczos_drops_basis_but_keeps_tridiagonal() {
        let op = DiagonalOperator::new((1..=10).map(f64::from).collect());
        let full = lanczos_with_basis(&op, 10, 6, 9).unwrap();
        let t_only = lanczos(&op, 10, 6, 9).unwrap();
        assert_eq!(full.decomposition.tridiagonal, t_only.tridiagonal);
        assert_eq!(full.v_k.nrows(), 10);
    }
}
