//! Ritz pairs of a Lanczos tridiagonal matrix.
//!
//! If `T = Q Θ Q^T` is the eigendecomposition of the projected operator, the pairs
//! `(θ_i, τ_i^2)` with `τ_i = Q[0, i]` form the m-point Gauss quadrature rule of the spectral
//! measure of `H` with respect to the probe vector: for any smooth `f`,
//! `v_0^T f(H) v_0 ≈ Σ_i τ_i^2 f(θ_i)`. Averaging these rules over random probes gives the
//! stochastic Lanczos quadrature estimate of the spectral density.

use super::Tridiagonal;
use crate::error::{SlqError, SlqErrorKind};
use faer::Side;

/// The discrete measure `Σ_i τ_i^2 δ(θ_i)` produced by one Lanczos run.
///
/// Ritz values are sorted ascending and the weights sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct RitzPairs {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl RitzPairs {
    /// Ritz values `θ_i`, ascending.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Quadrature weights `τ_i^2`.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.values.iter().copied().zip(self.weights.iter().copied())
    }

    /// Smallest Ritz value.
    pub fn min(&self) -> f64 {
        self.values[0]
    }

    /// Largest Ritz value.
    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Total mass of the rule, one up to rounding.
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Quadrature estimate of the spectral moment `v_0^T H^k v_0 = Σ_i τ_i^2 θ_i^k`.
    pub fn moment(&self, k: i32) -> f64 {
        self.iter().map(|(theta, w)| w * theta.powi(k)).sum()
    }
}

/// Diagonalizes `T` exactly and returns its Ritz pairs.
///
/// # Errors
/// Returns [`SlqErrorKind::EvdError`] if the symmetric eigensolver fails to converge.
pub fn tridiag_to_ritz(t: &Tridiagonal) -> Result<RitzPairs, SlqError> {
    let m = t.order();
    if m == 1 {
        return Ok(RitzPairs {
            values: vec![t.alphas()[0]],
            weights: vec![1.0],
        });
    }

    let dense = t.to_dense();
    let evd = dense
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(SlqErrorKind::EvdError)?;
    let q = evd.U();
    let theta = evd.S().column_vector();

    let mut pairs: Vec<(f64, f64)> = (0..m).map(|i| (theta[i], q[(0, i)].powi(2))).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (values, weights) = pairs.into_iter().unzip();

    Ok(RitzPairs { values, weights })
}
