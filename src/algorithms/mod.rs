//! Core numerical building blocks of stochastic Lanczos quadrature.
//!
//! - [`lanczos`]: the Krylov tridiagonalization engine with full reorthogonalization.
//! - [`ritz`]: exact eigendecomposition of the resulting tridiagonal matrix into Ritz pairs.
//!
//! This module also holds the types shared between the two: the tridiagonal matrix, the
//! output of a run, per-step diagnostics and the cancellation token.

pub mod lanczos;
pub mod ritz;

use crate::error::{SlqError, SlqErrorKind};
use faer::{Col, Mat};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, StandardNormal};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

pub use lanczos::lanczos_standard;
pub use ritz::{RitzPairs, tridiag_to_ritz};

/// A real symmetric tridiagonal matrix
///
/// ```text
/// T = | α_0 β_0          |
///     | β_0 α_1 β_1      |
///     |     β_1 α_2 ...  |
/// ```
///
/// stored as its diagonal (`alphas`, length m) and off-diagonal (`betas`, length m - 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Tridiagonal {
    alphas: Vec<f64>,
    betas: Vec<f64>,
}

impl Tridiagonal {
    /// Builds a tridiagonal matrix, checking that the off-diagonal is one shorter than the
    /// diagonal and that every off-diagonal entry is non-negative.
    pub fn new(alphas: Vec<f64>, betas: Vec<f64>) -> Result<Self, SlqError> {
        if alphas.is_empty() {
            return Err(SlqErrorKind::input(
                "a tridiagonal matrix needs at least one diagonal entry",
            )
            .into());
        }
        if betas.len() + 1 != alphas.len() {
            return Err(SlqErrorKind::input(format!(
                "expected {} off-diagonal entries for order {}, got {}",
                alphas.len() - 1,
                alphas.len(),
                betas.len()
            ))
            .into());
        }
        if betas.iter().any(|&b| b < 0.0) {
            return Err(SlqErrorKind::input("off-diagonal entries must be non-negative").into());
        }
        Ok(Self { alphas, betas })
    }

    /// The order `m` of the matrix.
    pub fn order(&self) -> usize {
        self.alphas.len()
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    /// Assembles the explicit dense `m x m` matrix.
    pub fn to_dense(&self) -> Mat<f64> {
        let m = self.order();
        let mut t = Mat::<f64>::zeros(m, m);
        for (i, &alpha) in self.alphas.iter().enumerate() {
            t[(i, i)] = alpha;
        }
        for (i, &beta) in self.betas.iter().enumerate() {
            t[(i, i + 1)] = beta;
            t[(i + 1, i)] = beta;
        }
        t
    }
}

/// The scalar result of one Lanczos run.
#[derive(Debug, Clone)]
pub struct LanczosDecomposition {
    /// The projected operator `T_m = V_m^T H V_m`.
    pub tridiagonal: Tridiagonal,
    /// Number of completed steps, equal to the number of oracle calls.
    pub steps_taken: usize,
    /// `Some(i)` when `β_i` fell below tolerance at step `i`: the Krylov subspace is
    /// invariant and `T` is exact on it. This is a normal outcome, not a failure.
    pub breakdown: Option<usize>,
    /// Norm of the residual `β` produced by the final step.
    pub residual_norm: f64,
    /// Seed the probe vector was drawn from.
    pub seed: u64,
    /// Wall time spent inside the oracle.
    pub oracle_time: Duration,
}

impl LanczosDecomposition {
    pub fn is_breakdown(&self) -> bool {
        self.breakdown.is_some()
    }
}

/// The decomposition together with the orthonormal Krylov basis `V_m` (n x m).
#[derive(Debug, Clone)]
pub struct LanczosOutput {
    pub v_k: Mat<f64>,
    pub decomposition: LanczosDecomposition,
}

/// Progress information emitted after every completed Lanczos step.
#[derive(Debug, Clone, Copy)]
pub struct StepDiagnostics {
    pub seed: u64,
    pub step: usize,
    pub alpha: f64,
    pub beta: f64,
    /// Wall time of this step's oracle call.
    pub oracle_elapsed: Duration,
}

/// Observer invoked with each step's diagnostics. It cannot influence the run.
pub type LanczosCallback<'a> = dyn FnMut(&StepDiagnostics) + 'a;

/// A cloneable flag used to cancel Lanczos runs between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Draws a unit-norm probe vector with i.i.d. standard normal entries.
///
/// Normalized Gaussian vectors are uniformly distributed on the sphere, which makes the
/// quadrature weights of a run an unbiased sample of the spectral measure.
pub fn probe_vector(n: usize, seed: u64) -> Result<Col<f64>, SlqError> {
    if n == 0 {
        return Err(SlqErrorKind::input("operator dimension must be positive").into());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let v: Col<f64> = Col::from_fn(n, |_| StandardNormal.sample(&mut rng));
    let norm = v.norm_l2();
    if !(norm > 0.0 && norm.is_finite()) {
        return Err(
            SlqErrorKind::input(format!("probe vector for seed {seed} has zero norm")).into(),
        );
    }
    Ok(Col::from_fn(n, |i| v[i] / norm))
}
