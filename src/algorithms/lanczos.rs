//! Symmetric Lanczos tridiagonalization with full reorthogonalization.
//!
//! ** NOTE: We recommend using the high-level functions in [`crate::slq`] instead. This
//! module is intended for use cases where fine-grained control over a single run is required
//! (per-step callbacks, cancellation, the stored basis).
//!
//! Starting from a random unit probe `v_0`, each step applies the oracle once and extends
//! the orthonormal Krylov basis by one vector:
//!
//! ```text
//! w   = H v_i
//! α_i = <w, v_i>
//! w   = w - α_i v_i - β_{i-1} v_{i-1}
//! w   = w - V_i (V_i^T w)           (twice, classical Gram-Schmidt)
//! β_i = ‖w‖,  v_{i+1} = w / β_i
//! ```
//!
//! In finite precision the bare three-term recurrence loses orthogonality as soon as Ritz
//! values converge, which produces spurious copies of converged eigenvalues ("ghosts") and
//! biases the quadrature weights. Reorthogonalizing against the whole stored basis removes
//! them, at the cost of O(n m) memory and O(n m^2) flops per run.

use super::{
    CancelToken, LanczosCallback, LanczosDecomposition, LanczosOutput, StepDiagnostics,
    Tridiagonal, probe_vector,
};
use crate::{
    config::LanczosConfig,
    error::{Quantity, SlqError, SlqErrorKind},
    operator::Oracle,
};
use faer::{Mat, Scale};
use std::time::{Duration, Instant};

/// Performs one Lanczos run on `oracle`, storing the full basis.
///
/// The run is deterministic given the oracle, the configuration and `seed`. It calls the
/// oracle exactly `order` times unless the recurrence breaks down earlier, in which case the
/// truncated tridiagonal matrix is exact on the invariant Krylov subspace found and
/// [`LanczosDecomposition::breakdown`] records the step.
///
/// # Arguments
/// * `oracle`: The operator, accessed only through products.
/// * `seed`: Seed of the random probe vector.
/// * `config`: Order, breakdown tolerance and reorthogonalization switch.
/// * `cancel`: Checked after every step that is followed by another one.
/// * `callback`: Invoked with each step's diagnostics.
///
/// # Errors
/// Oracle failures, dimension mismatches and non-finite values abort the run; no partial
/// tridiagonal matrix is returned.
pub fn lanczos_standard<O: Oracle + ?Sized>(
    oracle: &O,
    seed: u64,
    config: &LanczosConfig,
    cancel: Option<&CancelToken>,
    mut callback: Option<&mut LanczosCallback<'_>>,
) -> Result<LanczosOutput, SlqError> {
    config.validate()?;
    let n = oracle.dim();
    if n == 0 {
        return Err(SlqErrorKind::input("operator dimension must be positive").into());
    }
    let k = if config.order > n {
        log::warn!(
            "Requested Lanczos order {} exceeds operator dimension {n}; clamping to {n}.",
            config.order
        );
        n
    } else {
        config.order
    };

    // The basis is allocated once; early termination trims it at the end.
    let mut v_k = Mat::<f64>::zeros(n, k);
    let v_0 = probe_vector(n, seed)?;
    v_k.col_mut(0).copy_from(v_0.as_ref());

    let mut alphas = Vec::with_capacity(k);
    let mut betas = Vec::with_capacity(k.saturating_sub(1));
    let mut breakdown = None;
    let mut residual_norm = 0.0;
    let mut beta_prev = 0.0;
    let mut oracle_time = Duration::ZERO;
    let mut steps_taken = 0;

    for i in 0..k {
        let start = Instant::now();
        let hv = oracle
            .apply(v_k.col(i))
            .map_err(|source| SlqErrorKind::OracleFailure {
                step: i,
                source: Box::new(source),
            })?;
        let oracle_elapsed = start.elapsed();
        oracle_time += oracle_elapsed;

        if hv.nrows() != n {
            return Err(SlqErrorKind::DimensionMismatch {
                step: i,
                expected: n,
                actual: hv.nrows(),
            }
            .into());
        }
        let hv_norm = hv.norm_l2();

        let v_i = v_k.col(i);
        let alpha = v_i.transpose() * hv.as_ref();
        if !alpha.is_finite() {
            return Err(non_finite(i, Quantity::Alpha));
        }

        let mut w = hv;
        w -= v_i * Scale(alpha);
        if i > 0 {
            w -= v_k.col(i - 1) * Scale(beta_prev);
        }

        if config.reorthogonalize {
            let basis = v_k.as_ref().get(.., 0..i + 1);
            for _ in 0..2 {
                let coeffs = basis.transpose() * w.as_ref();
                w -= basis * coeffs.as_ref();
            }
        }

        let beta = w.norm_l2();
        if !beta.is_finite() {
            return Err(non_finite(i, Quantity::Beta));
        }

        alphas.push(alpha);
        steps_taken = i + 1;
        residual_norm = beta;

        if let Some(ref mut cb) = callback {
            cb(&StepDiagnostics {
                seed,
                step: i,
                alpha,
                beta,
                oracle_elapsed,
            });
        }
        log::debug!(
            "seed {seed} step {i}: alpha = {alpha:.6e}, beta = {beta:.6e}, oracle {:?}",
            oracle_elapsed
        );

        if beta <= config.tolerance * hv_norm {
            log::debug!("seed {seed}: invariant subspace found at step {i} (beta = {beta:.3e}).");
            breakdown = Some(i);
            break;
        }

        // v_{i+1} is only needed when another step follows.
        if i + 1 < k {
            let v_next = w * Scale(1.0 / beta);
            if !v_next.norm_l2().is_finite() {
                return Err(non_finite(i, Quantity::BasisVector));
            }
            v_k.col_mut(i + 1).copy_from(v_next.as_ref());
            betas.push(beta);
            beta_prev = beta;

            if cancel.is_some_and(CancelToken::is_cancelled) {
                log::info!("seed {seed}: cancelled after step {i}.");
                return Err(SlqErrorKind::Cancelled { step: i }.into());
            }
        }
    }

    let final_v_k = if steps_taken == k {
        v_k
    } else {
        v_k.as_ref().get(.., 0..steps_taken).to_owned()
    };

    Ok(LanczosOutput {
        v_k: final_v_k,
        decomposition: LanczosDecomposition {
            tridiagonal: Tridiagonal::new(alphas, betas)?,
            steps_taken,
            breakdown,
            residual_norm,
            seed,
            oracle_time,
        },
    })
}

fn non_finite(step: usize, quantity: Quantity) -> SlqError {
    SlqErrorKind::NonFiniteValue { step, quantity }.into()
}
