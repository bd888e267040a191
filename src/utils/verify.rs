//! Small dense utilities for verifying Lanczos output on toy problems.
//!
//! These materialize `n x n` matrices and are only meant for operators small enough to
//! check by hand; nothing in the estimation path uses them.

use crate::{
    algorithms::Tridiagonal,
    error::{SlqError, SlqErrorKind},
    operator::Oracle,
};
use faer::{Col, Mat, MatRef};

/// Materializes the operator column by column, `H e_j` for every unit vector `e_j`.
pub fn dense_matrix<O: Oracle + ?Sized>(oracle: &O) -> Result<Mat<f64>, SlqError> {
    let n = oracle.dim();
    let mut h = Mat::<f64>::zeros(n, n);
    for j in 0..n {
        let e_j = Col::from_fn(n, |i| if i == j { 1.0 } else { 0.0 });
        let col = oracle
            .apply(e_j.as_ref())
            .map_err(|source| SlqErrorKind::OracleFailure {
                step: j,
                source: Box::new(source),
            })?;
        if col.nrows() != n {
            return Err(SlqErrorKind::DimensionMismatch {
                step: j,
                expected: n,
                actual: col.nrows(),
            }
            .into());
        }
        h.col_mut(j).copy_from(col.as_ref());
    }
    Ok(h)
}

/// Reassembles `V T V^T` from a Lanczos basis and its tridiagonal matrix.
///
/// With `m = n` and no breakdown this reproduces the operator itself.
pub fn reconstruct_operator(v_k: MatRef<'_, f64>, t: &Tridiagonal) -> Mat<f64> {
    let t_dense = t.to_dense();
    v_k * &t_dense * v_k.transpose()
}

/// Loss of orthogonality of a basis, `‖I - V^T V‖_F`.
pub fn orthogonality_loss(v_k: MatRef<'_, f64>) -> f64 {
    let m = v_k.ncols();
    let identity = Mat::<f64>::identity(m, m);
    (&identity - v_k.transpose() * v_k).norm_l2()
}

/// Largest entrywise deviation of `V^T V` from the identity.
pub fn max_orthogonality_error(v_k: MatRef<'_, f64>) -> f64 {
    let gram = v_k.transpose() * v_k;
    let m = gram.nrows();
    let mut worst = 0.0f64;
    for j in 0..m {
        for i in 0..m {
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((gram[(i, j)] - target).abs());
        }
    }
    worst
}
