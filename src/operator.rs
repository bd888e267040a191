//! This module defines the oracle abstraction for implicit symmetric operators.
//!
//! The Lanczos process never needs the entries of the Hessian. Its only contact with the
//! operator is the product `v -> H v`, which for a neural network is typically computed by
//! nested automatic differentiation somewhere outside this crate. The [`Oracle`] trait
//! formalizes that contract: an operator dimension and a fallible, possibly expensive
//! operator-vector product.
//!
//! Besides the trait, this module provides the concrete oracles used for testing and
//! experiments: dense `faer` matrices, sparse column matrices, a diagonal operator with a
//! prescribed spectrum, and [`FnOracle`], which wraps a closure.

use faer::{Col, ColRef, Mat, MatRef, sparse::SparseColMat};
use std::{convert::Infallible, marker::PhantomData};

/// An implicit symmetric linear operator, accessed only through operator-vector products.
///
/// Implementations must return a vector of length [`Oracle::dim`] and must not depend on
/// hidden mutable state: the Lanczos engine relies on repeated calls with the same input
/// producing the same output.
///
/// # Example
///
/// ```
/// use faer::{Col, ColRef};
/// use slq_spectrum::operator::{FnOracle, Oracle};
///
/// // H = 2 I on R^3, exposed through a closure.
/// let oracle = FnOracle::new(3, |v: ColRef<'_, f64>| {
///     Ok::<_, std::convert::Infallible>(Col::from_fn(v.nrows(), |i| 2.0 * v[i]))
/// });
/// let v = Col::from_fn(3, |i| i as f64);
/// let hv = oracle.apply(v.as_ref()).unwrap();
/// assert_eq!(hv[2], 4.0);
/// ```
pub trait Oracle {
    /// Error raised by a failed product. It is propagated unchanged to the caller of the run.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dimension `n` of the operator.
    fn dim(&self) -> usize;

    /// Computes the operator-vector product `H v`.
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error>;
}

impl<O: Oracle + ?Sized> Oracle for &O {
    type Error = O::Error;

    #[inline]
    fn dim(&self) -> usize {
        (**self).dim()
    }

    #[inline]
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        (**self).apply(v)
    }
}

/// Dense matrix view. The caller is responsible for symmetry.
impl<'a> Oracle for MatRef<'a, f64> {
    type Error = Infallible;

    #[inline]
    fn dim(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        Ok(*self * v)
    }
}

impl Oracle for Mat<f64> {
    type Error = Infallible;

    #[inline]
    fn dim(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        self.as_ref().apply(v)
    }
}

/// Sparse symmetric matrix, stored with both triangles.
impl Oracle for SparseColMat<usize, f64> {
    type Error = Infallible;

    #[inline]
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        let mut out = Col::<f64>::zeros(self.nrows());
        for triplet in self.triplet_iter() {
            out[triplet.row] += *triplet.val * v[triplet.col];
        }
        Ok(out)
    }
}

/// A diagonal operator `diag(λ_1, ..., λ_n)` with an exactly known spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalOperator {
    diagonal: Vec<f64>,
}

impl DiagonalOperator {
    pub fn new(diagonal: Vec<f64>) -> Self {
        Self { diagonal }
    }

    /// The eigenvalues of the operator, in storage order.
    pub fn eigenvalues(&self) -> &[f64] {
        &self.diagonal
    }

    /// The exact trace, used to validate SLQ trace estimates.
    pub fn trace(&self) -> f64 {
        self.diagonal.iter().sum()
    }
}

impl Oracle for DiagonalOperator {
    type Error = Infallible;

    #[inline]
    fn dim(&self) -> usize {
        self.diagonal.len()
    }

    #[inline]
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        Ok(Col::from_fn(self.diagonal.len(), |i| self.diagonal[i] * v[i]))
    }
}

/// Adapts a closure computing `H v` into an [`Oracle`].
///
/// This is the usual bridge to an automatic-differentiation backend: the closure unflattens
/// `v` into the model's parameter structure, evaluates the Hessian-vector product and
/// flattens the result back.
pub struct FnOracle<F, E> {
    dim: usize,
    f: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnOracle<F, E>
where
    F: Fn(ColRef<'_, f64>) -> Result<Col<f64>, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(dim: usize, f: F) -> Self {
        Self {
            dim,
            f,
            _error: PhantomData,
        }
    }
}

impl<F, E> Oracle for FnOracle<F, E>
where
    F: Fn(ColRef<'_, f64>) -> Result<Col<f64>, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    #[inline]
    fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    fn apply(&self, v: ColRef<'_, f64>) -> Result<Col<f64>, Self::Error> {
        (self.f)(v)
    }
}
