//! Stochastic Lanczos quadrature for the spectral density of implicit symmetric operators.
//!
//! This crate estimates the eigenvalue distribution of a large real symmetric matrix `H`
//! that is never formed explicitly: the caller supplies only an [`Oracle`] computing the
//! product `H v` (in the typical use, a Hessian-vector product of a neural network loss).
//!
//! ## Algorithm
//!
//! Each run draws a random Gaussian probe, normalizes it and performs `m` steps of the
//! symmetric Lanczos process with full reorthogonalization, producing an `m x m`
//! tridiagonal matrix `T`. The eigenpairs of `T` give Ritz values `θ_i` and quadrature
//! weights `τ_i²` (the squared first components of the eigenvectors), which together form
//! a discrete approximation of the spectral measure seen from the probe. Smoothing every
//! run's weighted Ritz values with a Gaussian kernel and averaging over independent runs
//! yields the density estimate.
//!
//! The main entry points are:
//!
//! - [`lanczos`] and [`lanczos_with_basis`]: a single Lanczos run.
//! - [`tridiag_to_ritz`]: Ritz pairs of a tridiagonal matrix.
//! - [`smooth`]: Gaussian smoothing of weighted Ritz values on a grid.
//! - [`estimate_density`]: the one-call estimate over several runs.
//! - [`SlqEstimator`]: the incremental aggregator, with cancellation, progress reporting
//!   and fault-tolerant batches.
//!
//! ## Example Usage
//!
//! ```rust
//! use slq_spectrum::{
//!     config::{DensityConfig, GridSpec, SeedSequence},
//!     estimate_density,
//!     operator::DiagonalOperator,
//! };
//!
//! // An operator with known spectrum: half of the eigenvalues at 1, half at 4.
//! let eigenvalues: Vec<f64> = (0..200).map(|i| if i < 100 { 1.0 } else { 4.0 }).collect();
//! let h = DiagonalOperator::new(eigenvalues);
//!
//! let density = DensityConfig {
//!     grid: GridSpec::Fixed { min: 0.0, max: 5.0, len: 501 },
//!     ..DensityConfig::default()
//! };
//! let estimate = estimate_density(&h, 200, 10, 8, SeedSequence::from_base(0), density).unwrap();
//!
//! // The two peaks dominate the curve.
//! let at = |x: f64| {
//!     let i = estimate.grid.iter().position(|&g| (g - x).abs() < 1e-9).unwrap();
//!     estimate.density[i]
//! };
//! assert!(at(1.0) > 10.0 * at(2.5));
//! assert!(at(4.0) > 10.0 * at(2.5));
//! ```
//!
//! ## Concurrency
//!
//! Runs share nothing but the oracle, which must be [`Sync`] for the parallel paths. Each
//! run holds its own `n x m` basis, so peak memory grows with the number of runs executing
//! at once; see [`utils::perf::max_order_for_budget`].

pub mod algorithms;
pub mod config;
pub mod density;
pub mod error;
pub mod estimator;
pub mod operator;
pub mod slq;
pub mod utils;

pub use error::{SlqError, SlqErrorKind};
pub use estimator::{DensityEstimate, SlqEstimator};
pub use operator::Oracle;
pub use slq::{estimate_density, lanczos, lanczos_with_basis, smooth, tridiag_to_ritz};
