//! This module defines the custom error types for the library.
//!
//! Every failure that can abort a Lanczos run or a density estimate is collected in a
//! single enum, [`SlqErrorKind`], wrapped by the public [`SlqError`] newtype. Breakdown of
//! the Lanczos recurrence is deliberately absent: it is an expected early termination and
//! is reported through [`crate::algorithms::LanczosDecomposition::breakdown`] instead.
//!
//! [`thiserror`] derives the `Display` and `source` plumbing. The oracle's own error is kept
//! as the `source` of [`SlqErrorKind::OracleFailure`] so callers can downcast it unchanged.
use std::fmt;
use thiserror::Error;

/// Boxed error produced by a caller-supplied oracle.
pub type OracleError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents all possible errors that can occur during a stochastic Lanczos quadrature run.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SlqError(#[from] SlqErrorKind);

impl SlqError {
    /// Returns the underlying error kind.
    pub fn kind(&self) -> &SlqErrorKind {
        &self.0
    }

    /// Consumes the error, returning the underlying kind.
    pub fn into_kind(self) -> SlqErrorKind {
        self.0
    }

    /// The Lanczos step at which the run failed, if the failure is tied to a step.
    pub fn failed_step(&self) -> Option<usize> {
        match &self.0 {
            SlqErrorKind::DimensionMismatch { step, .. }
            | SlqErrorKind::NonFiniteValue { step, .. }
            | SlqErrorKind::OracleFailure { step, .. }
            | SlqErrorKind::Cancelled { step } => Some(*step),
            _ => None,
        }
    }
}

/// The quantity in which a non-finite value was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    /// The diagonal coefficient α_i.
    Alpha,
    /// The off-diagonal coefficient β_i.
    Beta,
    /// A newly normalized Krylov basis vector.
    BasisVector,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Alpha => "alpha coefficient",
            Quantity::Beta => "beta coefficient",
            Quantity::BasisVector => "basis vector",
        };
        f.write_str(name)
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SlqErrorKind {
    /// The oracle returned a vector whose length differs from the operator dimension.
    #[error(
        "Dimension mismatch at step {step}: oracle returned a vector of length {actual}, expected {expected}."
    )]
    DimensionMismatch {
        step: usize,
        expected: usize,
        actual: usize,
    },

    /// NaN or infinity appeared in the recurrence.
    #[error("Non-finite {quantity} encountered at Lanczos step {step}.")]
    NonFiniteValue { step: usize, quantity: Quantity },

    /// The oracle itself failed. The original error is kept as the source.
    #[error("Oracle failed at Lanczos step {step}: {source}")]
    OracleFailure {
        step: usize,
        #[source]
        source: OracleError,
    },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// The run observed its cancellation token between two steps.
    #[error("Lanczos run cancelled after step {step}.")]
    Cancelled { step: usize },

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("A numerical error occurred during the eigendecomposition of T: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),

    /// Every run of an aggregation failed and was skipped.
    #[error("All {attempted} Lanczos runs failed; no density estimate can be formed.")]
    NoSuccessfulRuns { attempted: usize },
}

impl SlqErrorKind {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        SlqErrorKind::InputError(msg.into())
    }
}
