//! Synthetic test spectra with known eigenvalues.
//!
//! The experiment binaries and the integration tests run SLQ on diagonal operators so the
//! estimate can be compared against the exact eigenvalue distribution.

use crate::operator::DiagonalOperator;
use clap::ValueEnum;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

/// The spectral shape of a synthetic operator.
#[derive(ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Eigenvalues evenly spaced on [-1, 1].
    Uniform,
    /// Two tight clusters around -1 and 3, with three quarters of the mass in the first.
    Clustered,
    /// A Gaussian bulk around zero, slightly indefinite, plus a handful of large outliers.
    /// This is the typical shape of a trained network's loss Hessian.
    HessianLike,
}

impl Scenario {
    /// Eigenvalues of the scenario at dimension `n`. Randomized shapes draw from `seed`.
    pub fn eigenvalues(self, n: usize, seed: u64) -> Vec<f64> {
        let spacing = |len: usize| (len.max(2) - 1) as f64;
        match self {
            Scenario::Uniform => (0..n)
                .map(|i| -1.0 + 2.0 * i as f64 / spacing(n))
                .collect(),
            Scenario::Clustered => {
                let first = 3 * n / 4;
                (0..n)
                    .map(|i| {
                        if i < first {
                            -1.0 + 0.05 * i as f64 / spacing(first)
                        } else {
                            3.0 + 0.05 * (i - first) as f64 / spacing(n - first)
                        }
                    })
                    .collect()
            }
            Scenario::HessianLike => {
                let outliers = (n / 50).clamp(usize::from(n > 0), 10);
                let mut rng = StdRng::seed_from_u64(seed);
                let mut eigs: Vec<f64> = (0..n - outliers)
                    .map(|_| 0.05 * rng.sample::<f64, _>(StandardNormal))
                    .collect();
                eigs.extend((1..=outliers).map(|k| 10.0 * k as f64));
                eigs
            }
        }
    }

    /// The scenario as a diagonal operator.
    pub fn operator(self, n: usize, seed: u64) -> DiagonalOperator {
        DiagonalOperator::new(self.eigenvalues(n, seed))
    }
}
