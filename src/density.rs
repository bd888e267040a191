//! Gaussian smoothing of Ritz pairs into a spectral density curve.
//!
//! A single Lanczos run yields a discrete measure with `m` atoms. To compare runs and to
//! plot the spectrum, each atom is replaced by a Gaussian bump of width `σ` and the bumps are
//! evaluated on a uniform grid:
//!
//! ```text
//! φ(x) = Σ_i τ_i^2 N(x - θ_i; σ),   N(d; σ) = exp(-d^2 / 2σ^2) / (σ √(2π))
//! ```
//!
//! The bandwidth is a trade-off: with few runs a small `σ` yields spiky curves dominated by
//! individual Ritz values, while a large `σ` merges distinct eigenvalue clusters. Besides a
//! fixed `σ`, [`Bandwidth`] derives it from the spectral range or from the grid spacing.

use crate::algorithms::RitzPairs;
use crate::error::{SlqError, SlqErrorKind};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Normalized Gaussian kernel `N(d; σ)`.
#[inline]
pub fn gaussian_kernel(d: f64, sigma: f64) -> f64 {
    (-0.5 * (d / sigma).powi(2)).exp() / (sigma * (2.0 * PI).sqrt())
}

/// A uniform grid on `[min, max]` with `len >= 2` points.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    points: Vec<f64>,
}

impl Grid {
    pub fn uniform(min: f64, max: f64, len: usize) -> Result<Self, SlqError> {
        let finite = min.is_finite() && max.is_finite() && (max - min).is_finite();
        if len < 2 || !finite || min >= max {
            return Err(SlqErrorKind::input(format!(
                "cannot build a grid of {len} points on [{min}, {max}]"
            ))
            .into());
        }
        let step = (max - min) / (len - 1) as f64;
        let mut points: Vec<f64> = (0..len).map(|i| min + step * i as f64).collect();
        points[len - 1] = max;
        Ok(Self { points })
    }

    /// The grid spanning every Ritz value of `runs`, widened by `margin` on both sides.
    pub fn spanning<'a>(
        runs: impl IntoIterator<Item = &'a RitzPairs>,
        margin: f64,
        len: usize,
    ) -> Result<Self, SlqError> {
        let range = spectral_range(runs).ok_or_else(|| {
            SlqError::from(SlqErrorKind::input("no Ritz values to build a grid from"))
        })?;
        Self::around(range, margin, len)
    }

    /// A grid of `len` points on `[lo - pad, hi + pad]`.
    ///
    /// The padding is at least `margin`, and never smaller than `len` units in the last place
    /// of the endpoints, so large tightly clustered spectra still get distinct grid points.
    /// A zero-width spectrum with no margin is padded by half a unit.
    pub fn around((lo, hi): (f64, f64), margin: f64, len: usize) -> Result<Self, SlqError> {
        let scale = lo.abs().max(hi.abs());
        let mut pad = margin.max(f64::EPSILON * scale * len as f64);
        if hi == lo && margin <= 0.0 {
            pad = pad.max(0.5);
        }
        Self::uniform(lo - pad, hi + pad, len)
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn min(&self) -> f64 {
        self.points[0]
    }

    pub fn max(&self) -> f64 {
        self.points[self.points.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn spacing(&self) -> f64 {
        self.points[1] - self.points[0]
    }
}

/// The smallest and largest Ritz value over all runs.
pub fn spectral_range<'a>(runs: impl IntoIterator<Item = &'a RitzPairs>) -> Option<(f64, f64)> {
    runs.into_iter()
        .filter(|r| !r.is_empty())
        .map(|r| (r.min(), r.max()))
        .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
}

/// Rule for the Gaussian bandwidth `σ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Bandwidth {
    /// A fixed `σ`.
    Fixed { sigma: f64 },
    /// `σ^2 = sigma_squared * max(1, λ_max - λ_min)`, derived from the range of the Ritz values.
    RangeScaled { sigma_squared: f64 },
    /// `σ = multiple * Δx`, derived from the grid spacing.
    GridSpacing { multiple: f64 },
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::RangeScaled {
            sigma_squared: 1e-5,
        }
    }
}

impl Bandwidth {
    /// Resolves the rule to a concrete `σ` on `grid`, for Ritz values spanning `range`.
    pub fn sigma(&self, grid: &Grid, (lo, hi): (f64, f64)) -> f64 {
        match *self {
            Bandwidth::Fixed { sigma } => sigma,
            Bandwidth::RangeScaled { sigma_squared } => {
                (sigma_squared * (hi - lo).max(1.0)).sqrt()
            }
            Bandwidth::GridSpacing { multiple } => multiple * grid.spacing(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SlqError> {
        let (name, value) = match *self {
            Bandwidth::Fixed { sigma } => ("sigma", sigma),
            Bandwidth::RangeScaled { sigma_squared } => ("sigma_squared", sigma_squared),
            Bandwidth::GridSpacing { multiple } => ("multiple", multiple),
        };
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(
                SlqErrorKind::input(format!("bandwidth {name} must be positive, got {value}"))
                    .into(),
            )
        }
    }
}

/// How the averaged curve is scaled before it is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Integrates to one over the grid.
    #[default]
    Unit,
    /// Integrates to the operator dimension `n`, the total number of eigenvalues.
    SpectralMass,
    /// The plain average of the smoothed rules.
    Raw,
}

/// Evaluates `Σ_i τ_i^2 N(x - θ_i; σ)` at every grid point.
pub fn smooth(ritz: &RitzPairs, grid: &[f64], sigma: f64) -> Vec<f64> {
    grid.iter()
        .map(|&x| {
            ritz.iter()
                .map(|(theta, weight)| weight * gaussian_kernel(x - theta, sigma))
                .sum()
        })
        .collect()
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .sum()
}

/// Scales `density` in place according to `normalization`.
pub fn normalize(density: &mut [f64], grid: &[f64], normalization: Normalization, dim: usize) {
    let target = match normalization {
        Normalization::Raw => return,
        Normalization::Unit => 1.0,
        Normalization::SpectralMass => dim as f64,
    };
    let mass = trapezoid(grid, density);
    if mass > 0.0 {
        let scale = target / mass;
        density.iter_mut().for_each(|y| *y *= scale);
    }
}

/// Running average of smoothed Ritz rules on a fixed grid.
#[derive(Debug, Clone)]
pub struct SpectralDensity {
    grid: Grid,
    sigma: f64,
    mean: Vec<f64>,
    runs: usize,
}

impl SpectralDensity {
    pub fn new(grid: Grid, sigma: f64) -> Self {
        let mean = vec![0.0; grid.len()];
        Self {
            grid,
            sigma,
            mean,
            runs: 0,
        }
    }

    /// Folds one run into the equally-weighted average.
    pub fn accumulate(&mut self, ritz: &RitzPairs) {
        let curve = smooth(ritz, self.grid.points(), self.sigma);
        self.runs += 1;
        let k = self.runs as f64;
        for (mean, y) in self.mean.iter_mut().zip(curve) {
            *mean += (y - *mean) / k;
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    /// The unnormalized running average.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }
}
