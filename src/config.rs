//! Typed configuration for Lanczos runs and density aggregation.
//!
//! All structs implement [`Default`] with the values used throughout the experiments and
//! derive `serde` traits, so an embedding application can keep them in whatever settings
//! file it already has.

use crate::density::{Bandwidth, Normalization};
use crate::error::{SlqError, SlqErrorKind};
use serde::{Deserialize, Serialize};

/// Parameters of a single Lanczos run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanczosConfig {
    /// Requested number of Lanczos steps `m`. Clamped to the operator dimension.
    pub order: usize,
    /// Relative breakdown tolerance: the run stops when `β_i <= tolerance * ‖H v_i‖`.
    pub tolerance: f64,
    /// Full reorthogonalization against every stored basis vector.
    /// Disabling it leaves the bare three-term recurrence and is only meant for diagnostics.
    pub reorthogonalize: bool,
}

impl Default for LanczosConfig {
    fn default() -> Self {
        Self {
            order: 90,
            tolerance: 1e-10,
            reorthogonalize: true,
        }
    }
}

impl LanczosConfig {
    pub fn with_order(order: usize) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SlqError> {
        if self.order == 0 {
            return Err(SlqErrorKind::input("Lanczos order must be at least 1.").into());
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(SlqErrorKind::input(format!(
                "breakdown tolerance must be finite and non-negative, got {}",
                self.tolerance
            ))
            .into());
        }
        Ok(())
    }
}

/// How the evaluation grid of the density is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GridSpec {
    /// Spans `[min θ - margin, max θ + margin]` over every Ritz value seen so far.
    Auto { len: usize, margin: f64 },
    /// A caller-fixed interval. Never rebuilt as runs are added.
    Fixed { min: f64, max: f64, len: usize },
}

impl Default for GridSpec {
    fn default() -> Self {
        GridSpec::Auto {
            len: 10_000,
            margin: 0.01,
        }
    }
}

impl GridSpec {
    pub fn num_points(&self) -> usize {
        match *self {
            GridSpec::Auto { len, .. } | GridSpec::Fixed { len, .. } => len,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SlqError> {
        match *self {
            GridSpec::Auto { len, margin } => {
                if len < 2 {
                    return Err(SlqErrorKind::input("grid needs at least 2 points").into());
                }
                if !(margin.is_finite() && margin >= 0.0) {
                    return Err(SlqErrorKind::input(format!(
                        "grid margin must be finite and non-negative, got {margin}"
                    ))
                    .into());
                }
            }
            GridSpec::Fixed { min, max, len } => {
                if len < 2 {
                    return Err(SlqErrorKind::input("grid needs at least 2 points").into());
                }
                if !(min.is_finite() && max.is_finite() && min < max) {
                    return Err(SlqErrorKind::input(format!(
                        "fixed grid bounds must satisfy min < max, got [{min}, {max}]"
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Smoothing and normalization of the aggregated density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DensityConfig {
    pub grid: GridSpec,
    pub bandwidth: Bandwidth,
    pub normalization: Normalization,
}

impl DensityConfig {
    pub(crate) fn validate(&self) -> Result<(), SlqError> {
        self.grid.validate()?;
        self.bandwidth.validate()
    }
}

/// Seeds of the independent probe runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SeedSequence {
    /// Run `k` uses `base + k * stride` (wrapping).
    Arithmetic { base: u64, stride: u64 },
    /// An explicit list; it bounds the number of runs that can be performed.
    Explicit { seeds: Vec<u64> },
}

impl Default for SeedSequence {
    fn default() -> Self {
        SeedSequence::Arithmetic { base: 0, stride: 1 }
    }
}

impl SeedSequence {
    pub fn from_base(base: u64) -> Self {
        SeedSequence::Arithmetic { base, stride: 1 }
    }

    /// Seed of run `k`, or `None` when an explicit list is exhausted.
    pub fn seed(&self, k: usize) -> Option<u64> {
        match self {
            SeedSequence::Arithmetic { base, stride } => {
                Some(base.wrapping_add((k as u64).wrapping_mul(*stride)))
            }
            SeedSequence::Explicit { seeds } => seeds.get(k).copied(),
        }
    }
}

/// Complete configuration of a stochastic Lanczos quadrature estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlqConfig {
    pub lanczos: LanczosConfig,
    pub density: DensityConfig,
    /// Number of independent probe runs of the first batch.
    pub num_runs: usize,
    pub seeds: SeedSequence,
    /// Execute runs of a batch concurrently on the rayon pool.
    pub parallel: bool,
    /// Record a failed run and continue with the others instead of aborting the batch.
    pub skip_failed_runs: bool,
}

impl Default for SlqConfig {
    fn default() -> Self {
        Self {
            lanczos: LanczosConfig::default(),
            density: DensityConfig::default(),
            num_runs: 10,
            seeds: SeedSequence::default(),
            parallel: true,
            skip_failed_runs: false,
        }
    }
}

impl SlqConfig {
    pub(crate) fn validate(&self) -> Result<(), SlqError> {
        self.lanczos.validate()?;
        self.density.validate()
    }
}
