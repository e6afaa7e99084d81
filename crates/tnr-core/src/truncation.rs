//! Common truncation options and traits.
//!
//! This module provides the parameters shared by every accuracy-bounded
//! factorization in the workspace: node splits, loop cuts and link
//! optimization all read the same [`TruncationParams`].

/// Relative tolerance used when no accuracy target has been set.
pub const DEFAULT_RTOL: f64 = 0.0;

/// Common truncation parameters.
///
/// # Semantics
///
/// This crate uses **relative discarded weight** semantics:
/// - The kept bond dimension `k` is the smallest value such that
///   `sqrt(Σ_{i≥k} σ_i²) / sqrt(Σ_i σ_i²) <= rtol`
///
/// `rtol = 0` keeps every non-zero singular value, so the factorization is exact
/// up to floating point rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TruncationParams {
    /// Maximum tolerated relative error of a single truncation.
    ///
    /// If `None`, uses [`DEFAULT_RTOL`].
    pub rtol: Option<f64>,

    /// Maximum rank (bond dimension).
    ///
    /// If `None`, no rank limit is applied.
    pub max_rank: Option<usize>,
}

impl TruncationParams {
    /// Create new truncation parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    #[must_use]
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = Some(rtol);
        self
    }

    /// Set the maximum rank.
    #[must_use]
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = Some(max_rank);
        self
    }

    /// Get the effective rtol, using the provided default if not set.
    #[must_use]
    pub fn effective_rtol(&self, default: f64) -> f64 {
        self.rtol.unwrap_or(default)
    }

    /// Get the effective max_rank, using usize::MAX if not set.
    #[must_use]
    pub fn effective_max_rank(&self) -> usize {
        self.max_rank.unwrap_or(usize::MAX)
    }

    /// Return a copy whose tolerance is divided by `factor`.
    ///
    /// Used to tighten the local error budget when a truncation is only
    /// measured against an approximate environment.
    #[must_use]
    pub fn tightened(&self, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 { factor } else { 1.0 };
        Self {
            rtol: Some(self.effective_rtol(DEFAULT_RTOL) / factor),
            max_rank: self.max_rank,
        }
    }

    /// Merge with another set of parameters, preferring self's values.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            rtol: self.rtol.or(other.rtol),
            max_rank: self.max_rank.or(other.max_rank),
        }
    }
}

/// Trait for types that contain truncation parameters.
pub trait HasTruncationParams {
    /// Get a reference to the truncation parameters.
    fn truncation_params(&self) -> &TruncationParams;

    /// Get a mutable reference to the truncation parameters.
    fn truncation_params_mut(&mut self) -> &mut TruncationParams;

    /// Get the rtol value.
    fn rtol(&self) -> Option<f64> {
        self.truncation_params().rtol
    }

    /// Get the max_rank value.
    fn max_rank(&self) -> Option<usize> {
        self.truncation_params().max_rank
    }

    /// Set the rtol value (builder pattern).
    fn with_rtol(mut self, rtol: f64) -> Self
    where
        Self: Sized,
    {
        self.truncation_params_mut().rtol = Some(rtol);
        self
    }

    /// Set the max_rank value (builder pattern).
    fn with_max_rank(mut self, max_rank: usize) -> Self
    where
        Self: Sized,
    {
        self.truncation_params_mut().max_rank = Some(max_rank);
        self
    }
}

impl HasTruncationParams for TruncationParams {
    fn truncation_params(&self) -> &TruncationParams {
        self
    }

    fn truncation_params_mut(&mut self) -> &mut TruncationParams {
        self
    }
}
