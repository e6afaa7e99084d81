//! Options for TreeTensor operations.
//!
//! Provides:
//! - [`TreeTensorOptions`]: accuracy target, rank cap and loop strategy
//! - [`LoopStrategy`]: which Cut procedure loop elimination uses

use tnr_core::{HasTruncationParams, TruncationParams};

use crate::treetensor::{EnvironmentCut, LoopCutter, UtilityGuidedCut};

/// Cut procedure used by loop elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopStrategy {
    /// Weight the loop's legs by its environment and open the ring into a
    /// chain, with the error budget corrected by the environment's own cycles.
    #[default]
    Environment,
    /// Shrink the loop one local move at a time, choosing the move of highest
    /// cost utility.
    UtilityGuided,
}

impl LoopStrategy {
    /// Instantiate the cutter for this strategy.
    pub fn cutter(&self) -> Box<dyn LoopCutter> {
        match self {
            LoopStrategy::Environment => Box::new(EnvironmentCut::new()),
            LoopStrategy::UtilityGuided => Box::new(UtilityGuidedCut::new()),
        }
    }
}

/// Options carried by every [`crate::TreeTensor`].
///
/// # Builder Pattern
///
/// ```ignore
/// let options = TreeTensorOptions::default()
///     .with_accuracy(1e-3)
///     .with_loop_strategy(LoopStrategy::UtilityGuided);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeTensorOptions {
    /// Truncation parameters; `rtol` is the accuracy target.
    pub truncation: TruncationParams,
    /// Cut procedure for loop elimination.
    pub loop_strategy: LoopStrategy,
}

impl HasTruncationParams for TreeTensorOptions {
    fn truncation_params(&self) -> &TruncationParams {
        &self.truncation
    }

    fn truncation_params_mut(&mut self) -> &mut TruncationParams {
        &mut self.truncation
    }
}

impl TreeTensorOptions {
    /// Create options with default settings (exact, environment cuts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accuracy target (maximum relative error per truncation).
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.truncation.rtol = Some(accuracy);
        self
    }

    /// Set a maximum bond dimension.
    pub fn with_max_rank(mut self, rank: usize) -> Self {
        self.truncation.max_rank = Some(rank);
        self
    }

    /// Set the loop elimination strategy.
    pub fn with_loop_strategy(mut self, strategy: LoopStrategy) -> Self {
        self.loop_strategy = strategy;
        self
    }

    /// Accuracy target (0 if unset).
    pub fn accuracy(&self) -> f64 {
        self.truncation.effective_rtol(tnr_core::DEFAULT_RTOL)
    }
}
