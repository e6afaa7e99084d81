use thiserror::Error;

/// Error type for dense tensor operations in tnr-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Data length {len} does not match shape {dims:?} (expected {expected})")]
    ShapeMismatch {
        dims: Vec<usize>,
        len: usize,
        expected: usize,
    },

    #[error("Index dimensions differ: {0} vs {1}")]
    DimensionMismatch(usize, usize),

    #[error("Axis {axis} is out of range or repeated for tensor of rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    #[error("Invalid permutation {perm:?} for tensor of rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    #[error("Axis lists have different lengths: {0} vs {1}")]
    AxisCountMismatch(usize, usize),

    #[error("Tensor of rank {0} is not a scalar")]
    NotScalar(usize),

    #[error("Tensor of rank {0} has no non-trivial bipartition")]
    NoBipartition(usize),

    #[error("SVD computation failed: {0}")]
    Svd(String),
}

/// Result alias used throughout tnr-core.
pub type Result<T> = std::result::Result<T, CoreError>;
