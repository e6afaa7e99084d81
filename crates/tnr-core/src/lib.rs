//! Dense building blocks for tree tensor networks.
//!
//! - [`ArrayTensor`]: row-major `f64` tensor with a logarithmic scale factor
//! - [`ArrayTensor::svd_split`]: accuracy-bounded factorization into two tensors
//! - [`min_entropy_bipartition`]: index bipartition of minimum entanglement entropy
//! - [`TruncationParams`]: accuracy target and rank cap shared by all truncations

pub mod array_tensor;
mod dense;
pub mod entropy;
pub mod error;
pub mod svd;
pub mod truncation;

pub use array_tensor::{ArrayTensor, SvdSplit};
pub use entropy::{canonical_side, min_entropy_bipartition};
pub use error::{CoreError, Result};
pub use svd::{entanglement_entropy, svd_row_major, truncation_rank, MatrixSvd};
pub use truncation::{HasTruncationParams, TruncationParams, DEFAULT_RTOL};
