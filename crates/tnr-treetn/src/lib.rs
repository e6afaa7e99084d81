//! Tree tensor network engine.
//!
//! - [`Network`]: tensors joined by links between index buckets
//! - [`TreeTensor`]: network-backed tensor kept cycle-free by loop elimination
//! - [`LoopCutter`]: pluggable Cut step ([`EnvironmentCut`], [`UtilityGuidedCut`])
//! - [`TreeTensor::optimize`]: link optimization along minimum-entropy bipartitions
//! - [`Diagnostics`]: caller-supplied instrumentation
//!
//! # Example
//!
//! ```ignore
//! use tnr_core::ArrayTensor;
//! use tnr_treetn::{TreeTensor, TreeTensorOptions};
//!
//! let options = TreeTensorOptions::default().with_accuracy(1e-6);
//! let a = TreeTensor::from_array(ArrayTensor::identity(3), options);
//! let b = TreeTensor::from_array(ArrayTensor::identity(3), options);
//! let c = a.contract(&[1], &b, &[0])?;
//! assert_eq!(c.shape(), vec![3, 3]);
//! ```

pub mod diagnostics;
pub mod error;
pub mod network;
pub mod options;
pub mod tensor_like;
pub mod treetensor;

pub use diagnostics::{DiagnosticCounters, Diagnostics, NoDiagnostics};
pub use error::{NetworkError, TreeTensorError};
pub use network::{Bucket, BucketId, Link, Network, Node, SplitOutcome};
pub use options::{LoopStrategy, TreeTensorOptions};
pub use tensor_like::{AnyTensor, TensorLike};
pub use treetensor::{
    artificial_cut, EnvironmentCut, LoopCutter, LoopEnvironment, OptimizeReport, TreeTensor,
    UtilityGuidedCut,
};

pub use petgraph::stable_graph::{EdgeIndex, NodeIndex};
pub use tnr_core::{ArrayTensor, TruncationParams};
