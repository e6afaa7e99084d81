//! Typed errors for structural contract violations and invariant failures.
//!
//! Public operations return `anyhow::Result`; the errors created by this crate
//! wrap one of these enums so callers can `downcast_ref` to inspect them.

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use thiserror::Error;

use crate::network::BucketId;

/// Misuse of the network graph API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Node {0:?} not found")]
    NodeNotFound(NodeIndex),

    #[error("Bucket {0} not found")]
    BucketNotFound(BucketId),

    #[error("Link {0:?} not found")]
    LinkNotFound(EdgeIndex),

    #[error("Bucket {0} is already linked")]
    BucketLinked(BucketId),

    #[error("Buckets {0} and {1} belong to the same node; trace them instead of linking")]
    SelfLoop(BucketId, BucketId),

    #[error("Bucket {b1} has width {d1} but bucket {b2} has width {d2}")]
    DimensionMismatch {
        b1: BucketId,
        d1: usize,
        b2: BucketId,
        d2: usize,
    },

    #[error("Nodes {0:?} and {1:?} share no link")]
    NotConnected(NodeIndex, NodeIndex),

    #[error("Invalid bipartition of node {0:?}: each side needs at least one bucket of the node")]
    InvalidPartition(NodeIndex),

    #[error("Inconsistent network: {0}")]
    Inconsistent(String),
}

/// Misuse of the tree tensor API, or a broken tree invariant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeTensorError {
    #[error("Index lists have different lengths: {0} vs {1}")]
    IndexCountMismatch(usize, usize),

    #[error("Index {index} is out of range for a tensor of rank {rank}")]
    IndexOutOfRange { index: usize, rank: usize },

    #[error("Index {0} appears more than once")]
    IndexReused(usize),

    #[error("Index {index} has width {dim} but paired index {other_index} has width {other_dim}")]
    DimensionMismatch {
        index: usize,
        dim: usize,
        other_index: usize,
        other_dim: usize,
    },

    #[error("Resulting rank {actual} differs from expected rank {expected}")]
    RankMismatch { expected: usize, actual: usize },

    #[error("Network still contains {0} independent cycles")]
    Cyclic(usize),

    #[error("Loop cut did not shrink the cycle basis ({before} -> {after})")]
    NoProgress { before: usize, after: usize },

    #[error("Flattening needs at least two indices, got {0}")]
    FlattenTooFew(usize),
}
