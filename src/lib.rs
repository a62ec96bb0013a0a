//! Greedy Hilbert coreset construction.
//!
//! Compresses a large collection of vectors into a small weighted subset
//! whose weighted sum approximates the full sum within a provable, shrinking
//! error bound. Downstream consumers run on the nonzero-weight vectors in
//! place of the full collection.
//!
//! Three selection/update policies share one incremental driver:
//! Frank-Wolfe (convex-combination steps), GIGA (geodesic steps over unit
//! directions) and matching pursuit (exact two-coefficient steps). GIGA can
//! delegate candidate selection to a [`CapTree`], a branch-and-bound
//! spherical-cap index that returns the same index as an exhaustive scan in
//! expected sub-linear time.
//!
//! ```
//! use hilbert_coresets::GreedyCoreset;
//!
//! let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
//! let mut alg = GreedyCoreset::giga(rows).unwrap();
//! alg.run(2);
//! assert!(alg.error() < 1e-9);
//! ```

pub mod captree;
pub mod coreset;
pub mod math;
mod policy;
pub mod vector_set;

pub use captree::CapTree;
pub use coreset::{CoresetConfig, GreedyCoreset, PolicyKind, SelectionMethod};
pub use vector_set::VectorSet;

/// Errors that can occur when building a vector set, cap tree or coreset.
#[derive(thiserror::Error, Debug)]
pub enum CoresetError {
    /// Returned when input rows or directions do not share one dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Returned when the input data is unusable before any numeric work.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
