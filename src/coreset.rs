use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::math::l2_distance_sqr;
use crate::policy::{FrankWolfe, Giga, Pursuit, SelectionPolicy};
use crate::vector_set::VectorSet;
use crate::CoresetError;

/// Selection/update policy driving the greedy construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Convex-combination updates via exact line search.
    FrankWolfe,
    /// Geodesic updates over unit directions.
    Giga,
    /// Matching-pursuit updates with an exact two-coefficient solve.
    Pursuit,
}

/// Candidate search strategy for direction-based selection.
///
/// Honored by [`PolicyKind::Giga`]; the other policies are defined on raw
/// vectors and always scan the full candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMethod {
    /// Score every candidate; O(N * D) per iteration.
    Exhaustive,
    /// Branch-and-bound over a spherical cap tree; same result, expected
    /// sub-linear in N.
    CapTree,
}

/// Configuration for [`GreedyCoreset`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoresetConfig {
    pub policy: PolicyKind,
    pub selection: SelectionMethod,
}

impl CoresetConfig {
    pub fn new(policy: PolicyKind) -> Self {
        Self {
            policy,
            selection: SelectionMethod::Exhaustive,
        }
    }

    /// Switch candidate selection to the cap tree index.
    pub fn with_cap_tree(mut self) -> Self {
        self.selection = SelectionMethod::CapTree;
        self
    }
}

impl Default for CoresetConfig {
    fn default() -> Self {
        Self::new(PolicyKind::Giga)
    }
}

/// Greedy incremental coreset builder.
///
/// Owns the immutable [`VectorSet`] plus the only mutable state of the
/// construction: the nonnegative weight vector, the running weighted sum and
/// the iteration counter. Each `run` iteration asks the configured policy
/// for a candidate index and blend coefficients, then applies
/// `xw <- alpha * xw + beta * x_f`, rescaling the existing weight mass by
/// `alpha` and adding `beta` to the weight of the chosen index. The same
/// index may be revisited across iterations, accumulating weight.
#[derive(Debug)]
pub struct GreedyCoreset {
    set: VectorSet,
    policy: Box<dyn SelectionPolicy>,
    weights: Vec<f64>,
    approx: Vec<f64>,
    m: usize,
    converged: bool,
}

impl GreedyCoreset {
    /// Build a coreset construction over the given row vectors.
    ///
    /// Validates the rows (rectangular, finite) before any numeric work and
    /// precomputes everything the configured policy needs.
    pub fn new(rows: Vec<Vec<f64>>, config: CoresetConfig) -> Result<Self, CoresetError> {
        let set = VectorSet::from_rows(rows)?;
        let policy: Box<dyn SelectionPolicy> = match config.policy {
            PolicyKind::FrankWolfe => Box::new(FrankWolfe),
            PolicyKind::Giga => Box::new(Giga::new(&set, config.selection)?),
            PolicyKind::Pursuit => Box::new(Pursuit),
        };
        let weights = vec![0.0; set.len()];
        let approx = vec![0.0; set.dim()];
        let converged = Self::degenerate(&set);
        Ok(Self {
            set,
            policy,
            weights,
            approx,
            m: 0,
            converged,
        })
    }

    /// Frank-Wolfe construction with the default exhaustive selection.
    pub fn frank_wolfe(rows: Vec<Vec<f64>>) -> Result<Self, CoresetError> {
        Self::new(rows, CoresetConfig::new(PolicyKind::FrankWolfe))
    }

    /// GIGA construction with the default exhaustive selection.
    pub fn giga(rows: Vec<Vec<f64>>) -> Result<Self, CoresetError> {
        Self::new(rows, CoresetConfig::new(PolicyKind::Giga))
    }

    /// Matching-pursuit construction.
    pub fn pursuit(rows: Vec<Vec<f64>>) -> Result<Self, CoresetError> {
        Self::new(rows, CoresetConfig::new(PolicyKind::Pursuit))
    }

    /// An empty or zero-sum set leaves nothing to approximate.
    fn degenerate(set: &VectorSet) -> bool {
        set.is_empty() || set.sum_norm() <= 0.0
    }

    /// Run the construction up to `target_m` iterations and return the
    /// iteration count actually reached.
    ///
    /// Progress is incremental: a second call continues where the first left
    /// off, and a target at or below the current count is a no-op (progress
    /// is never rewound). When the policy reports that no candidate can
    /// improve the approximation the loop stops early; this is convergence,
    /// not failure, and later calls remain no-ops.
    pub fn run(&mut self, target_m: usize) -> usize {
        while self.m < target_m && !self.converged {
            let Some(f) = self.policy.select(&self.set, &self.approx, self.m) else {
                self.converged = true;
                break;
            };
            let Some((alpha, beta)) = self.policy.step_coeffs(&self.set, &self.approx, self.m, f)
            else {
                self.converged = true;
                break;
            };
            let xf = self.set.vector(f);
            for (acc, value) in self.approx.iter_mut().zip(xf.iter()) {
                *acc = alpha * *acc + beta * *value;
            }
            for weight in self.weights.iter_mut() {
                *weight *= alpha;
            }
            self.weights[f] += beta;
            self.m += 1;
            trace!(m = self.m, f, alpha, beta, "applied greedy update");
        }
        if self.converged && self.m < target_m {
            debug!(m = self.m, target_m, "construction converged early");
        }
        self.m
    }

    /// Current weight vector, one entry per input vector. Nonzero entries
    /// form the coreset. The slice reflects the state as of this call only.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterations completed so far.
    pub fn iterations(&self) -> usize {
        self.m
    }

    /// Whether the policy has signalled that no further improvement is
    /// possible.
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Current approximation error `||xw - xs||`.
    pub fn error(&self) -> f64 {
        l2_distance_sqr(&self.approx, self.set.sum()).sqrt()
    }

    /// Drop all progress: weights to zero, iteration counter to zero. The
    /// vector set and any cap tree are untouched.
    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.approx.iter_mut().for_each(|v| *v = 0.0);
        self.m = 0;
        self.converged = Self::degenerate(&self.set);
    }

    /// `1/sqrt(m)`-type error bound evaluated at the current iteration.
    pub fn sqrt_bound(&self) -> f64 {
        self.policy.sqrt_bound(&self.set, self.m as f64)
    }

    /// `1/sqrt(m)`-type error bound evaluated at an arbitrary iteration
    /// count.
    pub fn sqrt_bound_at(&self, m: f64) -> f64 {
        self.policy.sqrt_bound(&self.set, m)
    }

    /// Geometrically decaying error bound evaluated at the current
    /// iteration.
    pub fn exp_bound(&self) -> f64 {
        self.policy.exp_bound(&self.set, self.m as f64)
    }

    /// Geometrically decaying error bound evaluated at an arbitrary
    /// iteration count.
    pub fn exp_bound_at(&self, m: f64) -> f64 {
        self.policy.exp_bound(&self.set, m)
    }

    /// The underlying vector set.
    pub fn vector_set(&self) -> &VectorSet {
        &self.set
    }
}
