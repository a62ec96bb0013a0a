use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::math::{clamp_cos, dot, l2_norm_sqr, normalize};
use crate::CoresetError;

/// Score returned by the lower bound when the representative direction is
/// anti-parallel (or numerically indistinguishable from anti-parallel) to a
/// query direction. Strictly below the search floor, so a degenerate node can
/// never become the answer.
const LOWER_BOUND_FAILURE: f64 = -3.0;

/// Initial best score for a search; below every attainable lower bound.
const SEARCH_FLOOR: f64 = -2.0;

/// Threshold under which a representative counts as anti-parallel to the
/// estimate direction and its tangent direction is numerically unstable.
const ANTIPARALLEL_EPS: f64 = 1e-14;

/// Accepted deviation of squared norms from 1 for input directions.
const UNIT_NORM_TOL: f64 = 1e-9;

/// Lower-bound correlation score of a single unit direction `y` against a
/// query pair, or `None` when the configuration is degenerate: `y` parallel
/// or anti-parallel to `estimate` leaves no well-defined tangent direction.
pub(crate) fn direction_score(y: &[f64], residual: &[f64], estimate: &[f64]) -> Option<f64> {
    let bu = dot(y, residual);
    let bv = dot(y, estimate);
    if 1.0 - bv * bv <= 0.0 || bv <= -1.0 + ANTIPARALLEL_EPS {
        return None;
    }
    Some(bu / (1.0 - bv * bv).sqrt())
}

/// One spherical cap: a region of the unit hypersphere covering every member
/// direction assigned to this node.
#[derive(Debug, Clone)]
pub(crate) struct CapNode {
    /// Anchor direction, a renormalized mean of the member directions.
    pub(crate) xi: Vec<f64>,
    /// Member direction closest to the anchor; evaluates the lower bound.
    pub(crate) y: Vec<f64>,
    /// Cosine of the cap half-angle; every member satisfies `<y_i, xi> >= r`.
    pub(crate) r: f64,
    /// Original index of the member this node resolves to.
    pub(crate) ny: usize,
    /// Child node ids; `None` for a leaf.
    pub(crate) children: Option<(usize, usize)>,
}

impl CapNode {
    fn leaf(dir: &[f64], label: usize) -> Self {
        Self {
            xi: dir.to_vec(),
            y: dir.to_vec(),
            r: 1.0,
            ny: label,
            children: None,
        }
    }
}

/// Counters describing one branch-and-bound search.
#[derive(Debug, Default, Clone)]
pub(crate) struct SearchDiagnostics {
    /// Upper- and lower-bound evaluations performed.
    pub bound_evals: u64,
    /// Nodes popped from the queue and evaluated.
    pub visited: u64,
    /// Nodes discarded without evaluation when the search terminated.
    pub pruned: u64,
}

#[derive(Debug, Clone)]
struct HeapEntry {
    bound: f64,
    node: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.bound.to_bits() == other.bound.to_bits() && self.node == other.node
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Balanced binary spatial index over unit directions, supporting exact
/// branch-and-bound search for the direction maximizing the lower-bound
/// correlation functional relative to a query pair.
///
/// The tree is built once and never mutated afterwards, so concurrent
/// read-only searches are safe; each search owns its local priority queue.
#[derive(Debug, Clone)]
pub struct CapTree {
    nodes: Vec<CapNode>,
    dim: usize,
    len: usize,
    build_cost: u64,
}

impl CapTree {
    /// Build a tree over unit directions, indexed 0..N in input order.
    pub fn build(dirs: &[Vec<f64>]) -> Result<Self, CoresetError> {
        let labels: Vec<usize> = (0..dirs.len()).collect();
        Self::build_labeled(dirs, &labels)
    }

    /// Build a tree whose leaves resolve to caller-provided labels instead
    /// of positions, so a caller holding a filtered direction list can map
    /// results back to its own index space.
    pub(crate) fn build_labeled(dirs: &[Vec<f64>], labels: &[usize]) -> Result<Self, CoresetError> {
        if dirs.is_empty() {
            return Err(CoresetError::InvalidInput(
                "cap tree requires at least one direction",
            ));
        }
        debug_assert_eq!(dirs.len(), labels.len());
        let dim = dirs[0].len();
        for dir in dirs {
            if dir.len() != dim {
                return Err(CoresetError::DimensionMismatch {
                    expected: dim,
                    got: dir.len(),
                });
            }
            if (l2_norm_sqr(dir) - 1.0).abs() > UNIT_NORM_TOL {
                return Err(CoresetError::InvalidInput(
                    "cap tree directions must be unit length",
                ));
            }
        }

        let mut tree = Self {
            nodes: Vec::with_capacity(2 * dirs.len()),
            dim,
            len: dirs.len(),
            build_cost: 0,
        };
        let members: Vec<usize> = (0..dirs.len()).collect();
        tree.build_node(dirs, labels, members);
        debug!(
            members = tree.len,
            nodes = tree.nodes.len(),
            cost = tree.build_cost,
            "cap tree built"
        );
        Ok(tree)
    }

    fn build_node(&mut self, dirs: &[Vec<f64>], labels: &[usize], members: Vec<usize>) -> usize {
        if members.len() == 1 {
            let i = members[0];
            let id = self.nodes.len();
            self.nodes.push(CapNode::leaf(&dirs[i], labels[i]));
            return id;
        }

        // Robust mean direction of the members; an exactly cancelling mean
        // falls back to the first member so the anchor stays on the sphere.
        let mut xi = vec![0.0f64; self.dim];
        for &i in &members {
            for (acc, value) in xi.iter_mut().zip(dirs[i].iter()) {
                *acc += value;
            }
        }
        if normalize(&mut xi) == 0.0 {
            xi.copy_from_slice(&dirs[members[0]]);
        }

        let dots: Vec<f64> = members.iter().map(|&i| dot(&dirs[i], &xi)).collect();
        self.build_cost += members.len() as u64;

        // Closest member evaluates the tight lower bound; the farthest sets
        // the cap radius and seeds one split anchor.
        let n_y = argmax(&dots);
        let n_l = argmin(&dots);
        let y = dirs[members[n_y]].clone();
        let ny = labels[members[n_y]];
        let r = clamp_cos(dots[n_l]);

        let anchor_l = &dirs[members[n_l]];
        let dots_l: Vec<f64> = members.iter().map(|&i| dot(&dirs[i], anchor_l)).collect();
        let n_r = argmin(&dots_l);
        let anchor_r = &dirs[members[n_r]];
        let dots_r: Vec<f64> = members.iter().map(|&i| dot(&dirs[i], anchor_r)).collect();
        self.build_cost += 2 * members.len() as u64;

        let mut right = Vec::new();
        let mut left = Vec::new();
        for (pos, &i) in members.iter().enumerate() {
            if dots_r[pos] > dots_l[pos] {
                right.push(i);
            } else {
                left.push(i);
            }
        }
        if right.is_empty() || left.is_empty() {
            // Exactly colinear members land on one side; a positional
            // bisection keeps both children non-empty.
            let half = members.len() / 2;
            right = members[..half].to_vec();
            left = members[half..].to_vec();
        }

        let id = self.nodes.len();
        self.nodes.push(CapNode {
            xi,
            y,
            r,
            ny,
            children: None,
        });
        let left_id = self.build_node(dirs, labels, left);
        let right_id = self.build_node(dirs, labels, right);
        self.nodes[id].children = Some((left_id, right_id));
        id
    }

    /// Number of member directions.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the tree indexes no directions. Construction rejects
    /// empty input, so this is false for every built tree.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of tree nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Inner products spent during construction.
    pub fn build_cost(&self) -> u64 {
        self.build_cost
    }

    /// Exact branch-and-bound search for the member index maximizing the
    /// lower-bound correlation functional for the query pair.
    ///
    /// Both query directions must be unit length and `residual` must be
    /// orthogonal to `estimate` (callers obtain it by projecting the target
    /// off the estimate), which keeps every attainable score within
    /// `[-1, 1]`. Returns `None` when every representative is degenerate
    /// with respect to the query pair.
    pub fn search(&self, residual: &[f64], estimate: &[f64]) -> Option<usize> {
        self.search_internal(residual, estimate, None)
    }

    fn search_internal(
        &self,
        residual: &[f64],
        estimate: &[f64],
        mut diagnostics: Option<&mut SearchDiagnostics>,
    ) -> Option<usize> {
        debug_assert_eq!(residual.len(), self.dim);
        debug_assert_eq!(estimate.len(), self.dim);

        let mut best = None;
        let mut best_score = SEARCH_FLOOR;
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        heap.push(HeapEntry {
            bound: self.upper_bound(0, residual, estimate),
            node: 0,
        });
        if let Some(diag) = diagnostics.as_deref_mut() {
            diag.bound_evals += 1;
        }

        while let Some(HeapEntry { bound, node }) = heap.pop() {
            if bound <= best_score {
                // The queue is ordered by upper bound, so no remaining node
                // can beat the current best.
                if let Some(diag) = diagnostics.as_deref_mut() {
                    diag.pruned += 1 + heap.len() as u64;
                }
                break;
            }
            let ell = self.lower_bound(node, residual, estimate);
            if let Some(diag) = diagnostics.as_deref_mut() {
                diag.visited += 1;
                diag.bound_evals += 1;
            }
            if ell > best_score {
                best_score = ell;
                best = Some(self.nodes[node].ny);
            }
            if let Some((left, right)) = self.nodes[node].children {
                heap.push(HeapEntry {
                    bound: self.upper_bound(left, residual, estimate),
                    node: left,
                });
                heap.push(HeapEntry {
                    bound: self.upper_bound(right, residual, estimate),
                    node: right,
                });
                if let Some(diag) = diagnostics.as_deref_mut() {
                    diag.bound_evals += 2;
                }
            }
        }
        best
    }

    /// Upper bound on the lower-bound functional over every member of the
    /// node's cap, from spherical-cap trigonometry on the anchor direction.
    fn upper_bound(&self, node: usize, residual: &[f64], estimate: &[f64]) -> f64 {
        let cap = &self.nodes[node];
        let bu = dot(&cap.xi, residual);
        let bv = dot(&cap.xi, estimate);
        let b = (1.0 - bu * bu - bv * bv).max(0.0).sqrt();
        let rv = (cap.r * cap.r - bv * bv).max(0.0).sqrt();
        let r1 = (1.0 - cap.r * cap.r).max(0.0).sqrt();
        if bv.abs() > cap.r || bu >= rv {
            // The trigonometric expression is not applicable; 1 is the
            // global maximum of the functional and always safe.
            1.0
        } else {
            (bu * rv + b * r1) / (b * b + bu * bu)
        }
    }

    /// True functional value at the node's representative, or the failure
    /// sentinel when the representative is degenerate for this query pair.
    fn lower_bound(&self, node: usize, residual: &[f64], estimate: &[f64]) -> f64 {
        let cap = &self.nodes[node];
        direction_score(&cap.y, residual, estimate).unwrap_or(LOWER_BOUND_FAILURE)
    }

    #[cfg(test)]
    pub(crate) fn search_with_diagnostics(
        &self,
        residual: &[f64],
        estimate: &[f64],
    ) -> (Option<usize>, SearchDiagnostics) {
        let mut diagnostics = SearchDiagnostics::default();
        let result = self.search_internal(residual, estimate, Some(&mut diagnostics));
        (result, diagnostics)
    }

    /// Exhaustive reference evaluation of the lower bound at every member.
    #[cfg(test)]
    pub(crate) fn search_naive(&self, residual: &[f64], estimate: &[f64]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for node in self.nodes.iter().filter(|node| node.children.is_none()) {
            let Some(score) = direction_score(&node.y, residual, estimate) else {
                continue;
            };
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((node.ny, score)),
            }
        }
        best.map(|(ny, _)| ny)
    }

    #[cfg(test)]
    pub(crate) fn nodes(&self) -> &[CapNode] {
        &self.nodes
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = i;
        }
    }
    best
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value < values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(dim: usize, k: usize, sign: f64) -> Vec<f64> {
        let mut v = vec![0.0; dim];
        v[k] = sign;
        v
    }

    #[test]
    fn direction_score_flags_degenerate_configurations() {
        let residual = axis(2, 1, 1.0);
        let estimate = axis(2, 0, 1.0);
        // Parallel to the estimate: tangent direction undefined.
        assert!(direction_score(&axis(2, 0, 1.0), &residual, &estimate).is_none());
        // Anti-parallel: numerically unstable.
        assert!(direction_score(&axis(2, 0, -1.0), &residual, &estimate).is_none());
        // Orthogonal representative scores its residual alignment exactly.
        let score = direction_score(&axis(2, 1, 1.0), &residual, &estimate).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn leaf_upper_bound_dominates_lower_bound() {
        let tree = CapTree::build(&[axis(3, 2, 1.0)]).unwrap();
        let estimate = axis(3, 0, 1.0);
        let residual = axis(3, 1, 1.0);
        let ub = tree.upper_bound(0, &residual, &estimate);
        let lb = tree.lower_bound(0, &residual, &estimate);
        assert!(ub >= lb);
    }

    #[test]
    fn degenerate_lower_bound_never_beats_floor() {
        let tree = CapTree::build(&[axis(2, 0, -1.0)]).unwrap();
        let lb = tree.lower_bound(0, &axis(2, 1, 1.0), &axis(2, 0, 1.0));
        assert_eq!(lb, LOWER_BOUND_FAILURE);
        assert!(lb < SEARCH_FLOOR);
    }
}
