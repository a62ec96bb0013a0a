use std::fmt;

use crate::captree::{direction_score, CapTree};
use crate::coreset::SelectionMethod;
use crate::math::{dot, l2_norm, l2_norm_sqr, normalize};
use crate::vector_set::VectorSet;
use crate::CoresetError;

/// Floor below which residual magnitudes, step gains and normal-equation
/// determinants are treated as zero.
pub(crate) const NUMERIC_TOL: f64 = 1e-14;

/// Selection and update strategy plugged into the greedy driver.
///
/// `select` and `step_coeffs` run against the shared driver state: the
/// immutable vector set, the current weighted sum `xw` and the iteration
/// counter. Coefficients are in raw-vector space — the driver always applies
/// `xw <- alpha * xw + beta * x_f` — and are nonnegative, so the weight
/// vector never goes negative. `None` from either operation means no
/// improving feasible step exists: normal convergence, not an error.
pub(crate) trait SelectionPolicy: fmt::Debug + Send + Sync {
    fn select(&self, set: &VectorSet, xw: &[f64], m: usize) -> Option<usize>;

    fn step_coeffs(&self, set: &VectorSet, xw: &[f64], m: usize, f: usize) -> Option<(f64, f64)>;

    /// Closed-form upper bound on the attainable error after `m` iterations,
    /// decaying like `1/sqrt(m)`.
    fn sqrt_bound(&self, set: &VectorSet, m: f64) -> f64;

    /// Closed-form geometrically decaying upper bound on the attainable
    /// error after `m` iterations.
    fn exp_bound(&self, set: &VectorSet, m: f64) -> f64;
}

/// Index of the candidate best aligned with the current residual, scored as
/// `<xs - xw, x_n> / ||x_n||`. First maximum wins; zero rows are skipped.
fn residual_alignment_argmax(set: &VectorSet, xw: &[f64]) -> Option<usize> {
    let mut residual = set.sum().to_vec();
    for (r, w) in residual.iter_mut().zip(xw.iter()) {
        *r -= w;
    }
    let mut best: Option<(usize, f64)> = None;
    for i in 0..set.len() {
        let norm = set.norm(i);
        if norm <= 0.0 {
            continue;
        }
        let score = dot(&residual, set.vector(i)) / norm;
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Optimally scaled single-direction step used by every policy while the
/// weighted sum is still empty.
fn initial_step(set: &VectorSet, f: usize) -> Option<(f64, f64)> {
    let norm = set.norm(f);
    if norm <= 0.0 {
        return None;
    }
    let beta = dot(set.sum(), set.vector(f)) / (norm * norm);
    if beta <= NUMERIC_TOL {
        return None;
    }
    Some((0.0, beta))
}

fn fw_family_sqrt_bound(set: &VectorSet, m: f64) -> f64 {
    let sigma = set.norm_total();
    if sigma <= 0.0 || set.sum_norm() <= 0.0 {
        return 0.0;
    }
    2.0 * sigma / (m.max(0.0) + 2.0).sqrt()
}

fn fw_family_exp_bound(set: &VectorSet, m: f64) -> f64 {
    let sigma = set.norm_total();
    let snorm = set.sum_norm();
    if sigma <= 0.0 || snorm <= 0.0 {
        return 0.0;
    }
    let kappa = (snorm / sigma) * (snorm / sigma);
    let nu = 1.0 - kappa / 8.0;
    2.0 * sigma * nu.powf(m.max(0.0))
}

/// Classical convex-combination coreset construction.
///
/// Selection scans every candidate for the best residual alignment; the
/// update is an exact line search toward the scaled vertex
/// `sigma * x_f / ||x_f||`, keeping the weights a nonnegative combination.
#[derive(Debug, Default)]
pub(crate) struct FrankWolfe;

impl SelectionPolicy for FrankWolfe {
    fn select(&self, set: &VectorSet, xw: &[f64], _m: usize) -> Option<usize> {
        residual_alignment_argmax(set, xw)
    }

    fn step_coeffs(&self, set: &VectorSet, xw: &[f64], _m: usize, f: usize) -> Option<(f64, f64)> {
        let norm = set.norm(f);
        if norm <= 0.0 {
            return None;
        }
        let scale = set.norm_total() / norm;
        let xf = set.vector(f);
        let xs = set.sum();
        let mut num = 0.0;
        let mut den = 0.0;
        for k in 0..xf.len() {
            let toward = scale * xf[k] - xw[k];
            num += toward * (xs[k] - xw[k]);
            den += toward * toward;
        }
        if den <= NUMERIC_TOL || num <= 0.0 {
            return None;
        }
        let gamma = (num / den).min(1.0);
        Some((1.0 - gamma, gamma * scale))
    }

    fn sqrt_bound(&self, set: &VectorSet, m: f64) -> f64 {
        fw_family_sqrt_bound(set, m)
    }

    fn exp_bound(&self, set: &VectorSet, m: f64) -> f64 {
        fw_family_exp_bound(set, m)
    }
}

/// Geodesic incremental greedy approximation over unit directions.
///
/// Selection maximizes the tangent-space alignment of each candidate
/// direction with the residual direction, either by exhaustive scan or by
/// delegating to the cap tree; both return the identical index. The update
/// projects the target direction onto the plane spanned by the current
/// estimate and the chosen candidate, then rescales so the weighted sum
/// stays the optimally scaled estimate.
pub(crate) struct Giga {
    dirs: Vec<Vec<f64>>,
    labels: Vec<usize>,
    target: Option<Vec<f64>>,
    tree: Option<CapTree>,
}

impl Giga {
    pub(crate) fn new(set: &VectorSet, selection: SelectionMethod) -> Result<Self, CoresetError> {
        let (dirs, labels) = set.unit_directions();
        let target = if set.sum_norm() > 0.0 {
            let mut t = set.sum().to_vec();
            normalize(&mut t);
            Some(t)
        } else {
            None
        };
        let tree = match selection {
            SelectionMethod::CapTree if !dirs.is_empty() => {
                Some(CapTree::build_labeled(&dirs, &labels)?)
            }
            _ => None,
        };
        Ok(Self {
            dirs,
            labels,
            target,
            tree,
        })
    }
}

impl fmt::Debug for Giga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Giga")
            .field("directions", &self.dirs.len())
            .field("tree", &self.tree.is_some())
            .finish()
    }
}

impl SelectionPolicy for Giga {
    fn select(&self, _set: &VectorSet, xw: &[f64], m: usize) -> Option<usize> {
        let target = self.target.as_ref()?;

        if m == 0 {
            // No estimate direction yet: best aligned single direction.
            let mut best: Option<(usize, f64)> = None;
            for (pos, dir) in self.dirs.iter().enumerate() {
                let score = dot(dir, target);
                match best {
                    Some((_, best_score)) if score <= best_score => {}
                    _ => best = Some((pos, score)),
                }
            }
            return best.map(|(pos, _)| self.labels[pos]);
        }

        let mut estimate = xw.to_vec();
        if normalize(&mut estimate) <= 0.0 {
            return None;
        }
        // Residual direction: component of the target orthogonal to the
        // current estimate. Vanishing means the estimate is already aligned.
        let along = dot(target, &estimate);
        let mut residual: Vec<f64> = target
            .iter()
            .zip(estimate.iter())
            .map(|(t, e)| t - along * e)
            .collect();
        if normalize(&mut residual) <= NUMERIC_TOL {
            return None;
        }

        if let Some(tree) = &self.tree {
            tree.search(&residual, &estimate)
        } else {
            let mut best: Option<(usize, f64)> = None;
            for (pos, dir) in self.dirs.iter().enumerate() {
                let Some(score) = direction_score(dir, &residual, &estimate) else {
                    continue;
                };
                match best {
                    Some((_, best_score)) if score <= best_score => {}
                    _ => best = Some((pos, score)),
                }
            }
            best.map(|(pos, _)| self.labels[pos])
        }
    }

    fn step_coeffs(&self, set: &VectorSet, xw: &[f64], m: usize, f: usize) -> Option<(f64, f64)> {
        let target = self.target.as_ref()?;
        let norm_f = set.norm(f);
        if norm_f <= 0.0 {
            return None;
        }
        let xw_norm = l2_norm(xw);
        if m == 0 || xw_norm <= NUMERIC_TOL {
            return initial_step(set, f);
        }

        let candidate: Vec<f64> = set.vector(f).iter().map(|v| v / norm_f).collect();
        let estimate: Vec<f64> = xw.iter().map(|v| v / xw_norm).collect();
        let p = dot(target, &estimate);
        let q = dot(target, &candidate);
        let c = dot(&estimate, &candidate);
        let denom = 1.0 - c * c;
        if denom <= NUMERIC_TOL {
            return None;
        }
        // Projection of the target direction onto span{estimate, candidate}.
        let a = (p - c * q) / denom;
        let b = (q - c * p) / denom;
        if a < 0.0 || b <= 0.0 {
            return None;
        }
        let blend_norm = (a * a + b * b + 2.0 * a * b * c).sqrt();
        if blend_norm <= NUMERIC_TOL {
            return None;
        }
        // Rescale so xw stays the best approximation along the new
        // direction.
        let scale = set.sum_norm() * (a * p + b * q) / blend_norm;
        if scale <= 0.0 {
            return None;
        }
        let alpha = scale * a / (blend_norm * xw_norm);
        let beta = scale * b / (blend_norm * norm_f);
        Some((alpha, beta))
    }

    fn sqrt_bound(&self, set: &VectorSet, m: f64) -> f64 {
        let sigma = set.norm_total();
        if sigma <= 0.0 || set.sum_norm() <= 0.0 {
            return 0.0;
        }
        sigma / m.max(1.0).sqrt()
    }

    fn exp_bound(&self, set: &VectorSet, m: f64) -> f64 {
        let sigma = set.norm_total();
        let snorm = set.sum_norm();
        if sigma <= 0.0 || snorm <= 0.0 {
            return 0.0;
        }
        let kappa = (snorm / sigma) * (snorm / sigma);
        let nu = 1.0 - kappa / 8.0;
        sigma * nu.powf(m.max(0.0))
    }
}

/// Matching-pursuit style construction with an exact two-coefficient update.
///
/// Selection maximizes residual alignment like Frank-Wolfe; the update
/// minimizes the squared error over `alpha * xw + beta * y_f` exactly via
/// the normal equations. A candidate parallel to the estimate, or one whose
/// exact solution needs a negative coefficient, is rejected as
/// non-improving. The single-coefficient variant that only rescales toward
/// the candidate fails to converge on near-parallel two-point inputs and is
/// deliberately not used.
#[derive(Debug, Default)]
pub(crate) struct Pursuit;

impl SelectionPolicy for Pursuit {
    fn select(&self, set: &VectorSet, xw: &[f64], _m: usize) -> Option<usize> {
        residual_alignment_argmax(set, xw)
    }

    fn step_coeffs(&self, set: &VectorSet, xw: &[f64], _m: usize, f: usize) -> Option<(f64, f64)> {
        let norm_f = set.norm(f);
        if norm_f <= 0.0 {
            return None;
        }
        let xw_norm_sqr = l2_norm_sqr(xw);
        if xw_norm_sqr <= NUMERIC_TOL {
            return initial_step(set, f);
        }

        let xs = set.sum();
        let xf = set.vector(f);
        let along = dot(xw, xf) / norm_f;
        let det = xw_norm_sqr - along * along;
        if det <= NUMERIC_TOL * xw_norm_sqr {
            return None;
        }
        let target_dot_xw = dot(xs, xw);
        let target_dot_dir = dot(xs, xf) / norm_f;
        let alpha = (target_dot_xw - along * target_dot_dir) / det;
        let beta = (xw_norm_sqr * target_dot_dir - along * target_dot_xw) / det;
        if alpha < 0.0 || beta < 0.0 {
            return None;
        }
        Some((alpha, beta / norm_f))
    }

    fn sqrt_bound(&self, set: &VectorSet, m: f64) -> f64 {
        fw_family_sqrt_bound(set, m)
    }

    fn exp_bound(&self, set: &VectorSet, m: f64) -> f64 {
        fw_family_exp_bound(set, m)
    }
}
