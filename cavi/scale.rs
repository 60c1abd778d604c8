//! # Group Scale Update
//!
//! The posterior standard deviations of a group minimize
//!
//! ```text
//! f(s) = ½ e_tau diag(XᵗX[G,G])ᵗ (s ∘ s) − Σ ln s + lambda √(sᵗs + mu[G]ᵗmu[G])
//! ```
//!
//! Scales must stay strictly positive, so the solve runs over `u = ln s` and the
//! gradient is chain-ruled: `df/du = (df/ds) ∘ s`. No bound constraints are needed
//! inside the solve.

use crate::optimizer::{GROUP_BUDGET, Minimizer};
use crate::quadratic::GroupBlock;
use ndarray::{Array1, ArrayView1};

/// Objective and gradient of the scale update, in log-space.
pub struct ScaleObjective<'a> {
    diag: ArrayView1<'a, f64>,
    /// `mu[G]ᵗ mu[G]`.
    mean_sq: f64,
    e_tau: f64,
    lambda: f64,
}

impl<'a> ScaleObjective<'a> {
    pub fn new(block: &'a GroupBlock, mu: ArrayView1<f64>, e_tau: f64, lambda: f64) -> Self {
        Self {
            diag: block.diag.view(),
            mean_sq: mu.dot(&mu),
            e_tau,
            lambda,
        }
    }

    /// Cost and gradient at `u = ln s`.
    pub fn evaluate(&self, u: &Array1<f64>) -> (f64, Array1<f64>) {
        let s = u.mapv(f64::exp);
        let s_sq = &s * &s;
        let norm = (s_sq.sum() + self.mean_sq).sqrt();

        let cost = 0.5 * self.e_tau * self.diag.dot(&s_sq) - u.sum() + self.lambda * norm;

        // d/du = d/ds * ds/du, with ds/du = s.
        let dfds =
            self.e_tau * (&self.diag * &s) - s.mapv(f64::recip) + (self.lambda / norm) * &s;
        let grad = dfds * &s;

        (cost, grad)
    }
}

/// Per-coordinate bounds on the optimal scale.
///
/// At the optimum `e_tau d_i s_i² + lambda s_i² / norm = 1` with `norm ≥ s_i`, so
/// `s_i` lies between the positive root of `e_tau d_i s² + lambda s = 1` and
/// `1 / √(e_tau d_i)`. The upper bound is infinite for a zero column.
fn optimum_bracket(diag: f64, e_tau: f64, lambda: f64) -> (f64, f64) {
    let curvature = e_tau * diag;
    let lower = 2.0 / (lambda + (lambda * lambda + 4.0 * curvature).sqrt());
    let upper = if curvature > 0.0 {
        curvature.sqrt().recip()
    } else {
        f64::INFINITY
    };
    (lower, upper)
}

/// Returns the updated (strictly positive, finite) scale sub-vector of a group.
///
/// The solve starts from `ln s[G]` projected onto the bracket that holds the
/// optimum, which keeps far-off starts from producing huge first steps. A result
/// whose `exp` is not finite and positive falls back to the projected start.
pub fn update_s<M: Minimizer>(
    minimizer: &M,
    block: &GroupBlock,
    mu: ArrayView1<f64>,
    s: ArrayView1<f64>,
    e_tau: f64,
    lambda: f64,
) -> Array1<f64> {
    let objective = ScaleObjective::new(block, mu, e_tau, lambda);
    let start = Array1::from_iter(s.iter().zip(block.diag.iter()).map(|(&v, &d)| {
        let (lower, upper) = optimum_bracket(d, e_tau, lambda);
        let projected = v.max(lower).min(upper);
        if projected.is_finite() && projected > 0.0 {
            projected
        } else {
            v
        }
    }));

    let u = minimizer.minimize(|u| objective.evaluate(u), start.mapv(f64::ln), GROUP_BUDGET);
    let updated = u.mapv(f64::exp);
    if updated.iter().all(|&v| v.is_finite() && v > 0.0) {
        updated
    } else {
        log::debug!("Scale solve left the representable range; keeping the projected start.");
        start
    }
}
