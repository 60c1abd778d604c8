//! # Group Mean Update
//!
//! For a fixed group `G`, with every coordinate outside `G` held at its current value,
//! the new slab mean `m` minimizes
//!
//! ```text
//! f(m) = ½ e_tau mᵗ XᵗX[G,G] m + e_tau mᵗ XᵗX[G,Gc] (g[Gc] ∘ mu[Gc]) − e_tau Xᵗy[G]ᵗ m
//!        + lambda √(s[G]ᵗs[G] + mᵗm)
//! ```
//!
//! The square root is a smooth upper bound on the expected group norm, so the
//! problem is convex and the bounded quasi-Newton solve from the current mean makes
//! steady progress across outer iterations.

use crate::optimizer::{GROUP_BUDGET, Minimizer};
use crate::quadratic::GroupBlock;
use ndarray::{Array1, ArrayView1};

/// Objective and gradient of the mean update for one group.
pub struct MeanObjective<'a> {
    block: &'a GroupBlock,
    /// `XᵗX[G,Gc] (g[Gc] ∘ mu[Gc])`, fixed during the solve.
    coupling: ArrayView1<'a, f64>,
    /// `s[G]ᵗ s[G]`.
    scale_sq: f64,
    e_tau: f64,
    lambda: f64,
}

impl<'a> MeanObjective<'a> {
    pub fn new(
        block: &'a GroupBlock,
        coupling: ArrayView1<'a, f64>,
        s: ArrayView1<f64>,
        e_tau: f64,
        lambda: f64,
    ) -> Self {
        Self {
            block,
            coupling,
            scale_sq: s.dot(&s),
            e_tau,
            lambda,
        }
    }

    pub fn evaluate(&self, m: &Array1<f64>) -> (f64, Array1<f64>) {
        let xtx_m = self.block.xtx.dot(m);
        let norm = (self.scale_sq + m.dot(m)).sqrt();

        let cost = 0.5 * self.e_tau * m.dot(&xtx_m) + self.e_tau * m.dot(&self.coupling)
            - self.e_tau * self.block.yx.dot(m)
            + self.lambda * norm;

        let grad = self.e_tau * (&xtx_m + &self.coupling - &self.block.yx)
            + (self.lambda / norm) * m;

        (cost, grad)
    }
}

/// Returns the updated mean sub-vector of a group, starting the solve from `mu[G]`.
///
/// `s` is the group's own scale sub-vector; it must be strictly positive, which keeps
/// the penalty gradient away from its singularity at `m = 0, s = 0`.
pub fn update_mu<'a, M: Minimizer>(
    minimizer: &M,
    block: &'a GroupBlock,
    coupling: ArrayView1<'a, f64>,
    mu: ArrayView1<f64>,
    s: ArrayView1<f64>,
    e_tau: f64,
    lambda: f64,
) -> Array1<f64> {
    let objective = MeanObjective::new(block, coupling, s, e_tau, lambda);
    minimizer.minimize(|m| objective.evaluate(m), mu.to_owned(), GROUP_BUDGET)
}
