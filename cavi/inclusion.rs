//! # Group Inclusion Update
//!
//! The inclusion probability of a group has an exact coordinate update: the
//! log-odds collects the prior odds, the slab's normalizing constant, the slab
//! entropy and penalty, and the expected log-likelihood gain of switching the group
//! on. A logistic map turns it into the new probability, shared by every member.

use crate::quadratic::GroupBlock;
use ndarray::ArrayView1;
use special::Gamma;
use std::f64::consts::{LN_2, PI};

/// Largest log-odds magnitude passed to the logistic map. `sigmoid(±30)` is still
/// strictly inside (0, 1) in double precision.
const LOG_ODDS_LIMIT: f64 = 30.0;

/// `ln C_k` of the multivariate Laplace-type slab
/// `p(β) = C_k λ^{m_k} exp(−λ ‖β‖)` over `m_k` coefficients.
pub fn slab_log_normalizer(size: usize) -> f64 {
    let mk = size as f64;
    -mk * LN_2 - 0.5 * (mk - 1.0) * PI.ln() - (0.5 * (mk + 1.0)).ln_gamma().0
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-odds of inclusion for one group, before the logistic map.
///
/// * `mu`, `s` - the group's current mean and scale sub-vectors
/// * `coupling` - `XᵗX[G,Gc] (g[Gc] ∘ mu[Gc])`
/// * `prior_inclusion` - `w = a0 / (a0 + b0)`
pub fn inclusion_log_odds(
    block: &GroupBlock,
    coupling: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    s: ArrayView1<f64>,
    e_tau: f64,
    lambda: f64,
    prior_inclusion: f64,
) -> f64 {
    let mk = mu.len() as f64;
    let w = prior_inclusion;
    let s_sq = &s * &s;

    let prior_odds = (w / (1.0 - w)).ln();
    // Gaussian entropy of the slab factor: ½ Σ ln(2πe s²).
    let entropy = 0.5 * mk + 0.5 * mk * (2.0 * PI).ln() + s.mapv(f64::ln).sum();
    let slab = slab_log_normalizer(mu.len()) + mk * lambda.ln()
        - lambda * (s_sq.sum() + mu.dot(&mu)).sqrt();
    let likelihood = e_tau
        * (block.yx.dot(&mu)
            - 0.5 * block.diag.dot(&s_sq)
            - 0.5 * mu.dot(&block.xtx.dot(&mu))
            - mu.dot(&coupling));

    prior_odds + entropy + slab + likelihood
}

/// Returns the updated inclusion probability of one group, strictly inside (0, 1)
/// for any finite input.
pub fn update_g(
    block: &GroupBlock,
    coupling: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    s: ArrayView1<f64>,
    e_tau: f64,
    lambda: f64,
    prior_inclusion: f64,
) -> f64 {
    let log_odds = inclusion_log_odds(block, coupling, mu, s, e_tau, lambda, prior_inclusion);
    sigmoid(log_odds.clamp(-LOG_ODDS_LIMIT, LOG_ODDS_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn block() -> GroupBlock {
        GroupBlock {
            xtx: array![[20.0, 2.0], [2.0, 15.0]],
            diag: array![20.0, 15.0],
            yx: array![30.0, -12.0],
        }
    }

    #[test]
    fn normalizer_matches_known_dimensions() {
        // m = 1: the Laplace density λ/2 exp(−λ|β|).
        assert_abs_diff_eq!(slab_log_normalizer(1), -LN_2, epsilon = 1e-12);
        // m = 2: 1 / (2π).
        assert_abs_diff_eq!(slab_log_normalizer(2), -(2.0 * PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn sigmoid_is_symmetric_and_stable() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert_abs_diff_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-15);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
    }

    #[test]
    fn strong_signal_is_included_and_no_signal_is_excluded() {
        let block = block();
        let coupling = array![0.0, 0.0];
        let s = array![0.1, 0.1];

        let fitted = array![1.5, -0.8];
        let g_signal = update_g(&block, coupling.view(), fitted.view(), s.view(), 4.0, 1.0, 0.5);
        assert!(g_signal > 0.99);

        let empty = GroupBlock {
            yx: array![0.0, 0.0],
            ..block
        };
        let zero = array![0.0, 0.0];
        let g_null = update_g(&empty, coupling.view(), zero.view(), s.view(), 4.0, 1.0, 0.5);
        assert!(g_null < 0.05);
    }

    #[test]
    fn probability_stays_in_open_unit_interval_for_extreme_inputs() {
        let block = block();
        let coupling = array![5.0, -3.0];
        let mu = array![2.0, -1.0];
        let s = array![0.3, 0.7];

        for &e_tau in &[1e-12, 1e-3, 1.0, 1e3, 1e12] {
            for &lambda in &[1e-12, 1e-3, 1.0, 1e3, 1e12] {
                for &w in &[1e-9, 0.5, 1.0 - 1e-9] {
                    let g = update_g(&block, coupling.view(), mu.view(), s.view(), e_tau, lambda, w);
                    assert!(g > 0.0 && g < 1.0, "g = {g} at e_tau={e_tau}, lambda={lambda}");
                }
            }
        }
    }

    #[test]
    fn larger_prior_odds_raise_inclusion() {
        let block = block();
        let coupling = array![0.0, 0.0];
        let mu = array![0.1, 0.0];
        let s = array![0.2, 0.2];

        let low = update_g(&block, coupling.view(), mu.view(), s.view(), 1.0, 1.0, 0.1);
        let high = update_g(&block, coupling.view(), mu.view(), s.view(), 1.0, 1.0, 0.9);
        assert!(high > low);
    }
}
