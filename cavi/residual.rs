//! # Expected Residual Energy
//!
//! ```text
//! S = E‖y − Xb‖² = yᵗy − 2 Xᵗyᵗ(g ∘ mu) + Σ_i Σ_j XᵗX_ij E[b_i b_j]
//! ```
//!
//! with
//!
//! ```text
//! E[b_i b_j] = g_i (s_i² + mu_i²)   i = j
//!            = g_i mu_i mu_j        i ≠ j, same group (one shared indicator)
//!            = g_i g_j mu_i mu_j    i ≠ j, different groups
//! ```
//!
//! The double sum is evaluated blockwise. Writing `v = g ∘ mu`, the
//! different-group part is `vᵗ XᵗX v` minus each group's own block. The same-group
//! part, diagonal `g_i mu_i²` included, is `v[G]ᵗ XᵗX[G,G] mu[G]`, and the variance
//! term `g_i s_i²` of the diagonal is added separately, so the whole sum is
//!
//! ```text
//! vᵗ XᵗX v + Σ_G ( v[G]ᵗ XᵗX[G,G] mu[G] − v[G]ᵗ XᵗX[G,G] v[G] ) + Σ_i XᵗX_ii g_i s_i²
//! ```
//!
//! which reproduces the three-way case split exactly, for any `g`.

use crate::groups::GroupPartition;
use crate::quadratic::{GroupBlock, QuadraticForms};
use ndarray::{ArrayView1, Axis};

pub fn compute_s(
    forms: &QuadraticForms,
    partition: &GroupPartition,
    blocks: &[GroupBlock],
    mu: ArrayView1<f64>,
    s: ArrayView1<f64>,
    g: ArrayView1<f64>,
) -> f64 {
    let v = &g * &mu;

    let mut quadratic = v.dot(&forms.xtx.dot(&v));
    for (group, block) in partition.groups().iter().zip(blocks) {
        let v_g = v.select(Axis(0), &group.members);
        let mu_g = mu.select(Axis(0), &group.members);
        let xtx_v = block.xtx.dot(&v_g);
        quadratic += xtx_v.dot(&mu_g) - xtx_v.dot(&v_g);
    }
    let variance = forms
        .xtx
        .diag()
        .iter()
        .zip(g.iter().zip(s.iter()))
        .map(|(&d, (&gi, &si))| d * gi * si * si)
        .sum::<f64>();

    forms.yty + quadratic + variance - 2.0 * forms.yx.dot(&v)
}
