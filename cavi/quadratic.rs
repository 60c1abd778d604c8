//! # Cross-Product Cache
//!
//! Every update in the sweep touches the data only through `XᵗX`, `Xᵗy` and `yᵗy`.
//! These are computed once before the first iteration and never mutated. The
//! per-group diagonal blocks `XᵗX[G,G]` and slices `Xᵗy[G]` are gathered once as well,
//! since each group reads its own block on every iteration.

use crate::groups::GroupPartition;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Cached cross-products of the data, shared read-only by all updates.
#[derive(Debug, Clone)]
pub struct QuadraticForms {
    /// `XᵗX`, p×p, symmetric.
    pub xtx: Array2<f64>,
    /// `yᵗy`.
    pub yty: f64,
    /// `Xᵗy`, length p.
    pub yx: Array1<f64>,
}

impl QuadraticForms {
    pub fn new(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Self {
        Self {
            xtx: x.t().dot(&x),
            yty: y.dot(&y),
            yx: x.t().dot(&y),
        }
    }

    /// Gathers the blocks of one group.
    pub fn group_block(&self, members: &[usize]) -> GroupBlock {
        let xtx = self
            .xtx
            .select(Axis(0), members)
            .select(Axis(1), members);
        let diag = xtx.diag().to_owned();
        let yx = self.yx.select(Axis(0), members);
        GroupBlock { xtx, diag, yx }
    }

    /// Cross-coupling of group `k` with every other group:
    /// `XᵗX[G,Gc] (g[Gc] ∘ mu[Gc])`, one entry per member of `G`.
    pub fn cross_coupling(
        &self,
        partition: &GroupPartition,
        k: usize,
        mu: ArrayView1<f64>,
        g: ArrayView1<f64>,
    ) -> Array1<f64> {
        let mut weighted = &g * &mu;
        for &column in &partition.groups()[k].members {
            weighted[column] = 0.0;
        }
        self.xtx
            .select(Axis(0), &partition.groups()[k].members)
            .dot(&weighted)
    }
}

/// Per-group slices of the cross-product cache.
#[derive(Debug, Clone)]
pub struct GroupBlock {
    /// `XᵗX[G,G]`.
    pub xtx: Array2<f64>,
    /// `diag(XᵗX[G,G])`.
    pub diag: Array1<f64>,
    /// `Xᵗy[G]`.
    pub yx: Array1<f64>,
}
