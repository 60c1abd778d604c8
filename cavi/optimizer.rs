//! # Embedded Quasi-Newton Solver
//!
//! The mean, scale and noise-precision updates each solve a small smooth problem
//! inside the outer sweep. They differ only in objective, dimension and budget, so
//! they share one capability: `minimize(objective_and_gradient, start, budget)`.
//!
//! Hitting the iteration cap is expected and is not an error. The inner budgets are
//! deliberately small (the outer loop dominates cost), and the best iterate found is
//! used as-is.

use ndarray::Array1;
use std::cell::RefCell;
use wolfe_bfgs::{Bfgs, BfgsError};

/// Iteration budget and gradient-norm tolerance of one inner solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBudget {
    pub max_iterations: usize,
    pub tolerance: f64,
}

/// Budget of the per-group mean and scale solves.
pub const GROUP_BUDGET: SolverBudget = SolverBudget {
    max_iterations: 8,
    tolerance: 1e-6,
};

/// Budget of the joint `(tau_a, tau_b)` solve, run once per outer iteration.
pub const PRECISION_BUDGET: SolverBudget = SolverBudget {
    max_iterations: 1000,
    tolerance: 1e-9,
};

/// A local minimizer of a smooth objective with analytic gradient.
pub trait Minimizer {
    /// Returns the best point found from `start`. Never fails: an exhausted budget or a
    /// stalled line search yields the last accepted iterate.
    fn minimize<F>(&self, objective: F, start: Array1<f64>, budget: SolverBudget) -> Array1<f64>
    where
        F: Fn(&Array1<f64>) -> (f64, Array1<f64>);
}

/// BFGS with a Wolfe line search.
#[derive(Debug, Clone, Copy, Default)]
pub struct WolfeBfgs;

impl Minimizer for WolfeBfgs {
    fn minimize<F>(&self, objective: F, start: Array1<f64>, budget: SolverBudget) -> Array1<f64>
    where
        F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
    {
        let best: RefCell<Option<(f64, Array1<f64>)>> = RefCell::new(None);

        let outcome = Bfgs::new(start.clone(), |point: &Array1<f64>| {
            let (cost, grad) = objective(point);
            if !is_finite_sample(cost, &grad) {
                return barrier_sample(point);
            }
            let mut best = best.borrow_mut();
            if best.as_ref().is_none_or(|(best_cost, _)| cost < *best_cost) {
                *best = Some((cost, point.clone()));
            }
            (cost, grad)
        })
        .with_tolerance(budget.tolerance)
        .with_max_iterations(budget.max_iterations)
        .run();

        let candidate = match outcome {
            Ok(solution) => solution.final_point,
            Err(BfgsError::MaxIterationsReached { last_solution })
            | Err(BfgsError::LineSearchFailed { last_solution, .. }) => last_solution.final_point,
            Err(e) => {
                log::debug!("Inner BFGS solve failed ({e:?}); using best evaluated point.");
                match best.into_inner() {
                    Some((_, point)) => point,
                    None => start.clone(),
                }
            }
        };

        if candidate.iter().all(|v| v.is_finite()) {
            candidate
        } else {
            log::debug!("Inner BFGS solve returned a non-finite point; keeping the start.");
            start
        }
    }
}

fn is_finite_sample(cost: f64, grad: &Array1<f64>) -> bool {
    cost.is_finite() && grad.iter().all(|v| v.is_finite())
}

/// `wolfe_bfgs` needs finite samples. A non-finite evaluation becomes a large smooth
/// barrier so the line search backs off toward the region where the objective is defined.
fn barrier_sample(point: &Array1<f64>) -> (f64, Array1<f64>) {
    const COST_BARRIER: f64 = 1e50;
    const GRAD_SCALE: f64 = 1e6;

    let mut grad = point.clone();
    for g in grad.iter_mut() {
        if !g.is_finite() || g.abs() < 1e-6 {
            *g = 1.0;
        }
    }
    grad *= GRAD_SCALE;
    let radius = point
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| v * v)
        .sum::<f64>();
    (COST_BARRIER + 0.5 * radius, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn minimizes_a_convex_quadratic() {
        // f(x) = (x0 - 1)^2 + 2 (x1 + 3)^2
        let solution = WolfeBfgs.minimize(
            |x: &Array1<f64>| {
                let cost = (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 3.0).powi(2);
                let grad = array![2.0 * (x[0] - 1.0), 4.0 * (x[1] + 3.0)];
                (cost, grad)
            },
            array![0.0, 0.0],
            SolverBudget {
                max_iterations: 100,
                tolerance: 1e-10,
            },
        );
        assert_abs_diff_eq!(solution, array![1.0, -3.0], epsilon = 1e-6);
    }

    #[test]
    fn starting_at_the_minimum_stays_there() {
        let start = array![0.5];
        let solution = WolfeBfgs.minimize(
            |x: &Array1<f64>| ((x[0] - 0.5).powi(2), array![2.0 * (x[0] - 0.5)]),
            start.clone(),
            GROUP_BUDGET,
        );
        assert_eq!(solution, start);
    }

    #[test]
    fn undefined_region_is_avoided() {
        // f(x) = x - ln(x) is only defined for x > 0; its minimum is at x = 1.
        let solution = WolfeBfgs.minimize(
            |x: &Array1<f64>| (x[0] - x[0].ln(), array![1.0 - 1.0 / x[0]]),
            array![3.0],
            SolverBudget {
                max_iterations: 200,
                tolerance: 1e-8,
            },
        );
        assert!(solution[0] > 0.0);
        assert_abs_diff_eq!(solution[0], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn exhausted_budget_still_improves_on_the_start() {
        let cost = |x: &Array1<f64>| (x[0] - 4.0).powi(4) + (x[1] + 1.0).powi(2);
        let start = array![0.0, 0.0];
        let solution = WolfeBfgs.minimize(
            |x: &Array1<f64>| {
                let grad = array![4.0 * (x[0] - 4.0).powi(3), 2.0 * (x[1] + 1.0)];
                (cost(x), grad)
            },
            start.clone(),
            SolverBudget {
                max_iterations: 1,
                tolerance: 1e-12,
            },
        );
        assert!(solution.iter().all(|v| v.is_finite()));
        assert!(cost(&solution) < cost(&start));
    }

    #[test]
    fn barrier_sample_is_finite() {
        let (cost, grad) = barrier_sample(&array![f64::NAN, 0.0, -2.0]);
        assert!(cost.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }
}
