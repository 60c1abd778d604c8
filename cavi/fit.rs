//! # Coordinate Ascent Driver
//!
//! One outer iteration is a full sweep:
//!
//! 1.  Snapshot `(mu, s, g)` and fix `E[tau] = tau_a / tau_b` for the whole sweep.
//! 2.  For every group, in ascending label order: update the slab mean, then the
//!     slab scales, then the inclusion probability, writing each result back before
//!     the next group reads it. Each group writes only its own slots.
//! 3.  Update `(tau_a, tau_b)` from the expected residual energy of the post-sweep state.
//! 4.  Optionally sample the ELBO, then test the L1 change of `(mu, s, g)`.
//!
//! Cancellation is polled at iteration boundaries only, so the returned state is
//! always a completed iteration.

use crate::data::{DataError, RegressionData};
use crate::elbo::{ElboEstimator, MonteCarloElbo};
use crate::inclusion::update_g;
use crate::mean::update_mu;
use crate::model::{FitOptions, FitResult, FitStatus, Hyperparameters, VariationalState};
use crate::optimizer::{Minimizer, WolfeBfgs};
use crate::precision::update_a_b;
use crate::residual::compute_s;
use crate::scale::update_s;
use indicatif::ProgressBar;
use ndarray::{Array1, ArrayView1, ArrayViewMut1, Axis};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors that abort a fit before any state is touched.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Invalid data: {0}")]
    Data(#[from] DataError),

    #[error("Length mismatch for initial {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Initial scale s[{index}] = {value} must be finite and strictly positive.")]
    NonPositiveScale { index: usize, value: f64 },

    #[error("Initial inclusion probability g[{index}] = {value} must lie in [0, 1].")]
    InclusionOutOfRange { index: usize, value: f64 },

    #[error("Initial mean mu[{index}] is not finite.")]
    NonFiniteMean { index: usize },

    #[error("Hyperparameter '{name}' = {value} must be finite and strictly positive.")]
    InvalidHyperparameter { name: &'static str, value: f64 },

    #[error("Invalid fit option: {0}")]
    InvalidOption(String),
}

/// Cooperative cancellation, polled once per outer iteration.
pub trait CancellationSignal {
    fn is_cancelled(&self) -> bool;
}

/// A signal that is never raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancellationSignal for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Receives per-iteration progress when verbosity is enabled.
pub trait ProgressSink {
    /// `change` is the total L1 change of `(mu, s, g)` over the iteration.
    fn on_iteration(&mut self, iteration: usize, change: f64);

    fn on_finish(&mut self, result: &FitResult);
}

/// Writes progress to the `log` facade at debug level. Used when verbosity is on
/// and no sink was supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_iteration(&mut self, iteration: usize, change: f64) {
        log::debug!("Iteration {iteration}: L1 change {change:.3e}");
    }

    fn on_finish(&mut self, result: &FitResult) {
        log::debug!("Finished after {} iterations: {:?}", result.iterations, result.status);
    }
}

impl ProgressSink for ProgressBar {
    fn on_iteration(&mut self, iteration: usize, change: f64) {
        self.set_position(iteration as u64);
        self.set_message(format!("L1 change {change:.3e}"));
    }

    fn on_finish(&mut self, result: &FitResult) {
        self.finish_with_message(format!(
            "{:?} after {} iterations",
            result.status, result.iterations
        ));
    }
}

/// Fits with the default collaborators: Monte-Carlo ELBO from `options`, no
/// cancellation, no progress display.
pub fn fit(
    data: &RegressionData,
    hyper: &Hyperparameters,
    options: &FitOptions,
    initial: VariationalState,
) -> Result<FitResult, FitError> {
    CaviDriver::new(data, hyper, options).run(initial)
}

/// The outer coordinate-ascent loop and its collaborators.
pub struct CaviDriver<'a, M: Minimizer = WolfeBfgs> {
    data: &'a RegressionData,
    hyper: &'a Hyperparameters,
    options: &'a FitOptions,
    elbo: Option<&'a dyn ElboEstimator>,
    cancel: &'a dyn CancellationSignal,
    progress: Option<&'a mut dyn ProgressSink>,
    minimizer: M,
}

impl<'a> CaviDriver<'a> {
    pub fn new(
        data: &'a RegressionData,
        hyper: &'a Hyperparameters,
        options: &'a FitOptions,
    ) -> Self {
        Self {
            data,
            hyper,
            options,
            elbo: None,
            cancel: &NeverCancel,
            progress: None,
            minimizer: WolfeBfgs,
        }
    }
}

impl<'a, M: Minimizer> CaviDriver<'a, M> {
    /// Replaces the inner solver used by the mean, scale and precision updates.
    pub fn with_minimizer<N: Minimizer>(self, minimizer: N) -> CaviDriver<'a, N> {
        CaviDriver {
            data: self.data,
            hyper: self.hyper,
            options: self.options,
            elbo: self.elbo,
            cancel: self.cancel,
            progress: self.progress,
            minimizer,
        }
    }

    /// Replaces the default Monte-Carlo ELBO estimator.
    pub fn with_elbo(mut self, elbo: &'a dyn ElboEstimator) -> Self {
        self.elbo = Some(elbo);
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a dyn CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// The sink only receives updates when `options.verbose` is set. Without one, a
    /// verbose fit reports through [`LogProgress`].
    pub fn with_progress(mut self, progress: &'a mut dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run(mut self, initial: VariationalState) -> Result<FitResult, FitError> {
        internal::validate(self.data, self.hyper, self.options, &initial)?;

        let default_elbo =
            MonteCarloElbo::new(self.options.elbo_mc_samples, self.options.elbo_seed);
        let elbo: &dyn ElboEstimator = match self.elbo {
            Some(estimator) => estimator,
            None => &default_elbo,
        };

        log::info!(
            "Starting CAVI with {} observations, {} coefficients in {} groups.",
            self.data.num_observations(),
            self.data.num_coefficients(),
            self.data.partition.num_groups()
        );

        let mut log_progress = LogProgress;
        let mut progress: Option<&mut dyn ProgressSink> = None;
        if self.options.verbose {
            progress = match self.progress.take() {
                Some(sink) => Some(sink),
                None => Some(&mut log_progress as &mut dyn ProgressSink),
            };
        }

        let mut state = initial;
        let mut elbo_values = Vec::new();
        let mut iterations = 0;
        let mut status = FitStatus::Exhausted;

        for iteration in 1..=self.options.max_iterations {
            if self.cancel.is_cancelled() {
                log::info!("Cancellation observed before iteration {iteration}.");
                status = FitStatus::Interrupted;
                break;
            }

            let previous = state.clone();
            self.sweep(&mut state);

            if !state.is_finite() {
                log::warn!(
                    "Iteration {iteration} produced a non-finite or invalid state; rolling back to iteration {}.",
                    iteration - 1
                );
                state = previous;
                status = FitStatus::Degenerate;
                break;
            }
            iterations = iteration;

            if self.options.track_elbo && iteration % self.options.track_elbo_every == 0 {
                elbo_values.push(elbo.estimate(self.data, &state, self.hyper));
            }

            let change_mu = l1_distance(previous.mu.view(), state.mu.view());
            let change_s = l1_distance(previous.s.view(), state.s.view());
            let change_g = l1_distance(previous.g.view(), state.g.view());
            log::debug!(
                "Iteration {iteration}: |dmu|={change_mu:.3e} |ds|={change_s:.3e} |dg|={change_g:.3e} tau=({:.4}, {:.4})",
                state.tau_a,
                state.tau_b
            );
            if let Some(sink) = progress.as_deref_mut() {
                sink.on_iteration(iteration, change_mu + change_s + change_g);
            }

            let tol = self.options.tolerance;
            if change_mu < tol && change_s < tol && change_g < tol {
                status = FitStatus::Converged;
                break;
            }
        }

        if self.options.track_elbo && iterations > 0 {
            elbo_values.push(elbo.estimate(self.data, &state, self.hyper));
        }

        match status {
            FitStatus::Converged => {
                if self.options.verbose {
                    log::info!("Converged in {iterations} iterations.");
                }
            }
            FitStatus::Exhausted => log::warn!(
                "CAVI did not converge within {} iterations.",
                self.options.max_iterations
            ),
            FitStatus::Interrupted => log::info!("CAVI interrupted after {iterations} iterations."),
            FitStatus::Degenerate => {
                log::warn!("CAVI stopped on a degenerate state after {iterations} iterations.")
            }
        }

        let result = FitResult {
            status,
            iterations,
            elbo: elbo_values,
            state,
        };
        if let Some(sink) = progress {
            sink.on_finish(&result);
        }
        Ok(result)
    }

    /// One full sweep over the groups followed by the noise-precision update.
    fn sweep(&self, state: &mut VariationalState) {
        let data = self.data;
        let e_tau = state.precision().expected();
        let lambda = self.hyper.lambda;
        let w = self.hyper.prior_inclusion();

        for (k, (group, block)) in data.partition.groups().iter().zip(&data.blocks).enumerate() {
            let members = &group.members;

            let coupling =
                data.forms
                    .cross_coupling(&data.partition, k, state.mu.view(), state.g.view());

            let mu_g = update_mu(
                &self.minimizer,
                block,
                coupling.view(),
                state.mu.select(Axis(0), members).view(),
                state.s.select(Axis(0), members).view(),
                e_tau,
                lambda,
            );
            scatter(state.mu.view_mut(), members, mu_g.view());

            let s_g = update_s(
                &self.minimizer,
                block,
                mu_g.view(),
                state.s.select(Axis(0), members).view(),
                e_tau,
                lambda,
            );
            scatter(state.s.view_mut(), members, s_g.view());

            let g_k = update_g(block, coupling.view(), mu_g.view(), s_g.view(), e_tau, lambda, w);
            for &j in members {
                state.g[j] = g_k;
            }
        }

        let s_energy = compute_s(
            &data.forms,
            &data.partition,
            &data.blocks,
            state.mu.view(),
            state.s.view(),
            state.g.view(),
        );
        let precision = update_a_b(
            &self.minimizer,
            state.precision(),
            self.hyper.tau_a0,
            self.hyper.tau_b0,
            s_energy,
            data.num_observations(),
        );
        state.set_precision(precision);
    }
}

/// Writes a group's sub-vector back into its own slots of the full vector.
fn scatter(mut target: ArrayViewMut1<f64>, members: &[usize], values: ArrayView1<f64>) {
    for (&j, &v) in members.iter().zip(values.iter()) {
        target[j] = v;
    }
}

fn l1_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    (&a - &b).mapv(f64::abs).sum()
}

/// Internal module for input validation.
mod internal {
    use super::*;

    pub(super) fn validate(
        data: &RegressionData,
        hyper: &Hyperparameters,
        options: &FitOptions,
        initial: &VariationalState,
    ) -> Result<(), FitError> {
        let p = data.num_coefficients();
        for (what, vector) in [("mu", &initial.mu), ("s", &initial.s), ("g", &initial.g)] {
            check_length(what, p, vector)?;
        }

        if let Some(index) = initial.mu.iter().position(|v| !v.is_finite()) {
            return Err(FitError::NonFiniteMean { index });
        }
        if let Some((index, &value)) = initial
            .s
            .iter()
            .enumerate()
            .find(|&(_, &v)| !(v.is_finite() && v > 0.0))
        {
            return Err(FitError::NonPositiveScale { index, value });
        }
        if let Some((index, &value)) = initial
            .g
            .iter()
            .enumerate()
            .find(|&(_, &v)| !(0.0..=1.0).contains(&v))
        {
            return Err(FitError::InclusionOutOfRange { index, value });
        }

        for (name, value) in [
            ("lambda", hyper.lambda),
            ("a0", hyper.a0),
            ("b0", hyper.b0),
            ("tau_a0", hyper.tau_a0),
            ("tau_b0", hyper.tau_b0),
            ("tau_a", initial.tau_a),
            ("tau_b", initial.tau_b),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FitError::InvalidHyperparameter { name, value });
            }
        }

        if !(options.tolerance.is_finite() && options.tolerance >= 0.0) {
            return Err(FitError::InvalidOption(format!(
                "tolerance must be finite and non-negative, got {}",
                options.tolerance
            )));
        }
        if options.track_elbo && options.track_elbo_every == 0 {
            return Err(FitError::InvalidOption(
                "track_elbo_every must be at least 1 when ELBO tracking is enabled".to_string(),
            ));
        }
        if options.track_elbo && options.elbo_mc_samples == 0 {
            return Err(FitError::InvalidOption(
                "elbo_mc_samples must be at least 1 when ELBO tracking is enabled".to_string(),
            ));
        }
        Ok(())
    }

    fn check_length(what: &'static str, expected: usize, vector: &Array1<f64>) -> Result<(), FitError> {
        if vector.len() == expected {
            Ok(())
        } else {
            Err(FitError::DimensionMismatch {
                what,
                expected,
                found: vector.len(),
            })
        }
    }
}
